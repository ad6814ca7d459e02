use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use crate::flow_table::FlowTable;
use crate::registry::SfuRegistry;

/// Serves the optional diagnostic endpoint: `GET /healthz` always returns 200, `GET /stats`
/// reports the current flow count and per-SFU refcounts as plain text. A bind failure here is
/// logged and swallowed rather than aborting the process — the balancer itself doesn't depend on
/// this endpoint to relay traffic.
pub async fn serve(addr: SocketAddr, table: FlowTable, registry: Arc<SfuRegistry>, sfu_list: Vec<String>) {
    let make_svc = make_service_fn(move |_conn| {
        let table = table.clone();
        let registry = Arc::clone(&registry);
        let sfu_list = sfu_list.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle(req, table.clone(), Arc::clone(&registry), sfu_list.clone())
            }))
        }
    });

    let server = Server::try_bind(&addr);
    match server {
        Ok(builder) => {
            log::info!("sfu-lb: diagnostic endpoint listening on {addr}");
            if let Err(e) = builder.serve(make_svc).await {
                log::error!("sfu-lb: diagnostic endpoint stopped, error: {e}");
            }
        }
        Err(e) => {
            log::error!("sfu-lb: fail to bind diagnostic endpoint on {addr}, error: {e}");
        }
    }
}

async fn handle(
    req: Request<Body>,
    table: FlowTable,
    registry: Arc<SfuRegistry>,
    sfu_list: Vec<String>,
) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz") => Response::new(Body::from("ok")),
        (&Method::GET, "/stats") => {
            let flows = table.len().await;
            let mut body = format!("flows {flows}\n");
            for sfu in &sfu_list {
                let refcount = registry.refcount(sfu).await.unwrap_or(0);
                body.push_str(&format!("sfu {sfu} {refcount}\n"));
            }
            Response::new(Body::from(body))
        }
        _ => {
            let mut not_found = Response::new(Body::from("not found"));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            not_found
        }
    };
    Ok(response)
}
