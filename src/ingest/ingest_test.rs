use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::Mobility;

async fn bind_loopback() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

#[tokio::test]
async fn relays_first_packet_to_least_loaded_sfu_and_creates_flow() {
    let sfu = bind_loopback().await;
    let sfu_addr = sfu.local_addr().unwrap().to_string();
    let registry = Arc::new(SfuRegistry::new(&[sfu_addr.clone()]));

    let listen = Arc::new(bind_loopback().await);
    let listen_addr = listen.local_addr().unwrap();
    let table = FlowTable::new();
    let token = CancellationToken::new();

    let run_token = token.clone();
    let run_table = table.clone();
    let run_registry = Arc::clone(&registry);
    let handle = tokio::spawn(run(
        Arc::clone(&listen),
        run_table,
        run_registry,
        Mobility::default(),
        run_token,
    ));

    let client = bind_loopback().await;
    client.send_to(b"hello", listen_addr).await.unwrap();

    let mut buf = [0u8; 16];
    let (n, from) = tokio::time::timeout(Duration::from_secs(1), sfu.recv_from(&mut buf))
        .await
        .expect("sfu should receive the relayed packet")
        .unwrap();
    assert_eq!(&buf[..n], b"hello");
    assert_ne!(from, client.local_addr().unwrap());

    assert_eq!(table.len().await, 1);
    assert_eq!(registry.refcount(&sfu_addr).await, Some(1));

    token.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}

#[tokio::test]
async fn reuses_existing_flow_for_same_client_endpoint() {
    let sfu = bind_loopback().await;
    let sfu_addr = sfu.local_addr().unwrap().to_string();
    let registry = Arc::new(SfuRegistry::new(&[sfu_addr.clone()]));

    let listen = Arc::new(bind_loopback().await);
    let listen_addr = listen.local_addr().unwrap();
    let table = FlowTable::new();
    let token = CancellationToken::new();

    let handle = tokio::spawn(run(
        Arc::clone(&listen),
        table.clone(),
        Arc::clone(&registry),
        Mobility::default(),
        token.clone(),
    ));

    let client = bind_loopback().await;
    client.send_to(b"one", listen_addr).await.unwrap();
    let mut buf = [0u8; 16];
    tokio::time::timeout(Duration::from_secs(1), sfu.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();

    client.send_to(b"two", listen_addr).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), sfu.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();

    // A single flow served both packets: refcount was only bumped once.
    assert_eq!(registry.refcount(&sfu_addr).await, Some(1));
    assert_eq!(table.len().await, 1);

    token.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}

#[tokio::test]
async fn mode_one_mobility_rebinds_to_same_sfu_after_interval() {
    let sfu = bind_loopback().await;
    let sfu_addr = sfu.local_addr().unwrap().to_string();
    let registry = Arc::new(SfuRegistry::new(&[sfu_addr.clone()]));

    let listen = Arc::new(bind_loopback().await);
    let listen_addr = listen.local_addr().unwrap();
    let table = FlowTable::new();
    let token = CancellationToken::new();

    let mobility = Mobility {
        enable: true,
        mode: 1,
        interval_s: 0,
    };

    let handle = tokio::spawn(run(
        Arc::clone(&listen),
        table.clone(),
        Arc::clone(&registry),
        mobility,
        token.clone(),
    ));

    let client = bind_loopback().await;
    client.send_to(b"one", listen_addr).await.unwrap();
    let mut buf = [0u8; 16];
    let (_n, first_src) = tokio::time::timeout(Duration::from_secs(1), sfu.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();

    // Every packet after the first exceeds `interval_s == 0`, so the flow rebinds each time: still
    // the same (only) sfu, via a fresh dial on a fresh ephemeral port. `initialize_with` never
    // touches the registry, so the refcount stays at 1 from the initial `initialize_least_loaded`.
    client.send_to(b"two", listen_addr).await.unwrap();
    let (_n, second_src) = tokio::time::timeout(Duration::from_secs(1), sfu.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();

    assert_ne!(first_src, second_src, "rebind should dial a fresh socket");
    assert_eq!(registry.refcount(&sfu_addr).await, Some(1));

    token.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}

#[tokio::test]
async fn stops_when_token_is_cancelled() {
    let sfu = bind_loopback().await;
    let sfu_addr = sfu.local_addr().unwrap().to_string();
    let registry = Arc::new(SfuRegistry::new(&[sfu_addr]));

    let listen = Arc::new(bind_loopback().await);
    let table = FlowTable::new();
    let token = CancellationToken::new();

    let handle = tokio::spawn(run(
        listen,
        table,
        registry,
        Mobility::default(),
        token.clone(),
    ));

    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("ingest loop should exit promptly after cancellation")
        .unwrap();
}
