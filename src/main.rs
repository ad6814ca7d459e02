use clap::{App, AppSettings, Arg};

use sfu_lb::{Config, Server};

// RUST_LOG=info cargo run --color=always --bin sfu-lb -- -c config.json
#[tokio::main]
async fn main() -> sfu_lb::Result<()> {
    env_logger::init();

    let mut app = App::new("SFU Load Balancer")
        .version("0.1.0")
        .author("Rain Liu <yliu@webrtc.rs>")
        .about("A connectionless UDP load balancer for SFU media relays")
        .setting(AppSettings::DeriveDisplayOrder)
        .arg(
            Arg::with_name("FULLHELP")
                .help("Prints more detailed help information")
                .long("fullhelp"),
        )
        .arg(
            Arg::with_name("conf")
                .required_unless("FULLHELP")
                .takes_value(true)
                .short('c')
                .long("conf")
                .help("Path to the JSON config file."),
        );

    let matches = app.clone().get_matches();

    if matches.is_present("FULLHELP") {
        app.print_long_help().unwrap();
        std::process::exit(0);
    }

    let conf_path = matches
        .value_of("conf")
        .ok_or(sfu_lb::Error::ErrNoConfigGiven)?;
    let config = Config::from_file(conf_path)?;

    let server = Server::start(config).await?;
    log::info!("sfu-lb: running, waiting for ctrl-c or sigterm...");
    server.run_until_shutdown().await;
    log::info!("sfu-lb: shutdown complete");

    Ok(())
}
