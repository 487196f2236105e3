use std::{sync::Arc, time::Duration};

use mail_auth::Resolver;
use mta_sts_daemon::{
    config::Config, core::Core, failed, listener::spawn::Server, sts::lookup::StsFetcher,
    UnwrapFailure,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Read configuration parameters
    let config = parse_config();

    // Enable logging
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(
                config
                    .log_level
                    .parse::<tracing::Level>()
                    .failed("Failed to parse log level"),
            )
            .finish(),
    )
    .failed("Failed to set subscriber");
    tracing::info!(
        "Starting MTA-STS daemon v{}...",
        env!("CARGO_PKG_VERSION")
    );

    // Build core
    let dns = Resolver::new_system_conf().failed("Failed to initialize DNS resolver");
    let core = Arc::new(Core::new(&config, Arc::new(StsFetcher::new(dns))));

    // Spawn listener
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    Server::from_config(&config)
        .spawn(core, shutdown_rx)
        .await
        .failed("Failed to start listener");

    // Wait for shutdown signal
    #[cfg(not(target_env = "msvc"))]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut h_term = signal(SignalKind::terminate()).failed("start signal handler");
        let mut h_int = signal(SignalKind::interrupt()).failed("start signal handler");

        tokio::select! {
            _ = h_term.recv() => tracing::debug!("Received SIGTERM."),
            _ = h_int.recv() => tracing::debug!("Received SIGINT."),
        };
    }

    #[cfg(target_env = "msvc")]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(err) => {
                eprintln!("Unable to listen for shutdown signal: {}", err);
            }
        }
    }

    // Shutdown the system
    tracing::info!(
        "Shutting down MTA-STS daemon v{}...",
        env!("CARGO_PKG_VERSION")
    );

    // Let sessions drain their reply queues
    shutdown_tx.send(true).ok();
    tokio::time::sleep(Duration::from_secs(1)).await;

    Ok(())
}

fn parse_config() -> Config {
    let mut config_path = None;
    let mut found_param = false;

    for arg in std::env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            if key.starts_with("--config") {
                config_path = value.trim().to_string().into();
                break;
            } else {
                failed(&format!("Invalid command line argument: {key}"));
            }
        } else if found_param {
            config_path = arg.into();
            break;
        } else if arg.starts_with("--config") {
            found_param = true;
        } else {
            failed(&format!("Invalid command line argument: {arg}"));
        }
    }

    Config::load(config_path.failed("Missing parameter --config=<path-to-config>."))
        .failed("Invalid configuration file")
}
