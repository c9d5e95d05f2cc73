use std::pin::pin;

use clap::Parser;
use parkbeat_relay::{configure_server, telemetry};
use parkbeat_relay_cli::CliArgs;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

async fn shutdown_signal(address: String) {
    info!("Relay is listening on {address}");

    let mut sigint = pin!(signal::ctrl_c());
    #[cfg(unix)]
    {
        let mut sigterm_stream = signal(SignalKind::terminate()).expect("Failed to bind SIGTERM");
        let mut sigterm = pin!(sigterm_stream.recv());
        tokio::select! {
            _ = &mut sigint => {
                info!("Received Ctrl+C (SIGINT), shutting down gracefully...");
            }
            _ = &mut sigterm => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = &mut sigint => {
                info!("Received Ctrl+C (SIGINT), shutting down gracefully...");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(telemetry::formatting_layer(&args))
        .with(telemetry::log_filter())
        .init();

    let (router, _state) = configure_server(&args)?;

    let listener = tokio::net::TcpListener::bind(args.http.http_server_socket())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {e}", args.http.http_server_addr()))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(args.http.http_server_addr()))
        .await?;
    Ok(())
}
