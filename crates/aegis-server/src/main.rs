mod config;
mod router;
mod service;

use std::path::PathBuf;

use clap::Parser;
use shared::error::CommonError;

use crate::config::ServerConfig;
use crate::service::AegisService;

#[derive(Parser, Debug)]
#[command(name = "aegis", about = "Identity and access management server")]
struct Args {
    /// Path to the YAML server configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override, e.g. 127.0.0.1:8090.
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), CommonError> {
    shared::logging::configure_logging()?;

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let listen = config.listen.clone();
    let service = AegisService::bootstrap(config).await?;
    let shutdown = service.shutdown.clone();

    tokio::spawn(service.clone().sweeper());

    let app = router::create_router(service);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(%listen, "aegis listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
