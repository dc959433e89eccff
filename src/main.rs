use argh::FromArgs;
use fatsecret_proxy::{AppState, ProxyConfig, router};
use std::{net::SocketAddr, sync::Arc};

#[derive(FromArgs)]
/// Proxy that forwards food images to the FatSecret image recognition API.
struct ProxyArgs {
    /// the host to run the server on (overrides HOST)
    #[argh(option, short = 'h')]
    host: Option<String>,

    /// the port to run the server on (overrides PORT)
    #[argh(option, short = 'p')]
    port: Option<u16>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {e}");
    }
    log::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // a missing .env file is fine, the environment may already be populated
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: ProxyArgs = argh::from_env();

    let mut config = ProxyConfig::from_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let addr = config.bind_addr();
    let app = router(Arc::new(AppState::from_config(config)?));

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("Starting the FatSecret API proxy");
    log::info!("Listening on: {addr}");
    log::info!("Health check: GET /health");
    log::info!("Recognize food: POST /api/recognize-food");
    log::info!("Token status: GET /api/token-status");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
