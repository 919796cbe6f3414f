//! TrustBridge escrow server

use anyhow::Context;
use clap::Parser;
use escrow_engine::node::EscrowNode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trustbridge_api::{
    create_router,
    settings::{Settings, DEFAULT_CONFIG_PATH},
    websocket::keepalive_interval,
    AppState,
};

#[derive(Debug, Parser)]
#[command(name = "trustbridge", version, about = "TrustBridge escrow and agent RPC server")]
struct Args {
    /// Settings file; missing files are ignored
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Listen address, overrides `server.bind`
    #[arg(short, long)]
    bind: Option<String>,

    /// Log filter, overrides `log.level`
    #[arg(short, long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let mut settings = Settings::load(&args.config)
        .with_context(|| format!("loading settings from {}", args.config))?;
    if let Some(bind) = args.bind {
        settings.server.bind = bind;
    }
    if let Some(level) = args.log {
        settings.log.level = level;
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting TrustBridge {}", env!("CARGO_PKG_VERSION"));

    let node = EscrowNode::new(settings.node.clone())
        .await
        .context("initializing escrow node")?;
    let state = AppState::new(Arc::new(node), keepalive_interval(settings.server.keepalive_secs));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("binding {}", settings.server.bind))?;
    info!("Listening on {}", settings.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("TrustBridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
