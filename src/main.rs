use anyhow::Context;
use high_inference::market_data::KrakenClient;
use high_inference::server::{self, AppState};
use high_inference::{HighPredictor, OnnxModel, ServiceConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::from_env()?;

    let model = OnnxModel::load(&config.model_path, config.onnx.clone())?;
    let model_path = model.path().display().to_string();
    info!(
        path = %model_path,
        target_mode = %config.inference.default_mode,
        "model loaded"
    );
    let predictor = HighPredictor::new(Arc::new(model), config.inference.clone());

    let market = if config.market.enabled {
        info!(
            pair = %config.market.pair,
            interval = config.market.interval_minutes,
            "market data enabled"
        );
        Some(KrakenClient::new(config.market.clone())?)
    } else {
        info!("market data disabled, fetch routes answer 501");
        None
    };

    let state = AppState::new(predictor, market, model_path);
    let app = server::router(state);

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.bind, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("ctrl-c received, draining");
    }
}
