//! Server binary: config from the environment, tracing to stderr, then the
//! combined voice/TTS service until the transport fails.

use nightingale::ServiceConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig::from_env();
    tracing::info!(
        "starting nightingale (wake window {:.1}s, silence threshold {:.1}s, sv threshold {:.2})",
        config.pipeline.kws_window_secs,
        config.pipeline.silence_threshold_secs,
        config.pipeline.sv_threshold
    );

    nightingale::server::run(config).await
}
