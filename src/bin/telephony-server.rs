//! Telephony Audio Server
//!
//! Accepts media stream connections from the telephony provider and exposes
//! the call control API.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telephony_audio_out::{
    config::AppConfig,
    server::{router, AppState},
    synthesizer::{ElevenLabsSynthesizer, Synthesizer},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting telephony audio server");

    // Config path from args, else the platform default
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let synthesizer: Option<Arc<dyn Synthesizer>> =
        match ElevenLabsSynthesizer::new(&config.synthesizer) {
            Ok(synth) => Some(Arc::new(synth)),
            Err(e) => {
                tracing::warn!("Speech synthesis disabled: {}", e);
                None
            }
        };

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.http_port)
        .parse()
        .context("Invalid bind address")?;
    let media_path = config.server.media_path.clone();

    let state = Arc::new(AppState::new(config, synthesizer));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Media stream endpoint at ws://{}{}", addr, media_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
