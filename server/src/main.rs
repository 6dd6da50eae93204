use std::net::SocketAddr;

use anyhow::Context;
use chime_core::ChimeTts;
use tokio::net::TcpListener;
use tracing::{info, warn};

use server::config::ServerConfig;
use server::{capabilities, router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting Chime TTS server...");

    let config = ServerConfig::from_env();
    for dir in [
        &config.chime.temp_path,
        &config.chime.temp_chimes_path,
        &config.chime.www_path,
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    if config.tts_endpoint.is_none() {
        warn!("TTS_ENDPOINT not set, only chimes can be played");
    }
    if config.audio_player.is_none() {
        warn!("AUDIO_PLAYER not set, only say_url requests can succeed");
    }

    let chime = ChimeTts::initialize(config.chime.clone(), capabilities(&config)).await?;
    info!(
        "Server configuration loaded: port={}, queue_timeout={:?}, store={}",
        config.port,
        config.chime.queue_timeout,
        config.store_path.display()
    );

    let state = AppState {
        chime,
        config: config.clone(),
    };
    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
