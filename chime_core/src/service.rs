//! The service context owned by whoever hosts the integration.
//!
//! [`ChimeTts`] holds the configuration snapshot, the cache store and the
//! active speaker group behind one lock, and funnels every say / say_url /
//! clear-cache call through the request queue so only one of them touches
//! that state at a time.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, Removal};
use crate::capability::{AudioConverter, Downloader, PlaybackSink, TtsEngine};
use crate::compositor::Compositor;
use crate::config::ChimeConfig;
use crate::orchestrator::{Orchestrator, PendingFile};
use crate::playback::{PlaybackDriver, PlaybackOptions};
use crate::queue::RequestQueue;
use crate::request::{ClearCacheRequest, SayRequest};
use crate::resolver::ChimeResolver;
use crate::store::PersistentStore;
use crate::{ChimeError, Result};

/// External collaborators.
#[derive(Clone)]
pub struct Capabilities {
    pub tts: Arc<dyn TtsEngine>,
    pub playback: Arc<dyn PlaybackSink>,
    pub converter: Arc<dyn AudioConverter>,
    pub downloader: Arc<dyn Downloader>,
    pub store: Arc<dyn PersistentStore>,
}

/// Response of a say_url call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlResponse {
    pub url: String,
    /// Seconds
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SayOutcome {
    /// Audio was played on the requested targets
    Played { duration_seconds: f64 },
    /// No targets: the audio is published at a URL
    Url(UrlResponse),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCacheSummary {
    pub removed: usize,
    pub kept: usize,
}

struct State {
    config: ChimeConfig,
    cache: CacheStore,
    /// Leader of the speaker group joined by the last announcement
    active_group: Option<String>,
}

struct Inner {
    state: Mutex<State>,
    orchestrator: Orchestrator,
    playback: PlaybackDriver,
}

#[derive(Clone)]
pub struct ChimeTts {
    inner: Arc<Inner>,
    queue: RequestQueue,
}

impl ChimeTts {
    /// Load the cache store and start the request queue.
    pub async fn initialize(config: ChimeConfig, capabilities: Capabilities) -> Result<Self> {
        let cache = CacheStore::load(capabilities.store.clone()).await?;
        info!(
            "Chime TTS initialized with {} cached entr{}",
            cache.len(),
            if cache.len() == 1 { "y" } else { "ies" }
        );
        log_config(&config);

        let compositor = Compositor::new(
            capabilities.tts,
            capabilities.converter,
            ChimeResolver::new(capabilities.downloader),
        );
        let queue = RequestQueue::new(config.queue_timeout);
        let inner = Inner {
            state: Mutex::new(State {
                config,
                cache,
                active_group: None,
            }),
            orchestrator: Orchestrator::new(compositor),
            playback: PlaybackDriver::new(capabilities.playback),
        };

        Ok(Self {
            inner: Arc::new(inner),
            queue,
        })
    }

    /// Replace the configuration and re-read the cache store. Items already
    /// queued see the new snapshot once they start.
    pub async fn reload(&self, config: ChimeConfig) -> Result<()> {
        debug!("Reloading configuration");
        let mut state = self.inner.state.lock().await;
        self.queue.set_timeout(config.queue_timeout);
        log_config(&config);
        state.config = config;
        state.cache.refresh().await?;
        Ok(())
    }

    pub async fn config(&self) -> ChimeConfig {
        self.inner.state.lock().await.config.clone()
    }

    pub async fn cached_fingerprints(&self) -> Vec<String> {
        self.inner.state.lock().await.cache.fingerprints()
    }

    pub async fn active_group(&self) -> Option<String> {
        self.inner.state.lock().await.active_group.clone()
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Compose `request` and play it on its targets, or publish it when it
    /// has none.
    pub async fn say(&self, request: SayRequest) -> Result<SayOutcome> {
        let inner = self.inner.clone();
        self.queue
            .enqueue(move || async move { inner.say(request).await })
            .await?
    }

    /// Compose `request` into a publicly served file.
    pub async fn say_url(&self, mut request: SayRequest) -> Result<UrlResponse> {
        request.entity_id.clear();
        match self.say(request).await? {
            SayOutcome::Url(response) => Ok(response),
            SayOutcome::Played { .. } => Err(ChimeError::Other(anyhow::anyhow!(
                "say_url produced no URL"
            ))),
        }
    }

    pub async fn clear_cache(&self, request: ClearCacheRequest) -> Result<ClearCacheSummary> {
        let inner = self.inner.clone();
        self.queue
            .enqueue(move || async move { inner.clear_cache(request).await })
            .await?
    }
}

impl Inner {
    async fn say(&self, request: SayRequest) -> Result<SayOutcome> {
        let start = Instant::now();
        let targets = request.targets();
        info!(
            "----- Chime TTS {} called -----",
            if targets.is_empty() { "Say URL" } else { "Say" }
        );

        let mut guard = self.state.lock().await;
        let State {
            config,
            cache,
            active_group,
        } = &mut *guard;

        let composition = self.orchestrator.compose(&request, config, cache).await?;
        // Deleted if this item is abandoned before the file is settled
        let unsettled = (!composition.from_cache)
            .then(|| PendingFile::new(composition.entry.path.clone()));
        let duration_seconds = composition.entry.duration_seconds;
        debug!(" - audio = {:?}", composition.entry);

        let mut playback_result = Ok(());
        if !targets.is_empty() {
            let options = PlaybackOptions {
                announce: request.announce,
                join_players: request.join_players,
                unjoin_players: request.unjoin_players,
                volume_level: request.volume_level,
                final_delay: request.final_delay,
            };
            let players = self.playback.prepare(&targets, request.volume_level).await;
            let content = config.content_locator(&composition.entry.path);
            playback_result = self
                .playback
                .play(&content, &players, &options, active_group)
                .await;
            if playback_result.is_ok() {
                self.playback
                    .finish(&players, duration_seconds, &options, active_group)
                    .await;
            }
        }

        self.orchestrator.settle(&composition, &request, cache).await;
        if let Some(file) = unsettled {
            file.release();
        }
        playback_result?;

        let elapsed = start.elapsed().as_millis();
        if targets.is_empty() {
            let url = public_url(config, &composition.entry.path);
            debug!("Final URL = {}", url);
            info!("----- Chime TTS Say URL completed in {} ms -----", elapsed);
            return Ok(SayOutcome::Url(UrlResponse {
                url,
                duration: duration_seconds,
            }));
        }

        info!("----- Chime TTS Say completed in {} ms -----", elapsed);
        Ok(SayOutcome::Played { duration_seconds })
    }

    async fn clear_cache(&self, request: ClearCacheRequest) -> Result<ClearCacheSummary> {
        let start = Instant::now();
        let mut summary = ClearCacheSummary::default();
        if request.is_empty() {
            return Ok(summary);
        }
        info!("----- Chime TTS Clear Cache called -----");

        let mut guard = self.state.lock().await;
        let State { config, cache, .. } = &mut *guard;

        if let Some(message) = request.describe() {
            info!("{}", message);
            let policy = request.policy();
            for key in cache.fingerprints() {
                match cache.remove(&key, &policy, config).await? {
                    Removal::Removed => summary.removed += 1,
                    Removal::Kept => summary.kept += 1,
                    Removal::NotFound => {}
                }
            }
        }

        if request.clear_tts_engine_cache {
            debug!("Clearing cached TTS engine audio files...");
            if let Err(e) = self.orchestrator.compositor().tts().clear_cache().await {
                warn!("Unable to clear the TTS engine cache: {}", e);
            }
        }

        info!(
            "----- Chime TTS Clear Cache completed in {} ms -----",
            start.elapsed().as_millis()
        );
        Ok(summary)
    }
}

/// URL of a published file, falling back to its path when it lives outside
/// the public folder.
fn public_url(config: &ChimeConfig, path: &Path) -> String {
    config
        .public_url_for(path)
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn log_config(config: &ChimeConfig) {
    debug!("queue_timeout = {:?}", config.queue_timeout);
    debug!("temp_chimes_path = {}", config.temp_chimes_path.display());
    debug!("temp_path = {}", config.temp_path.display());
    debug!("www_path = {}", config.www_path.display());
    debug!("media_dir = {}", config.media_dir);
    debug!("custom_presets = {:?}", config.custom_presets);
}
