//! Chime reference resolution.
//!
//! A chime reference may be a local file, a bundled preset name, one of the
//! `custom_chime_path_N` slots, or an http(s) URL. Remote chimes are
//! downloaded into the temp chimes folder under the hash of their URL and,
//! when caching is allowed, recorded in the cache store so later requests
//! reuse the download.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheStore, CachedAudioEntry};
use crate::capability::Downloader;
use crate::config::{ChimeConfig, CUSTOM_PRESET_PREFIX};
use crate::fingerprint::hash_string;

const PRESET_EXTENSIONS: [&str; 2] = ["mp3", "wav"];

pub struct ChimeResolver {
    downloader: Arc<dyn Downloader>,
}

impl ChimeResolver {
    pub fn new(downloader: Arc<dyn Downloader>) -> Self {
        Self { downloader }
    }

    /// Resolve `reference` to a local audio file. `None` on any failure; the
    /// reason is logged.
    pub async fn resolve(
        &self,
        reference: &str,
        allow_cache: bool,
        config: &ChimeConfig,
        cache: &mut CacheStore,
    ) -> Option<PathBuf> {
        let mut reference = reference.trim();
        if reference.is_empty() || reference == "None" {
            return None;
        }

        if reference.starts_with(CUSTOM_PRESET_PREFIX) {
            match config.custom_preset(reference) {
                Some(target) => {
                    debug!(" - Custom chime preset '{}' -> '{}'", reference, target);
                    reference = target;
                }
                None => {
                    warn!("Custom chime preset '{}' has no path configured", reference);
                    return None;
                }
            }
        }

        if is_remote(reference) {
            return self.download(reference, allow_cache, config, cache).await;
        }

        let local = PathBuf::from(reference);
        if local.is_file() {
            return Some(local);
        }

        for ext in PRESET_EXTENSIONS {
            let preset = config.presets_path.join(format!("{reference}.{ext}"));
            if preset.is_file() {
                return Some(preset);
            }
        }

        warn!("Unable to find chime audio for '{}'", reference);
        None
    }

    async fn download(
        &self,
        url: &str,
        allow_cache: bool,
        config: &ChimeConfig,
        cache: &mut CacheStore,
    ) -> Option<PathBuf> {
        let key = hash_string(url);

        if allow_cache {
            match cache.get(&key).await {
                Ok(Some(entry)) => {
                    debug!(" - Using previously downloaded chime '{}'", entry.path.display());
                    return Some(entry.path);
                }
                Ok(None) => {}
                Err(e) => warn!("Chime cache lookup failed: {}", e),
            }
        }

        debug!(" - Downloading chime from '{}'", url);
        let bytes = match self.downloader.fetch(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Unable to download chime from '{}': {}", url, e);
                return None;
            }
        };

        let ext = extension_from_url(url).unwrap_or("mp3");
        let path = config.temp_chimes_path.join(format!("{key}.{ext}"));
        if let Err(e) = write_file(&path, &bytes).await {
            warn!("Unable to save downloaded chime '{}': {}", path.display(), e);
            return None;
        }

        let duration_seconds = match audio_core::probe_duration(&path) {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Downloaded chime from '{}' is not valid audio: {}", url, e);
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
        };

        if allow_cache {
            let entry = CachedAudioEntry {
                path: path.clone(),
                duration_seconds,
            };
            if let Err(e) = cache.put(&key, &entry).await {
                warn!("Unable to record downloaded chime in cache: {}", e);
            }
        }

        Some(path)
    }
}

fn is_remote(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// File extension of the last path segment of `url`, if it looks like one.
fn extension_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let segment = path.rsplit('/').next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    let valid = !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(ext)
}

async fn write_file(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}
