//! Whole-request composition: cache short-circuit, segment folding and
//! persistence of the final file.

use std::path::PathBuf;

use audio_core::AudioBuffer;
use tracing::{debug, error, warn};

use crate::cache::{CacheStore, CachedAudioEntry};
use crate::compositor::{conversion_args, new_file_stem, segment_offset, ComposeError, Compositor};
use crate::config::ChimeConfig;
use crate::fingerprint::fingerprint;
use crate::request::SayRequest;
use crate::segment::parse_message;

/// A finished clip and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub entry: CachedAudioEntry,
    pub fingerprint: String,
    /// Served straight from the cache without composing
    pub from_cache: bool,
}

/// A freshly written file that is deleted on drop unless released.
#[derive(Debug)]
pub(crate) struct PendingFile(Option<PathBuf>);

impl PendingFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self(Some(path))
    }

    pub(crate) fn release(mut self) {
        self.0 = None;
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        let Some(path) = self.0.take() else {
            return;
        };
        debug!("Removing unsettled audio file '{}'", path.display());
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Unable to delete '{}': {}", path.display(), e);
            }
        }
    }
}

pub struct Orchestrator {
    compositor: Compositor,
}

impl Orchestrator {
    pub fn new(compositor: Compositor) -> Self {
        Self { compositor }
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Produce the audio file for `request`.
    ///
    /// A cached clip is returned untouched when caching is requested and the
    /// file is still there. Otherwise the chime, message segments and end
    /// chime are folded into one timeline and saved: to the temp folder when
    /// the request targets players, to the public folder otherwise.
    pub async fn compose(
        &self,
        request: &SayRequest,
        config: &ChimeConfig,
        cache: &mut CacheStore,
    ) -> Result<Composition, ComposeError> {
        let key = fingerprint(request, &request.options);

        if request.cache {
            debug!("Attempting to retrieve generated audio from cache");
            match cache.get(&key).await {
                Ok(Some(entry)) if entry.duration_seconds > 0.0 => {
                    debug!("Using previously generated audio saved in cache");
                    return Ok(Composition {
                        entry,
                        fingerprint: key,
                        from_cache: true,
                    });
                }
                Ok(Some(_)) => warn!("Ignoring cached audio without duration"),
                Ok(None) => debug!(" - No previously generated audio found"),
                Err(e) => warn!("Cache lookup failed: {}", e),
            }
        }

        let audio = self.build_timeline(request, config, cache).await;
        let Some(audio) = audio else {
            error!("No audio was generated for the request");
            return Err(ComposeError::NoAudio);
        };
        let duration_seconds = audio.duration_secs();
        debug!(" - Final audio created. Duration: {}s", duration_seconds);
        if duration_seconds <= 0.0 {
            error!("Generated audio has no duration");
            return Err(ComposeError::ZeroDuration);
        }

        let path = self.save(&audio, request, config).await?;
        debug!("  - Filepath = '{}'", path.display());

        Ok(Composition {
            entry: CachedAudioEntry {
                path,
                duration_seconds,
            },
            fingerprint: key,
            from_cache: false,
        })
    }

    async fn build_timeline(
        &self,
        request: &SayRequest,
        config: &ChimeConfig,
        cache: &mut CacheStore,
    ) -> Option<AudioBuffer> {
        let mut timeline = self
            .compositor
            .add_chime(None, &request.chime_path, request.cache, 0.0, config, cache)
            .await;

        for segment in parse_message(&request.message) {
            timeline = self
                .compositor
                .render(timeline, &segment, request, config, cache)
                .await;
        }

        let end_offset = segment_offset(timeline.as_ref(), None, request.offset);
        self.compositor
            .add_chime(
                timeline,
                &request.end_chime_path,
                request.cache,
                end_offset,
                config,
                cache,
            )
            .await
    }

    async fn save(
        &self,
        audio: &AudioBuffer,
        request: &SayRequest,
        config: &ChimeConfig,
    ) -> Result<PathBuf, ComposeError> {
        let folder = if request.has_targets() {
            &config.temp_path
        } else {
            &config.www_path
        };

        let path = audio_core::save_to_folder(audio, folder, &new_file_stem())
            .map_err(|e| ComposeError::Save(format!("{e:#}")))?;

        let Some(spec) = request
            .audio_conversion
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        else {
            return Ok(path);
        };

        debug!("  - Performing audio conversion...");
        let unconverted = PendingFile::new(path.clone());
        match self
            .compositor
            .converter()
            .convert(&path, &conversion_args(spec), folder)
            .await
        {
            Ok(converted) => {
                debug!("  - ...audio conversion completed.");
                // The unconverted file is dropped unless the converter wrote in place
                if converted == path {
                    unconverted.release();
                }
                Ok(converted)
            }
            Err(e) => {
                warn!("  - ...audio conversion failed. Using unconverted audio file: {:#}", e);
                unconverted.release();
                Ok(path)
            }
        }
    }

    /// Keep or discard a composed file once it has been delivered.
    ///
    /// Cached requests and URL requests are recorded under the request
    /// fingerprint; anything else was only needed for this playback.
    pub async fn settle(
        &self,
        composition: &Composition,
        request: &SayRequest,
        cache: &mut CacheStore,
    ) {
        if request.cache || !request.has_targets() {
            if composition.from_cache {
                return;
            }
            if request.cache {
                debug!("Saving generated audio file to cache");
            }
            if let Err(e) = cache.put(&composition.fingerprint, &composition.entry).await {
                warn!("Unable to record generated audio in cache: {}", e);
            }
        } else if let Err(e) = tokio::fs::remove_file(&composition.entry.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Unable to delete '{}': {}",
                    composition.entry.path.display(),
                    e
                );
            }
        }
    }
}
