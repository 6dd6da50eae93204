//! Segment rendering.
//!
//! The timeline starts out empty (`None`). Each rendered segment is laid
//! down relative to the current end of the timeline; the first audio to
//! arrive becomes the timeline as-is.

use std::path::Path;
use std::sync::Arc;

use audio_core::{AudioBuffer, AudioFormat};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::cache::{CacheStore, CachedAudioEntry};
use crate::capability::{AudioConverter, TtsEngine, TtsError};
use crate::config::ChimeConfig;
use crate::fingerprint::{fingerprint, number_field, FingerprintSource, Options};
use crate::platform;
use crate::request::{SayRequest, NORMAL_SPEED};
use crate::resolver::ChimeResolver;
use crate::segment::{ChimeSegment, Segment, TtsSegment};

/// Arguments substituted for the `alexa` conversion preset.
pub const ALEXA_CONVERSION_ARGS: &str = "-y -ar 24000 -ab 48k -ac 1";

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("No audio was generated")]
    NoAudio,

    #[error("Generated audio has no duration")]
    ZeroDuration,

    #[error("Unable to save audio file: {0}")]
    Save(String),
}

/// Expand named conversion presets into converter arguments.
pub fn conversion_args(spec: &str) -> String {
    match spec.trim().to_ascii_lowercase().as_str() {
        "alexa" => ALEXA_CONVERSION_ARGS.to_string(),
        _ => spec.trim().to_string(),
    }
}

/// Offset applied to a segment: nothing before the first audio, otherwise
/// the segment's own offset or the request default.
pub fn segment_offset(timeline: Option<&AudioBuffer>, own: Option<f64>, default: f64) -> f64 {
    match timeline {
        None => 0.0,
        Some(_) => own.unwrap_or(default),
    }
}

fn lay_down(timeline: Option<AudioBuffer>, audio: AudioBuffer, offset_ms: f64) -> Option<AudioBuffer> {
    match timeline {
        None => Some(audio),
        Some(existing) => match existing.combine(&audio, offset_ms) {
            Ok(combined) => Some(combined),
            Err(e) => {
                warn!("Unable to combine audio: {}", e);
                Some(existing)
            }
        },
    }
}

/// Effective parameters of one TTS segment.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsParams {
    pub message: String,
    pub platform: String,
    pub language: Option<String>,
    pub speed: f64,
    pub cache: bool,
    pub options: Options,
}

impl TtsParams {
    /// Segment attributes over request defaults. Request options only fill
    /// keys the segment did not set.
    pub fn resolve(segment: &TtsSegment, request: &SayRequest) -> Self {
        let mut options = segment.options.clone();
        for (key, value) in request.voice_options() {
            options.entry(key).or_insert(value);
        }
        Self {
            message: segment.message.clone(),
            platform: segment
                .platform
                .clone()
                .unwrap_or_else(|| request.tts_platform.clone()),
            language: segment.language.clone().or_else(|| request.language.clone()),
            speed: segment.speed.unwrap_or(request.tts_playback_speed),
            cache: segment.cache.unwrap_or(request.cache),
            options,
        }
    }
}

impl FingerprintSource for TtsParams {
    fn fingerprint_field(&self, name: &str) -> Option<String> {
        match name {
            "message" => Some(self.message.clone()),
            "tts_platform" => Some(self.platform.clone()),
            "language" => self.language.clone(),
            "tts_playback_speed" => Some(number_field(self.speed)),
            _ => None,
        }
    }
}

pub struct Compositor {
    tts: Arc<dyn TtsEngine>,
    converter: Arc<dyn AudioConverter>,
    resolver: ChimeResolver,
}

impl Compositor {
    pub fn new(
        tts: Arc<dyn TtsEngine>,
        converter: Arc<dyn AudioConverter>,
        resolver: ChimeResolver,
    ) -> Self {
        Self {
            tts,
            converter,
            resolver,
        }
    }

    pub fn tts(&self) -> &Arc<dyn TtsEngine> {
        &self.tts
    }

    pub fn converter(&self) -> &Arc<dyn AudioConverter> {
        &self.converter
    }

    /// Render `segment` onto `timeline`. Failures are logged and leave the
    /// timeline as it was.
    pub async fn render(
        &self,
        timeline: Option<AudioBuffer>,
        segment: &Segment,
        request: &SayRequest,
        config: &ChimeConfig,
        cache: &mut CacheStore,
    ) -> Option<AudioBuffer> {
        let (timeline, conversion) = match segment {
            Segment::Chime(chime) => (
                self.render_chime(timeline, chime, request, config, cache).await,
                chime.audio_conversion.as_deref(),
            ),
            Segment::Delay { length_ms } => (add_delay(timeline, *length_ms), None),
            Segment::Tts(tts) => (
                self.render_tts(timeline, tts, request, config, cache).await,
                tts.audio_conversion.as_deref(),
            ),
        };

        match (timeline, conversion) {
            (Some(audio), Some(spec)) => Some(self.convert_timeline(audio, spec, config).await),
            (timeline, _) => timeline,
        }
    }

    async fn render_chime(
        &self,
        timeline: Option<AudioBuffer>,
        chime: &ChimeSegment,
        request: &SayRequest,
        config: &ChimeConfig,
        cache: &mut CacheStore,
    ) -> Option<AudioBuffer> {
        let offset = segment_offset(timeline.as_ref(), chime.offset, request.offset);
        let allow_cache = chime.cache.unwrap_or(request.cache);
        self.add_chime(timeline, &chime.path, allow_cache, offset, config, cache)
            .await
    }

    /// Resolve and decode a chime, then lay it down at `offset_ms`.
    pub async fn add_chime(
        &self,
        timeline: Option<AudioBuffer>,
        reference: &str,
        allow_cache: bool,
        offset_ms: f64,
        config: &ChimeConfig,
        cache: &mut CacheStore,
    ) -> Option<AudioBuffer> {
        let Some(path) = self
            .resolver
            .resolve(reference, allow_cache, config, cache)
            .await
        else {
            return timeline;
        };

        debug!("Retrieving audio from path: \"{}\"", path.display());
        match audio_core::decode_file(&path) {
            Ok(audio) => {
                debug!(" - Audio retrieved. Duration: {}s", audio.duration_secs());
                lay_down(timeline, audio, offset_ms)
            }
            Err(e) => {
                warn!("Unable to extract audio from file: \"{:#}\"", e);
                timeline
            }
        }
    }

    async fn render_tts(
        &self,
        timeline: Option<AudioBuffer>,
        segment: &TtsSegment,
        request: &SayRequest,
        config: &ChimeConfig,
        cache: &mut CacheStore,
    ) -> Option<AudioBuffer> {
        let params = TtsParams::resolve(segment, request);
        let offset = segment_offset(timeline.as_ref(), segment.offset, request.offset);
        let key = fingerprint(&params, &params.options);

        let mut from_cache = None;
        if params.cache {
            debug!(" - Attempting to retrieve TTS file from cache...");
            match cache.get(&key).await {
                Ok(Some(entry)) => match audio_core::decode_file(&entry.path) {
                    Ok(audio) => {
                        debug!(
                            " - ...cached TTS file retrieved with duration: {}s",
                            entry.duration_seconds
                        );
                        from_cache = Some(audio);
                    }
                    Err(e) => warn!("Unable to read cached TTS file: {:#}", e),
                },
                Ok(None) => debug!(" - ...cached TTS file not found"),
                Err(e) => warn!("TTS cache lookup failed: {}", e),
            }
        }

        let cached = from_cache.is_some();
        let audio = match from_cache {
            Some(audio) => audio,
            None => match self.synthesize(&params).await {
                Some(audio) => audio,
                None => {
                    warn!("Error generating TTS audio for \"{}\"", params.message);
                    return timeline;
                }
            },
        };

        if params.cache && !cached {
            debug!("Saving generated TTS audio to cache");
            match audio_core::save_to_folder(&audio, &config.temp_path, &new_file_stem()) {
                Ok(path) => {
                    let entry = CachedAudioEntry {
                        path,
                        duration_seconds: audio.duration_secs(),
                    };
                    if let Err(e) = cache.put(&key, &entry).await {
                        warn!("Unable to record TTS audio in cache: {}", e);
                    }
                }
                Err(e) => warn!("Unable to save generated TTS audio to cache: {:#}", e),
            }
        }

        lay_down(timeline, audio, offset)
    }

    /// Request audio from the engine, decode it and apply the playback
    /// speed.
    pub async fn synthesize(&self, params: &TtsParams) -> Option<AudioBuffer> {
        let Some(request) = platform::synthesis_request(
            &params.platform,
            &params.message,
            params.language.as_deref(),
            params.cache,
            &params.options,
        ) else {
            warn!("No message text or TTS platform provided for TTS audio");
            return None;
        };

        debug!(
            "Requesting TTS audio: tts_platform='{}', message='{}', tts_playback_speed={}, cache={}, language={:?}, options={:?}",
            request.engine, request.text, params.speed, request.cache, request.language, request.options
        );
        let bytes = match self.tts.synthesize(&request).await {
            Ok(bytes) => bytes,
            Err(TtsError::NotConfigured(engine)) => {
                error!(
                    "The {} platform was not found. Please check that it has been configured correctly.",
                    platform::display_name(&engine)
                );
                return None;
            }
            Err(e) => {
                error!(" - Error generating TTS audio: {}", e);
                return None;
            }
        };

        let audio = match audio_core::decode_bytes(&bytes) {
            Ok(audio) => audio,
            Err(e) => {
                error!(" - ...could not convert TTS bytes to audio: {:#}", e);
                return None;
            }
        };

        if (params.speed - NORMAL_SPEED).abs() < f64::EPSILON {
            return Some(audio);
        }
        debug!(" - ...changing TTS playback speed to {} percent", params.speed);
        let chunk_ms = audio_core::chunk_ms_for_speed(params.speed);
        match audio.change_speed(params.speed / NORMAL_SPEED, chunk_ms) {
            Ok(faster) => Some(faster),
            Err(e) => {
                warn!("Unable to change TTS playback speed: {:#}", e);
                Some(audio)
            }
        }
    }

    /// Pass the whole timeline through the audio converter. The original
    /// timeline is kept when conversion fails.
    pub async fn convert_timeline(
        &self,
        timeline: AudioBuffer,
        spec: &str,
        config: &ChimeConfig,
    ) -> AudioBuffer {
        debug!("Converting audio segment...");
        match self.convert_buffer(&timeline, &conversion_args(spec), &config.temp_path).await {
            Ok(converted) => converted,
            Err(e) => {
                warn!("Audio conversion failed, keeping unconverted audio: {:#}", e);
                timeline
            }
        }
    }

    async fn convert_buffer(
        &self,
        timeline: &AudioBuffer,
        args: &str,
        folder: &Path,
    ) -> anyhow::Result<AudioBuffer> {
        let input = audio_core::save_to_folder(timeline, folder, &new_file_stem())?;
        let converted = self.converter.convert(&input, args, folder).await;
        let _ = tokio::fs::remove_file(&input).await;

        let output = converted?;
        let decoded = audio_core::decode_file(&output);
        if output != input {
            let _ = tokio::fs::remove_file(&output).await;
        }
        decoded
    }
}

/// Silence at the end of the timeline. A delay that cannot be added is
/// skipped.
pub fn add_delay(timeline: Option<AudioBuffer>, length_ms: f64) -> Option<AudioBuffer> {
    let delayed = match &timeline {
        Some(audio) => audio.append_silence(length_ms),
        None => AudioBuffer::silent(length_ms, AudioFormat::default()),
    };
    match delayed {
        Ok(audio) => Some(audio),
        Err(e) => {
            warn!("Skipping delay: {}", e);
            timeline
        }
    }
}

pub(crate) fn new_file_stem() -> String {
    uuid::Uuid::new_v4().to_string()
}
