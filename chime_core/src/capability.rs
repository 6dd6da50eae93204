//! Boundaries to the outside world: speech synthesis, playback, audio
//! conversion and remote downloads. The pipeline only ever talks to these
//! traits; concrete adapters live with whoever hosts the service.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::fingerprint::Options;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub engine: String,
    pub language: Option<String>,
    /// Whether the engine may serve/keep its own cached copy
    pub cache: bool,
    pub options: Options,
}

#[derive(Debug, Error)]
pub enum TtsError {
    #[error("TTS engine '{0}' is not configured")]
    NotConfigured(String),

    #[error("TTS synthesis failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Synthesize `request.text`, returning encoded audio bytes.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, TtsError>;

    /// Purge the engine's own cache.
    async fn clear_cache(&self) -> Result<(), TtsError> {
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Playback service not found")]
    ServiceNotFound,

    #[error("Error while rendering template for audio playback: {0}")]
    Template(String),

    #[error("Playback failed: {0}")]
    Failed(String),
}

impl PlaybackError {
    /// Only generic failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlaybackError::Failed(_))
    }
}

#[async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn play(
        &self,
        content: &str,
        targets: &[String],
        announce: bool,
    ) -> Result<(), PlaybackError>;

    /// Group `members`; returns the id playback should be addressed to.
    async fn join(&self, leader: &str, members: &[String]) -> Result<String, PlaybackError>;

    async fn unjoin(&self, id: &str) -> Result<(), PlaybackError>;

    async fn set_volume(&self, id: &str, level: f64) -> Result<(), PlaybackError>;

    /// Current volume level, when the player reports one.
    async fn volume(&self, id: &str) -> Option<f64>;

    /// Whether the player can be grouped with others.
    async fn supports_grouping(&self, id: &str) -> bool;
}

#[async_trait]
pub trait AudioConverter: Send + Sync {
    /// Convert `input` using converter arguments `args`, writing the result
    /// into `output_dir`. Returns the converted file.
    async fn convert(&self, input: &Path, args: &str, output_dir: &Path) -> anyhow::Result<PathBuf>;
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// [`Downloader`] over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()? // convert non-200 into error
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}
