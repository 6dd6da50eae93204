//! Chime + TTS announcement composition.
//!
//! A message mixing chimes, delays and spoken text is parsed into segments,
//! rendered into a single audio timeline, cached under a fingerprint of its
//! inputs and handed to a playback sink. All requests run through one
//! serializing queue owned by [`ChimeTts`].

pub mod cache;
pub mod capability;
pub mod compositor;
pub mod config;
pub mod fingerprint;
pub mod orchestrator;
pub mod platform;
pub mod playback;
pub mod queue;
pub mod request;
pub mod resolver;
pub mod segment;
pub mod service;
pub mod store;

use thiserror::Error;

pub use cache::{CacheStore, CachedAudioEntry, ClearPolicy, Removal};
pub use capability::{
    AudioConverter, Downloader, HttpDownloader, PlaybackError, PlaybackSink, SynthesisRequest,
    TtsEngine, TtsError,
};
pub use compositor::ComposeError;
pub use config::{ChimeConfig, FileCategory};
pub use fingerprint::{fingerprint, hash_string, FingerprintSource, Options};
pub use queue::{QueueError, RequestQueue};
pub use request::{ClearCacheRequest, SayRequest};
pub use segment::{parse_message, Segment};
pub use service::{Capabilities, ChimeTts, ClearCacheSummary, SayOutcome, UrlResponse};
pub use store::{JsonFileStore, PersistentStore};

#[derive(Debug, Error)]
pub enum ChimeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ChimeError>;
