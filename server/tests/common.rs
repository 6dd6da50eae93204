//! Common utilities for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use audio_core::{encode_wav, AudioBuffer};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chime_core::{
    AudioConverter, Capabilities, ChimeTts, Downloader, JsonFileStore, PlaybackError,
    PlaybackSink, SynthesisRequest, TtsEngine, TtsError,
};
use server::config::ServerConfig;
use server::{router, AppState};
use tower::ServiceExt;

/// 200 ms of audio per word
pub struct WordTts {
    pub pending: HashSet<String>,
}

#[async_trait]
impl TtsEngine for WordTts {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, TtsError> {
        if self.pending.contains(&request.text) {
            futures::future::pending::<()>().await;
        }
        let words = request.text.split_whitespace().count();
        let buffer = AudioBuffer::new(vec![0.1; words * 3200], 16_000, 1);
        encode_wav(&buffer).map_err(|e| TtsError::Failed(e.to_string()))
    }
}

#[derive(Default)]
pub struct TestSink {
    pub missing: bool,
    pub plays: Mutex<Vec<String>>,
}

#[async_trait]
impl PlaybackSink for TestSink {
    async fn play(&self, content: &str, _targets: &[String], _announce: bool) -> Result<(), PlaybackError> {
        if self.missing {
            return Err(PlaybackError::ServiceNotFound);
        }
        self.plays.lock().unwrap().push(content.to_string());
        Ok(())
    }

    async fn join(&self, leader: &str, _members: &[String]) -> Result<String, PlaybackError> {
        Ok(leader.to_string())
    }

    async fn unjoin(&self, _id: &str) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn set_volume(&self, _id: &str, _level: f64) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn volume(&self, _id: &str) -> Option<f64> {
        None
    }

    async fn supports_grouping(&self, _id: &str) -> bool {
        false
    }
}

pub struct NoConverter;

#[async_trait]
impl AudioConverter for NoConverter {
    async fn convert(&self, _input: &Path, _args: &str, _output_dir: &Path) -> anyhow::Result<PathBuf> {
        anyhow::bail!("conversion disabled in tests")
    }
}

pub struct NoDownloads;

#[async_trait]
impl Downloader for NoDownloads {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("offline: {url}")
    }
}

pub struct TestApp {
    pub dir: tempfile::TempDir,
    pub app: Router,
    pub sink: Arc<TestSink>,
    pub config: ServerConfig,
}

pub struct TestOptions {
    pub pending: HashSet<String>,
    pub missing_player: bool,
    pub queue_timeout: Duration,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            pending: HashSet::new(),
            missing_player: false,
            queue_timeout: Duration::from_secs(60),
        }
    }
}

/// Create a test app instance
pub async fn create_test_app() -> TestApp {
    create_test_app_with(TestOptions::default()).await
}

pub async fn create_test_app_with(options: TestOptions) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_string_lossy().into_owned();
    let mut config = ServerConfig::from_vars(|key| match key {
        "CHIME_TTS_ROOT" => Some(root.clone()),
        _ => None,
    });
    config.chime.queue_timeout = options.queue_timeout;

    let sink = Arc::new(TestSink {
        missing: options.missing_player,
        ..Default::default()
    });
    let capabilities = Capabilities {
        tts: Arc::new(WordTts {
            pending: options.pending,
        }),
        playback: sink.clone(),
        converter: Arc::new(NoConverter),
        downloader: Arc::new(NoDownloads),
        store: Arc::new(JsonFileStore::new(&config.store_path)),
    };
    let chime = ChimeTts::initialize(config.chime.clone(), capabilities)
        .await
        .unwrap();

    let app = router(AppState {
        chime,
        config: config.clone(),
    });
    TestApp {
        dir,
        app,
        sink,
        config,
    }
}

/// POST `body` as JSON, returning status and parsed body.
pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}
