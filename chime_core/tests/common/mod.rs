//! Fake capabilities shared by the pipeline tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use audio_core::{encode_wav, write_wav, AudioBuffer};
use chime_core::{
    AudioConverter, Capabilities, ChimeConfig, ChimeTts, Downloader, PersistentStore,
    PlaybackError, PlaybackSink, SynthesisRequest, TtsEngine, TtsError,
};
use serde_json::{Map, Value};

pub const RATE: u32 = 16_000;
/// Length of every synthesized word
pub const WORD_MS: f64 = 200.0;

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn tone(ms: f64) -> AudioBuffer {
    let frames = (ms * RATE as f64 / 1000.0).round() as usize;
    AudioBuffer::new(vec![0.2; frames], RATE, 1)
}

pub fn wav_bytes(ms: f64) -> Vec<u8> {
    encode_wav(&tone(ms)).unwrap()
}

pub fn write_chime(dir: &Path, name: &str, ms: f64) -> PathBuf {
    let path = dir.join(name);
    write_wav(&tone(ms), &path).unwrap();
    path
}

pub fn spoken_secs(text: &str) -> f64 {
    text.split_whitespace().count() as f64 * WORD_MS / 1000.0
}

#[derive(Default)]
pub struct FakeTts {
    pub calls: AtomicUsize,
    pub cleared: AtomicBool,
    pub requests: Mutex<Vec<SynthesisRequest>>,
    /// Texts that take this long to synthesize
    pub slow: HashMap<String, Duration>,
    /// Texts whose synthesis never completes
    pub pending: HashSet<String>,
    pub not_configured: bool,
    pub log: EventLog,
}

impl FakeTts {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TtsEngine for FakeTts {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.log.lock().unwrap().push(format!("synth {}", request.text));

        if self.not_configured {
            return Err(TtsError::NotConfigured(request.engine.clone()));
        }
        if self.pending.contains(&request.text) {
            futures::future::pending::<()>().await;
        }
        if let Some(delay) = self.slow.get(&request.text) {
            tokio::time::sleep(*delay).await;
        }
        Ok(wav_bytes(spoken_secs(&request.text) * 1000.0))
    }

    async fn clear_cache(&self) -> Result<(), TtsError> {
        self.cleared.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    /// Popped from the end, one per play call
    pub failures: Mutex<Vec<PlaybackError>>,
    pub plays: Mutex<Vec<(String, Vec<String>)>>,
    pub volumes: Mutex<HashMap<String, f64>>,
    pub grouping: HashSet<String>,
    pub log: EventLog,
}

impl RecordingSink {
    pub fn plays(&self) -> Vec<(String, Vec<String>)> {
        self.plays.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlaybackSink for RecordingSink {
    async fn play(&self, content: &str, targets: &[String], _announce: bool) -> Result<(), PlaybackError> {
        self.plays
            .lock()
            .unwrap()
            .push((content.to_string(), targets.to_vec()));
        self.log.lock().unwrap().push("play".to_string());
        let failure = self.failures.lock().unwrap().pop();
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn join(&self, leader: &str, _members: &[String]) -> Result<String, PlaybackError> {
        Ok(leader.to_string())
    }

    async fn unjoin(&self, _id: &str) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn set_volume(&self, id: &str, level: f64) -> Result<(), PlaybackError> {
        self.volumes.lock().unwrap().insert(id.to_string(), level);
        Ok(())
    }

    async fn volume(&self, id: &str) -> Option<f64> {
        self.volumes.lock().unwrap().get(id).copied()
    }

    async fn supports_grouping(&self, id: &str) -> bool {
        self.grouping.contains(id)
    }
}

/// Copies the input next to itself, recording the arguments.
#[derive(Default)]
pub struct CopyConverter {
    pub args: Mutex<Vec<String>>,
    pub fail: bool,
}

#[async_trait]
impl AudioConverter for CopyConverter {
    async fn convert(&self, input: &Path, args: &str, output_dir: &Path) -> anyhow::Result<PathBuf> {
        self.args.lock().unwrap().push(args.to_string());
        if self.fail {
            anyhow::bail!("converter exited with status 1");
        }
        let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("audio");
        let output = output_dir.join(format!("{stem}-converted.wav"));
        tokio::fs::copy(input, &output).await?;
        Ok(output)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub data: Mutex<Option<Map<String, Value>>>,
}

impl MemoryStore {
    pub fn snapshot(&self) -> Map<String, Value> {
        self.data.lock().unwrap().clone().unwrap_or_default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load(&self) -> anyhow::Result<Option<Map<String, Value>>> {
        Ok(self.data.lock().unwrap().clone())
    }

    async fn save(&self, data: &Map<String, Value>) -> anyhow::Result<()> {
        *self.data.lock().unwrap() = Some(data.clone());
        Ok(())
    }
}

pub struct StaticDownloader {
    pub body: Vec<u8>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Downloader for StaticDownloader {
    async fn fetch(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.body.clone())
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: ChimeConfig,
    pub tts: Arc<FakeTts>,
    pub sink: Arc<RecordingSink>,
    pub converter: Arc<CopyConverter>,
    pub store: Arc<MemoryStore>,
    pub downloader: Arc<StaticDownloader>,
    pub log: EventLog,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeTts::default(), RecordingSink::default())
    }

    /// Shares one event log between the given engine and sink.
    pub fn with(mut tts: FakeTts, mut sink: RecordingSink) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ChimeConfig::with_root(dir.path());
        let log = EventLog::default();
        tts.log = log.clone();
        sink.log = log.clone();
        Self {
            dir,
            config,
            tts: Arc::new(tts),
            sink: Arc::new(sink),
            converter: Arc::new(CopyConverter::default()),
            store: Arc::new(MemoryStore::default()),
            downloader: Arc::new(StaticDownloader {
                body: wav_bytes(300.0),
                calls: AtomicUsize::new(0),
            }),
            log,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            tts: self.tts.clone(),
            playback: self.sink.clone(),
            converter: self.converter.clone(),
            downloader: self.downloader.clone(),
            store: self.store.clone(),
        }
    }

    pub async fn service(&self) -> ChimeTts {
        ChimeTts::initialize(self.config.clone(), self.capabilities())
            .await
            .unwrap()
    }

    pub fn chime(&self, name: &str, ms: f64) -> PathBuf {
        write_chime(self.dir.path(), name, ms)
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}
