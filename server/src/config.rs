// Configuration for the server, read from the environment

use std::path::PathBuf;
use std::time::Duration;

use chime_core::config::{CUSTOM_PRESET_PREFIX, CUSTOM_PRESET_SLOTS};
use chime_core::ChimeConfig;

pub const ENV_PREFIX: &str = "CHIME_TTS_";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    /// JSON file backing the cache store
    pub store_path: PathBuf,
    /// Base URL of the speech synthesis service
    pub tts_endpoint: Option<String>,
    /// Command used to play announcements locally
    pub audio_player: Option<String>,
    pub ffmpeg_bin: String,
    /// Platform used when a request names none
    pub default_tts_platform: String,
    pub chime: ChimeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_vars(|_| None)
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_vars<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let chime_var = |key: &str| get(&format!("{ENV_PREFIX}{key}"));

        let port = get("PORT").and_then(|v| v.parse().ok()).unwrap_or(8085);
        let request_timeout_secs = get("REQUEST_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);
        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        let root = chime_var("ROOT").unwrap_or_else(|| ".".to_string());
        let mut chime = ChimeConfig::with_root(&root);
        if let Some(path) = chime_var("TEMP_PATH") {
            chime.temp_path = path.into();
        }
        if let Some(path) = chime_var("TEMP_CHIMES_PATH") {
            chime.temp_chimes_path = path.into();
        }
        if let Some(path) = chime_var("WWW_PATH") {
            chime.www_path = path.into();
        }
        if let Some(url) = chime_var("PUBLIC_URL") {
            chime.public_url = url;
        }
        if let Some(dir) = chime_var("MEDIA_DIR") {
            chime.media_dir = dir;
        }
        if let Some(path) = chime_var("PRESETS_PATH") {
            chime.presets_path = path.into();
        }
        for slot in 1..=CUSTOM_PRESET_SLOTS {
            let key = format!("{CUSTOM_PRESET_PREFIX}{slot}");
            if let Some(value) = chime_var(&key.to_uppercase()) {
                chime.custom_presets.insert(key, value);
            }
        }
        if let Some(secs) = chime_var("QUEUE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            chime.queue_timeout = Duration::from_secs(secs);
        }

        let store_path = chime_var("STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&root).join("chime_tts_store.json"));

        Self {
            port,
            request_timeout_secs,
            cors_allowed_origins,
            store_path,
            tts_endpoint: get("TTS_ENDPOINT"),
            audio_player: get("AUDIO_PLAYER"),
            ffmpeg_bin: get("FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".to_string()),
            default_tts_platform: chime_var("DEFAULT_TTS_PLATFORM")
                .unwrap_or_else(|| chime_core::platform::PIPER.to_string()),
            chime,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
