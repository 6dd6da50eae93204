use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::cache::ClearPolicy;
use crate::fingerprint::{number_field, FingerprintSource, Options};

/// Speed percentage that leaves TTS audio untouched.
pub const NORMAL_SPEED: f64 = 100.0;

/// Options exposed as top-level request / tag attributes.
pub const EXPOSED_OPTION_KEYS: [&str; 3] = ["gender", "tld", "voice"];

/// One say / say_url call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SayRequest {
    pub message: String,
    pub chime_path: String,
    pub end_chime_path: String,
    /// Milliseconds between segments; negative values overlap
    #[serde(alias = "delay")]
    pub offset: f64,
    /// Extra milliseconds to wait after playback before restoring players
    pub final_delay: f64,
    /// Percent, 100 = unchanged
    pub tts_playback_speed: f64,
    /// Target volume in `0.0..=1.0`; negative leaves volume alone
    pub volume_level: f64,
    pub join_players: bool,
    pub unjoin_players: bool,
    pub language: Option<String>,
    pub tts_platform: String,
    pub cache: bool,
    pub announce: bool,
    /// Target players. Empty means "produce a URL"
    #[serde(deserialize_with = "one_or_many")]
    pub entity_id: Vec<String>,
    pub options: Options,
    /// ffmpeg arguments (or a named preset) for the final file
    pub audio_conversion: Option<String>,
    pub gender: Option<String>,
    pub tld: Option<String>,
    pub voice: Option<String>,
}

impl Default for SayRequest {
    fn default() -> Self {
        Self {
            message: String::new(),
            chime_path: String::new(),
            end_chime_path: String::new(),
            offset: 0.0,
            final_delay: 0.0,
            tts_playback_speed: NORMAL_SPEED,
            volume_level: -1.0,
            join_players: false,
            unjoin_players: false,
            language: None,
            tts_platform: String::new(),
            cache: false,
            announce: false,
            entity_id: Vec::new(),
            options: Options::new(),
            audio_conversion: None,
            gender: None,
            tld: None,
            voice: None,
        }
    }
}

impl SayRequest {
    /// Trimmed, de-duplicated target ids in request order.
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::with_capacity(self.entity_id.len());
        for id in self.entity_id.iter().map(|id| id.trim()) {
            if !id.is_empty() && !targets.iter().any(|t| t == id) {
                targets.push(id.to_string());
            }
        }
        targets
    }

    pub fn has_targets(&self) -> bool {
        self.entity_id.iter().any(|id| !id.trim().is_empty())
    }

    /// Value of an exposed option given as a top-level field.
    pub fn exposed_option(&self, key: &str) -> Option<&str> {
        let value = match key {
            "gender" => self.gender.as_deref(),
            "tld" => self.tld.as_deref(),
            "voice" => self.voice.as_deref(),
            _ => None,
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    /// Engine options with the exposed top-level fields folded in. Keys
    /// already present in `options` win.
    pub fn voice_options(&self) -> Options {
        let mut options = self.options.clone();
        for key in EXPOSED_OPTION_KEYS {
            if let Some(value) = self.exposed_option(key) {
                options
                    .entry(key.to_string())
                    .or_insert_with(|| Value::String(value.to_string()));
            }
        }
        options
    }
}

impl FingerprintSource for SayRequest {
    fn fingerprint_field(&self, name: &str) -> Option<String> {
        match name {
            "message" => Some(self.message.clone()),
            "tts_platform" => Some(self.tts_platform.clone()),
            "gender" | "tld" | "voice" => self.exposed_option(name).map(str::to_string),
            "language" => self.language.clone(),
            "chime_path" => Some(self.chime_path.clone()),
            "end_chime_path" => Some(self.end_chime_path.clone()),
            "offset" => Some(number_field(self.offset)),
            "tts_playback_speed" => Some(number_field(self.tts_playback_speed)),
            _ => None,
        }
    }
}

/// Accept `"a, b"`, `"a"` or `["a", "b"]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Null(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        OneOrMany::Many(v) => v,
        OneOrMany::Null(()) => Vec::new(),
    })
}

/// Which cached files to purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClearCacheRequest {
    pub clear_chimes_cache: bool,
    pub clear_temp_tts_cache: bool,
    pub clear_www_tts_cache: bool,
    /// Also purge the TTS engine's own cache
    #[serde(alias = "clear_ha_tts_cache")]
    pub clear_tts_engine_cache: bool,
}

impl ClearCacheRequest {
    pub fn policy(&self) -> ClearPolicy {
        ClearPolicy {
            clear_chimes_cache: self.clear_chimes_cache,
            clear_temp_tts_cache: self.clear_temp_tts_cache,
            clear_www_tts_cache: self.clear_www_tts_cache,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.policy().is_empty() && !self.clear_tts_engine_cache
    }

    /// "Clearing a, b and c..." for the selected file categories.
    pub fn describe(&self) -> Option<String> {
        let mut parts = Vec::new();
        if self.clear_chimes_cache {
            parts.push("cached downloaded chimes");
        }
        if self.clear_temp_tts_cache {
            parts.push("cached temporary audio files");
        }
        if self.clear_www_tts_cache {
            parts.push("cached publicly accessible audio files");
        }
        let (last, rest) = parts.split_last()?;
        let listed = if rest.is_empty() {
            last.to_string()
        } else {
            format!("{} and {}", rest.join(", "), last)
        };
        Some(format!("Clearing {listed}..."))
    }
}
