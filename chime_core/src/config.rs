// Configuration snapshot shared by the composition pipeline

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const QUEUE_TIMEOUT_DEFAULT_SECS: u64 = 60;
pub const TEMP_PATH_DEFAULT: &str = "tmp/chime_tts";
pub const TEMP_CHIMES_PATH_DEFAULT: &str = "tmp/chime_tts_chimes";
pub const WWW_PATH_DEFAULT: &str = "www/chime_tts";
pub const PRESETS_PATH_DEFAULT: &str = "chimes";
pub const MEDIA_DIR_DEFAULT: &str = "local";
pub const PUBLIC_URL_DEFAULT: &str = "http://localhost:8085/local";

/// Prefix of the user-configurable chime preset slots.
pub const CUSTOM_PRESET_PREFIX: &str = "custom_chime_path_";
pub const CUSTOM_PRESET_SLOTS: usize = 5;

/// Directory category of a generated or downloaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    ChimeDownload,
    PrivateTemp,
    Public,
}

#[derive(Debug, Clone)]
pub struct ChimeConfig {
    /// Announcement audio played on specific speakers, deleted or cached afterwards
    pub temp_path: PathBuf,
    /// Downloaded remote chimes
    pub temp_chimes_path: PathBuf,
    /// Publicly servable audio (say_url)
    pub www_path: PathBuf,
    /// Base URL under which `www_path` is served
    pub public_url: String,
    /// Media source directory name used in `media-source://` locators
    pub media_dir: String,
    /// Bundled chime presets, looked up as `<presets_path>/<name>.{mp3,wav}`
    pub presets_path: PathBuf,
    /// `custom_chime_path_N` -> path or URL
    pub custom_presets: BTreeMap<String, String>,
    pub queue_timeout: Duration,
}

impl Default for ChimeConfig {
    fn default() -> Self {
        Self::with_root(".")
    }
}

impl ChimeConfig {
    /// Default layout below `root`.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        let custom_presets = (1..=CUSTOM_PRESET_SLOTS)
            .map(|i| (format!("{CUSTOM_PRESET_PREFIX}{i}"), String::new()))
            .collect();
        Self {
            temp_path: root.join(TEMP_PATH_DEFAULT),
            temp_chimes_path: root.join(TEMP_CHIMES_PATH_DEFAULT),
            www_path: root.join(WWW_PATH_DEFAULT),
            public_url: PUBLIC_URL_DEFAULT.to_string(),
            media_dir: MEDIA_DIR_DEFAULT.to_string(),
            presets_path: root.join(PRESETS_PATH_DEFAULT),
            custom_presets,
            queue_timeout: Duration::from_secs(QUEUE_TIMEOUT_DEFAULT_SECS),
        }
    }

    /// Value of a custom preset slot, if the key names one and it is set.
    pub fn custom_preset(&self, key: &str) -> Option<&str> {
        self.custom_presets
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Which managed directory `path` lives in. Chime downloads are checked
    /// first so a chimes folder nested inside the temp folder still counts
    /// as a chime download.
    pub fn category_of(&self, path: &Path) -> Option<FileCategory> {
        if path.starts_with(&self.temp_chimes_path) {
            Some(FileCategory::ChimeDownload)
        } else if path.starts_with(&self.temp_path) {
            Some(FileCategory::PrivateTemp)
        } else if path.starts_with(&self.www_path) {
            Some(FileCategory::Public)
        } else {
            None
        }
    }

    /// Public URL of a file stored below `www_path`.
    pub fn public_url_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.www_path).ok()?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Some(format!("{}/{}", self.public_url.trim_end_matches('/'), relative))
    }

    /// Locator handed to the playback sink. Files below a `/media/` folder
    /// are addressed through the media source.
    pub fn content_locator(&self, path: &Path) -> String {
        const MEDIA_FOLDER: &str = "/media/";
        let lossy = path.to_string_lossy();
        let path: &str = &lossy;
        match path.find(MEDIA_FOLDER) {
            Some(idx) => {
                let media_path = path[idx + MEDIA_FOLDER.len()..].replace("//", "/");
                format!("media-source://media_source/{}/{}", self.media_dir, media_path)
            }
            None => path.to_string(),
        }
    }
}
