//! Fingerprint -> audio file cache.
//!
//! The whole mapping is loaded once from a [`PersistentStore`] and rewritten
//! wholesale after every mutation. Records are stored in a versioned shape;
//! legacy records (a bare path string, no duration) are migrated the first
//! time they are read successfully.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{ChimeConfig, FileCategory};
use crate::store::PersistentStore;
use crate::Result;

/// A composed or synthesized clip on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAudioEntry {
    #[serde(rename = "audio_path")]
    pub path: PathBuf,
    #[serde(rename = "audio_duration")]
    pub duration_seconds: f64,
}

/// Stored record shapes, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    V2 {
        audio_path: PathBuf,
        audio_duration: Option<f64>,
    },
    /// Path only, written before durations were recorded
    V1(PathBuf),
}

impl StoredEntry {
    fn path(&self) -> &Path {
        match self {
            StoredEntry::V2 { audio_path, .. } => audio_path,
            StoredEntry::V1(path) => path,
        }
    }

    fn duration(&self) -> Option<f64> {
        match self {
            StoredEntry::V2 { audio_duration, .. } => *audio_duration,
            StoredEntry::V1(_) => None,
        }
    }
}

impl From<&CachedAudioEntry> for StoredEntry {
    fn from(entry: &CachedAudioEntry) -> Self {
        StoredEntry::V2 {
            audio_path: entry.path.clone(),
            audio_duration: Some(entry.duration_seconds),
        }
    }
}

/// Which file categories a clear operation may delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearPolicy {
    #[serde(default)]
    pub clear_chimes_cache: bool,
    #[serde(default)]
    pub clear_temp_tts_cache: bool,
    #[serde(default)]
    pub clear_www_tts_cache: bool,
}

impl ClearPolicy {
    pub fn allows(&self, category: FileCategory) -> bool {
        match category {
            FileCategory::ChimeDownload => self.clear_chimes_cache,
            FileCategory::PrivateTemp => self.clear_temp_tts_cache,
            FileCategory::Public => self.clear_www_tts_cache,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.clear_chimes_cache || self.clear_temp_tts_cache || self.clear_www_tts_cache)
    }
}

/// Result of [`CacheStore::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    NotFound,
    /// File lives in a category the caller chose to keep
    Kept,
    /// Entry dropped (and its file deleted, if it still existed)
    Removed,
}

pub struct CacheStore {
    entries: BTreeMap<String, StoredEntry>,
    backend: Arc<dyn PersistentStore>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("backend", &"<PersistentStore>")
            .finish()
    }
}

impl CacheStore {
    /// Load the mapping from `backend`. Records in an unknown shape are
    /// dropped with a warning.
    pub async fn load(backend: Arc<dyn PersistentStore>) -> Result<Self> {
        let mut store = Self {
            entries: BTreeMap::new(),
            backend,
        };
        store.refresh().await?;
        Ok(store)
    }

    /// Re-read the mapping from the backend, discarding in-memory state.
    pub async fn refresh(&mut self) -> Result<()> {
        let raw = self.backend.load().await?.unwrap_or_default();
        self.entries = raw
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value::<StoredEntry>(value) {
                Ok(entry) => Some((key, entry)),
                Err(e) => {
                    warn!("Ignoring unreadable cache record '{}': {}", key, e);
                    None
                }
            })
            .collect();
        debug!("Loaded {} cached audio record(s)", self.entries.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.entries.contains_key(fingerprint)
    }

    pub fn fingerprints(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Look up a fingerprint.
    ///
    /// A record whose file has vanished is invalidated and reported as a miss.
    /// A record without a duration is upgraded in place by probing the file.
    pub async fn get(&mut self, fingerprint: &str) -> Result<Option<CachedAudioEntry>> {
        let Some(stored) = self.entries.get(fingerprint).cloned() else {
            debug!(" - Audio data not found in cache.");
            return Ok(None);
        };

        let path = stored.path().to_path_buf();
        if !path.exists() {
            warn!("Cached file '{}' no longer exists", path.display());
            self.invalidate(fingerprint).await?;
            return Ok(None);
        }

        let duration_seconds = match stored.duration() {
            Some(duration) => duration,
            None => match audio_core::probe_duration(&path) {
                Ok(duration) => {
                    debug!(" - Upgrading legacy cache record for '{}'", path.display());
                    let entry = CachedAudioEntry {
                        path: path.clone(),
                        duration_seconds: duration,
                    };
                    self.put(fingerprint, &entry).await?;
                    duration
                }
                Err(e) => {
                    warn!("Unable to read duration of '{}': {}", path.display(), e);
                    return Ok(None);
                }
            },
        };

        Ok(Some(CachedAudioEntry {
            path,
            duration_seconds,
        }))
    }

    pub async fn put(&mut self, fingerprint: &str, entry: &CachedAudioEntry) -> Result<()> {
        debug!("Saving to chime_tts storage:");
        debug!(" - key:   \"{}\"", fingerprint);
        debug!(" - value: \"{:?}\"", entry);
        self.entries.insert(fingerprint.to_string(), entry.into());
        self.persist().await
    }

    /// Drop a record without touching its file.
    pub async fn invalidate(&mut self, fingerprint: &str) -> Result<bool> {
        if self.entries.remove(fingerprint).is_none() {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    /// Remove a record and delete its file, subject to `policy`.
    ///
    /// Existing files are only deleted when their directory belongs to a
    /// category `policy` allows; otherwise the record is left alone. Records
    /// pointing at files that no longer exist are always dropped.
    pub async fn remove(
        &mut self,
        fingerprint: &str,
        policy: &ClearPolicy,
        config: &ChimeConfig,
    ) -> Result<Removal> {
        let Some(stored) = self.entries.get(fingerprint) else {
            debug!(" - filepath_hash {} does not exist in the cache.", fingerprint);
            return Ok(Removal::NotFound);
        };
        let path = stored.path().to_path_buf();

        if path.exists() {
            let allowed = config
                .category_of(&path)
                .map(|category| policy.allows(category))
                .unwrap_or(false);
            if !allowed {
                return Ok(Removal::Kept);
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(" - Cached file '{}' deleted successfully.", path.display()),
                Err(e) => warn!(" - Unable to delete cached file '{}': {}", path.display(), e),
            }
        } else {
            debug!(" - Cached file '{}' not found.", path.display());
        }

        self.entries.remove(fingerprint);
        self.persist().await?;
        Ok(Removal::Removed)
    }

    async fn persist(&self) -> Result<()> {
        let mut map = Map::new();
        for (key, entry) in &self.entries {
            map.insert(key.clone(), serde_json::to_value(entry)?);
        }
        self.backend.save(&map).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stored_entry_shapes() {
        let v2: StoredEntry =
            serde_json::from_value(json!({"audio_path": "/a.wav", "audio_duration": 2.0})).unwrap();
        assert_eq!(v2.duration(), Some(2.0));

        let v2_null: StoredEntry =
            serde_json::from_value(json!({"audio_path": "/a.wav", "audio_duration": null}))
                .unwrap();
        assert_eq!(v2_null.duration(), None);

        let v1: StoredEntry = serde_json::from_value(json!("/legacy.mp3")).unwrap();
        assert_eq!(v1, StoredEntry::V1(PathBuf::from("/legacy.mp3")));
        assert_eq!(v1.path(), Path::new("/legacy.mp3"));
    }

    #[test]
    fn test_entry_serializes_with_storage_keys() {
        let entry = CachedAudioEntry {
            path: PathBuf::from("/x.wav"),
            duration_seconds: 1.25,
        };
        let value = serde_json::to_value(StoredEntry::from(&entry)).unwrap();
        assert_eq!(value, json!({"audio_path": "/x.wav", "audio_duration": 1.25}));
    }

    #[tokio::test]
    async fn test_legacy_record_is_upgraded_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("legacy.wav");
        let format = audio_core::AudioFormat {
            sample_rate: 8_000,
            channels: 1,
        };
        let audio = audio_core::AudioBuffer::silent(500.0, format).unwrap();
        audio_core::write_wav(&audio, &clip).unwrap();

        let store_path = dir.path().join("store.json");
        let backend = Arc::new(crate::JsonFileStore::new(&store_path));
        let mut legacy = Map::new();
        legacy.insert("abc".to_string(), json!(clip));
        backend.save(&legacy).await.unwrap();

        let mut cache = CacheStore::load(backend.clone()).await.unwrap();
        let entry = cache.get("abc").await.unwrap().unwrap();
        assert_eq!(entry.path, clip);
        assert!((entry.duration_seconds - 0.5).abs() < 0.01);

        let persisted = backend.load().await.unwrap().unwrap();
        let record = &persisted["abc"];
        assert_eq!(record["audio_path"], json!(clip));
        assert!((record["audio_duration"].as_f64().unwrap() - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_clear_policy() {
        let policy = ClearPolicy {
            clear_www_tts_cache: true,
            ..Default::default()
        };
        assert!(policy.allows(FileCategory::Public));
        assert!(!policy.allows(FileCategory::PrivateTemp));
        assert!(!policy.allows(FileCategory::ChimeDownload));
        assert!(ClearPolicy::default().is_empty());
    }
}
