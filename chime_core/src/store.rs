use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;

/// Externally persisted key-value mapping backing the cache.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Load the whole mapping. `None` when nothing has been stored yet.
    async fn load(&self) -> anyhow::Result<Option<Map<String, Value>>>;
    /// Replace the stored mapping.
    async fn save(&self, data: &Map<String, Value>) -> anyhow::Result<()>;
}

/// JSON file implementation of [`PersistentStore`].
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn load(&self) -> anyhow::Result<Option<Map<String, Value>>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::anyhow!("Failed to read {}: {e}", self.path.display()))
            }
        };
        let json: Value = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("{} is not valid JSON: {e}", self.path.display()))?;
        match json {
            Value::Object(map) => Ok(Some(map)),
            Value::Null => Ok(None),
            _ => Err(anyhow::anyhow!(
                "{} must contain a JSON object",
                self.path.display()
            )),
        }
    }

    async fn save(&self, data: &Map<String, Value>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(data)?;
        // Write next to the target and rename so a crash never leaves half a file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
