use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chime_core::{PlaybackError, PlaybackSink};
use tracing::{debug, warn};

/// Plays announcements on the host by spawning a player command
/// (`AUDIO_PLAYER`, e.g. `ffplay -nodisp -autoexit`) with the file appended.
///
/// Host audio has no grouping, so join/unjoin are no-ops. Volume levels are
/// remembered per target so they can be restored after an announcement.
#[derive(Debug, Default)]
pub struct CommandPlaybackSink {
    command: Option<Vec<String>>,
    volumes: Mutex<HashMap<String, f64>>,
}

impl CommandPlaybackSink {
    pub fn new(command: Option<&str>) -> Self {
        let command = command
            .map(|c| c.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|parts| !parts.is_empty());
        Self {
            command,
            volumes: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PlaybackSink for CommandPlaybackSink {
    async fn play(&self, content: &str, targets: &[String], _announce: bool) -> Result<(), PlaybackError> {
        let Some((program, args)) = self.command.as_ref().and_then(|c| c.split_first()) else {
            return Err(PlaybackError::ServiceNotFound);
        };
        if content.starts_with("media-source://") {
            return Err(PlaybackError::Template(format!(
                "'{content}' cannot be played by a local command"
            )));
        }

        debug!("Spawning '{}' for {:?}", program, targets);
        tokio::process::Command::new(program)
            .args(args)
            .arg(content)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| PlaybackError::Failed(format!("{program}: {e}")))?;
        Ok(())
    }

    async fn join(&self, leader: &str, _members: &[String]) -> Result<String, PlaybackError> {
        Ok(leader.to_string())
    }

    async fn unjoin(&self, _id: &str) -> Result<(), PlaybackError> {
        Ok(())
    }

    async fn set_volume(&self, id: &str, level: f64) -> Result<(), PlaybackError> {
        match self.volumes.lock() {
            Ok(mut volumes) => {
                volumes.insert(id.to_string(), level);
                Ok(())
            }
            Err(e) => {
                warn!("Volume table poisoned: {}", e);
                Err(PlaybackError::Failed(e.to_string()))
            }
        }
    }

    async fn volume(&self, id: &str) -> Option<f64> {
        self.volumes.lock().ok()?.get(id).copied()
    }

    async fn supports_grouping(&self, _id: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_without_command_service_is_missing() {
        let sink = CommandPlaybackSink::new(Some("   "));
        let result = sink.play("/tmp/a.wav", &["media_player.host".into()], false).await;
        assert_eq!(result, Err(PlaybackError::ServiceNotFound));
    }

    #[tokio::test]
    async fn test_media_source_locators_are_rejected() {
        let sink = CommandPlaybackSink::new(Some("true"));
        let result = sink
            .play("media-source://media_source/local/a.wav", &[], false)
            .await;
        assert!(matches!(result, Err(PlaybackError::Template(_))));
    }

    #[tokio::test]
    async fn test_volume_is_remembered() {
        let sink = CommandPlaybackSink::new(None);
        assert_eq!(sink.volume("media_player.host").await, None);
        sink.set_volume("media_player.host", 0.4).await.unwrap();
        assert_eq!(sink.volume("media_player.host").await, Some(0.4));
        assert!(!sink.supports_grouping("media_player.host").await);
    }
}
