//! Driving the playback sink around one announcement: volume, grouping,
//! bounded play retries and restoring players afterwards.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::capability::{PlaybackError, PlaybackSink};

/// Attempts made for `play` before giving up on retryable errors.
pub const PLAY_ATTEMPTS: usize = 3;

/// What we know about a target before playing to it.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlayerState {
    pub entity_id: String,
    /// Negative when the player does not report a level
    pub initial_volume: f64,
    pub should_change_volume: bool,
    pub group_members_supported: bool,
}

/// Playback options taken from the request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackOptions {
    pub announce: bool,
    pub join_players: bool,
    pub unjoin_players: bool,
    pub volume_level: f64,
    /// Milliseconds to wait after the audio before restoring players
    pub final_delay: f64,
}

pub struct PlaybackDriver {
    sink: Arc<dyn PlaybackSink>,
}

impl PlaybackDriver {
    pub fn new(sink: Arc<dyn PlaybackSink>) -> Self {
        Self { sink }
    }

    /// Snapshot volume and grouping support of every target.
    pub async fn prepare(&self, targets: &[String], volume_level: f64) -> Vec<MediaPlayerState> {
        let mut players = Vec::with_capacity(targets.len());
        for entity_id in targets {
            let initial_volume = self.sink.volume(entity_id).await.unwrap_or(-1.0);
            let should_change_volume =
                volume_level >= 0.0 && (volume_level - initial_volume).abs() > f64::EPSILON;
            players.push(MediaPlayerState {
                entity_id: entity_id.clone(),
                initial_volume,
                should_change_volume,
                group_members_supported: self.sink.supports_grouping(entity_id).await,
            });
        }
        players
    }

    /// Join (optionally), set the volume and play `content`.
    ///
    /// `active_group` receives the group leader when players were joined.
    pub async fn play(
        &self,
        content: &str,
        players: &[MediaPlayerState],
        options: &PlaybackOptions,
        active_group: &mut Option<String>,
    ) -> Result<(), PlaybackError> {
        let mut addressed: Vec<String> = players.iter().map(|p| p.entity_id.clone()).collect();

        if options.join_players {
            if let Some(leader) = self.join(players, active_group).await {
                addressed = vec![leader];
            }
        }

        for player in players.iter().filter(|p| p.should_change_volume) {
            debug!(
                " - Setting '{}' volume level to {}",
                player.entity_id, options.volume_level
            );
            if let Err(e) = self
                .sink
                .set_volume(&player.entity_id, options.volume_level)
                .await
            {
                warn!(" - Error setting volume for '{}': {}", player.entity_id, e);
            }
        }

        debug!("Playing '{}' on {:?}", content, addressed);
        play_with_retry(self.sink.as_ref(), content, &addressed, options.announce).await
    }

    async fn join(
        &self,
        players: &[MediaPlayerState],
        active_group: &mut Option<String>,
    ) -> Option<String> {
        let supported: Vec<String> = players
            .iter()
            .filter(|p| p.group_members_supported)
            .map(|p| p.entity_id.clone())
            .collect();

        match supported.len() {
            0 => {
                warn!("Unable to join speakers. No supported media_players found.");
                return None;
            }
            1 => {
                warn!("Unable to join speakers. Only 1 media_player supported.");
                return None;
            }
            n => debug!(" - Joining {} media_player entities...", n),
        }

        match self.sink.join(&supported[0], &supported).await {
            Ok(leader) => {
                *active_group = Some(leader.clone());
                Some(leader)
            }
            Err(e) => {
                warn!("   - Error joining media_player entities: {}", e);
                None
            }
        }
    }

    /// Wait for the audio to finish, then restore volumes and unjoin.
    pub async fn finish(
        &self,
        players: &[MediaPlayerState],
        duration_seconds: f64,
        options: &PlaybackOptions,
        active_group: &mut Option<String>,
    ) {
        let wait = duration_seconds.max(0.0) + options.final_delay.max(0.0) / 1000.0;
        debug!("Waiting {}s for audio playback to complete...", wait);
        tokio::time::sleep(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX)).await;

        for player in players
            .iter()
            .filter(|p| p.should_change_volume && p.initial_volume >= 0.0)
        {
            debug!(
                "Returning {}'s volume level to {}",
                player.entity_id, player.initial_volume
            );
            if let Err(e) = self
                .sink
                .set_volume(&player.entity_id, player.initial_volume)
                .await
            {
                warn!(" - Error restoring volume for '{}': {}", player.entity_id, e);
            }
        }

        if options.unjoin_players && active_group.take().is_some() {
            for player in players.iter().filter(|p| p.group_members_supported) {
                debug!("   - unjoin: {}", player.entity_id);
                if let Err(e) = self.sink.unjoin(&player.entity_id).await {
                    warn!(" - Error calling unjoin for {}: {}", player.entity_id, e);
                }
            }
        }
    }
}

/// Call `play` until it succeeds, fails terminally or runs out of attempts.
pub async fn play_with_retry(
    sink: &dyn PlaybackSink,
    content: &str,
    targets: &[String],
    announce: bool,
) -> Result<(), PlaybackError> {
    let mut attempt = 1;
    loop {
        match sink.play(content, targets, announce).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < PLAY_ATTEMPTS => {
                error!("An unexpected error occurred when playing the audio: {}", e);
                attempt += 1;
                warn!("...playback retry {}/{}", attempt, PLAY_ATTEMPTS);
            }
            Err(e) => {
                error!("Playback failed: {}", e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedSink {
        failures: Mutex<Vec<PlaybackError>>,
        calls: Mutex<Vec<String>>,
        volumes: HashMap<String, f64>,
        grouping: Vec<String>,
    }

    impl ScriptedSink {
        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlaybackSink for ScriptedSink {
        async fn play(&self, content: &str, targets: &[String], _announce: bool) -> Result<(), PlaybackError> {
            self.log(format!("play {} {}", content, targets.join(",")));
            match self.failures.lock().unwrap().pop() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        async fn join(&self, leader: &str, members: &[String]) -> Result<String, PlaybackError> {
            self.log(format!("join {} {}", leader, members.join(",")));
            Ok(leader.to_string())
        }

        async fn unjoin(&self, id: &str) -> Result<(), PlaybackError> {
            self.log(format!("unjoin {id}"));
            Ok(())
        }

        async fn set_volume(&self, id: &str, level: f64) -> Result<(), PlaybackError> {
            self.log(format!("volume {id} {level}"));
            Ok(())
        }

        async fn volume(&self, id: &str) -> Option<f64> {
            self.volumes.get(id).copied()
        }

        async fn supports_grouping(&self, id: &str) -> bool {
            self.grouping.iter().any(|g| g == id)
        }
    }

    fn options() -> PlaybackOptions {
        PlaybackOptions {
            announce: false,
            join_players: false,
            unjoin_players: false,
            volume_level: -1.0,
            final_delay: 0.0,
        }
    }

    #[tokio::test]
    async fn test_retries_generic_failures() {
        let sink = ScriptedSink::default();
        *sink.failures.lock().unwrap() = vec![
            PlaybackError::Failed("busy".into()),
            PlaybackError::Failed("busy".into()),
        ];
        play_with_retry(&sink, "a.wav", &["p".into()], false).await.unwrap();
        assert_eq!(sink.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_three_attempts() {
        let sink = ScriptedSink::default();
        *sink.failures.lock().unwrap() = vec![PlaybackError::Failed("x".into()); 4];
        let result = play_with_retry(&sink, "a.wav", &["p".into()], false).await;
        assert!(result.is_err());
        assert_eq!(sink.calls().len(), PLAY_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_terminal_failures_are_not_retried() {
        let sink = ScriptedSink::default();
        *sink.failures.lock().unwrap() = vec![PlaybackError::ServiceNotFound];
        let result = play_with_retry(&sink, "a.wav", &["p".into()], false).await;
        assert_eq!(result, Err(PlaybackError::ServiceNotFound));
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_prepare_flags_volume_changes() {
        let mut sink = ScriptedSink::default();
        sink.volumes.insert("a".into(), 0.2);
        sink.volumes.insert("b".into(), 0.7);
        let driver = PlaybackDriver::new(Arc::new(sink));
        let targets = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let players = driver.prepare(&targets, 0.7).await;
        assert!(players[0].should_change_volume);
        assert!(!players[1].should_change_volume);
        assert!(players[2].should_change_volume);
        assert_eq!(players[2].initial_volume, -1.0);
    }

    #[tokio::test]
    async fn test_join_play_unjoin_sequence() {
        let sink = Arc::new(ScriptedSink {
            grouping: vec!["a".into(), "b".into()],
            volumes: HashMap::from([("a".to_string(), 0.5)]),
            ..Default::default()
        });
        let driver = PlaybackDriver::new(sink.clone());
        let targets = vec!["a".to_string(), "b".to_string()];
        let opts = PlaybackOptions {
            join_players: true,
            unjoin_players: true,
            volume_level: 0.9,
            ..options()
        };

        let mut group = None;
        let players = driver.prepare(&targets, opts.volume_level).await;
        driver.play("x.wav", &players, &opts, &mut group).await.unwrap();
        assert_eq!(group.as_deref(), Some("a"));
        driver.finish(&players, 0.0, &opts, &mut group).await;
        assert!(group.is_none());

        assert_eq!(
            sink.calls(),
            vec![
                "join a a,b",
                "volume a 0.9",
                "volume b 0.9",
                "play x.wav a",
                "volume a 0.5",
                "unjoin a",
                "unjoin b",
            ]
        );
    }

    #[tokio::test]
    async fn test_single_grouping_player_is_not_joined() {
        let sink = Arc::new(ScriptedSink {
            grouping: vec!["a".into()],
            ..Default::default()
        });
        let driver = PlaybackDriver::new(sink.clone());
        let opts = PlaybackOptions {
            join_players: true,
            ..options()
        };
        let players = driver
            .prepare(&["a".to_string(), "b".to_string()], opts.volume_level)
            .await;
        let mut group = None;
        driver.play("x.wav", &players, &opts, &mut group).await.unwrap();
        assert!(group.is_none());
        assert_eq!(sink.calls(), vec!["play x.wav a,b"]);
    }
}
