use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use super::traits::{AsyncModule, BackendCommand};
use crate::cue::{CueId, MediaSource, PropertyKey};
use crate::engine::EngineHandle;

/// Media URIs with this prefix fail to play, for rehearsing error handling.
pub const FAIL_PREFIX: &str = "fail:";

#[derive(Debug)]
struct Track {
    source: MediaSource,
    position: Duration,
    playing_since: Option<Instant>,
    properties: BTreeMap<PropertyKey, f64>,
}

impl Track {
    fn new(source: MediaSource) -> Self {
        Self {
            source,
            position: Duration::ZERO,
            playing_since: None,
            properties: BTreeMap::new(),
        }
    }

    fn position(&self, now: Instant) -> Duration {
        match self.playing_since {
            Some(since) => self.position + now.saturating_duration_since(since),
            None => self.position,
        }
    }

    /// When the media runs out, if it is playing and has a known length.
    fn deadline(&self) -> Option<Instant> {
        let since = self.playing_since?;
        let length = self.source.duration?;
        Some(since + length.saturating_sub(self.position))
    }
}

/// Rehearsal backend: plays nothing, but keeps time like real media would.
///
/// Media with a known duration reports its natural end when that much play
/// time has passed. Media without one runs until stopped.
pub struct SimulatedMedia {
    tracks: HashMap<CueId, Track>,
    status: HashMap<String, String>,
}

impl SimulatedMedia {
    pub fn new() -> Self {
        Self {
            tracks: HashMap::new(),
            status: HashMap::new(),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.tracks.values().filter_map(Track::deadline).min()
    }

    fn handle_command(&mut self, command: BackendCommand, engine: &EngineHandle) {
        let now = Instant::now();
        match command {
            BackendCommand::Prepare { cue, source } => {
                log::debug!("Prepared cue {} from {}", cue, source.uri);
                self.tracks.insert(cue, Track::new(source));
            }
            BackendCommand::Release { cue } => {
                self.tracks.remove(&cue);
            }
            BackendCommand::Play { cue } => {
                let Some(track) = self.tracks.get_mut(&cue) else {
                    engine.command_failed(cue, "media was never prepared");
                    return;
                };
                if let Some(reason) = track.source.uri.strip_prefix(FAIL_PREFIX) {
                    let reason = if reason.is_empty() {
                        "simulated playback failure".to_string()
                    } else {
                        reason.to_string()
                    };
                    log::warn!("Cue {} failed to play: {}", cue, reason);
                    engine.command_failed(cue, reason);
                    return;
                }
                if track.playing_since.is_none() {
                    log::info!("Playing cue {} ({})", cue, track.source.uri);
                    track.playing_since = Some(now);
                }
            }
            BackendCommand::Pause { cue } => {
                if let Some(track) = self.tracks.get_mut(&cue) {
                    track.position = track.position(now);
                    track.playing_since = None;
                }
            }
            BackendCommand::Stop { cue } => {
                if let Some(track) = self.tracks.get_mut(&cue) {
                    track.position = Duration::ZERO;
                    track.playing_since = None;
                }
            }
            BackendCommand::SetProperty { cue, key, value } => {
                if let Some(track) = self.tracks.get_mut(&cue) {
                    log::trace!("Cue {} {} = {:.3}", cue, key, value);
                    track.properties.insert(key, value);
                }
            }
            BackendCommand::Shutdown => {}
        }
    }

    fn finish_due(&mut self, engine: &EngineHandle) {
        let now = Instant::now();
        let mut ended: Vec<CueId> = self
            .tracks
            .iter()
            .filter(|(_, track)| track.deadline().is_some_and(|deadline| deadline <= now))
            .map(|(cue, _)| *cue)
            .collect();
        ended.sort();

        for cue in ended {
            if let Some(track) = self.tracks.get_mut(&cue) {
                track.position = Duration::ZERO;
                track.playing_since = None;
            }
            log::info!("Cue {} media ended", cue);
            engine.playback_ended(cue);
        }
    }

    fn playing(&self) -> usize {
        self.tracks
            .values()
            .filter(|track| track.playing_since.is_some())
            .count()
    }
}

impl Default for SimulatedMedia {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsyncModule for SimulatedMedia {
    fn name(&self) -> &'static str {
        "simulated-media"
    }

    async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("Initializing simulated media backend");
        self.status
            .insert("status".to_string(), "initialized".to_string());
        Ok(())
    }

    async fn run(
        &mut self,
        mut rx: mpsc::UnboundedReceiver<BackendCommand>,
        engine: EngineHandle,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("Simulated media backend started");
        self.status.insert("status".to_string(), "running".to_string());

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = rx.recv() => match command {
                    Some(BackendCommand::Shutdown) | None => {
                        log::info!("Simulated media backend received shutdown signal");
                        break;
                    }
                    Some(command) => self.handle_command(command, &engine),
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.finish_due(&engine);
                }
            }
        }

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for track in self.tracks.values_mut() {
            track.playing_since = None;
        }
        self.status
            .insert("status".to_string(), "shutdown".to_string());
        log::info!("Simulated media backend shutdown complete");
        Ok(())
    }

    fn status(&self) -> HashMap<String, String> {
        let mut status = self.status.clone();
        status.insert("prepared".to_string(), self.tracks.len().to_string());
        status.insert("playing".to_string(), self.playing().to_string());
        status
    }
}
