use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::cue::{CueConfig, CueId, CueStack};
use crate::engine::Engine;
use crate::error::EngineResult;

/// A show: its cues in running order.
///
/// Shows are built in code or deserialized from JSON; loading one registers
/// every cue with an engine and fills a cue stack in the same order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Show {
    pub name: String,
    pub created_at: SystemTime,
    pub cues: Vec<CueConfig>,
    pub version: String, // Schema version for future compatibility
}

impl Show {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: SystemTime::now(),
            cues: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_cue(mut self, cue: CueConfig) -> Self {
        self.cues.push(cue);
        self
    }

    pub fn add_cue(&mut self, cue: CueConfig) {
        self.cues.push(cue);
    }

    pub fn ids(&self) -> impl Iterator<Item = CueId> + '_ {
        self.cues.iter().map(|cue| cue.id)
    }

    /// Register every cue and build the stack for it.
    ///
    /// Stops at the first cue the engine refuses; cues registered before it
    /// stay registered.
    pub fn load(&self, engine: &mut Engine) -> EngineResult<CueStack> {
        let mut stack = CueStack::new(self.name.clone());
        for cue in &self.cues {
            engine.register(cue.clone())?;
            stack.push(cue.id);
        }
        log::info!("Loaded show '{}' with {} cues", self.name, stack.len());
        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::clock::ManualClock;
    use crate::cue::MediaSource;
    use crate::error::EngineError;

    #[test]
    fn test_load_keeps_running_order() {
        let show = Show::new("Act 1")
            .with_cue(CueConfig::media(3, "Thunder", MediaSource::new("sfx/thunder.wav")))
            .with_cue(CueConfig::media(1, "Rain", MediaSource::new("sfx/rain.wav")));
        let mut engine = Engine::new(Box::new(RecordingBackend::new()), Box::new(ManualClock::new()));

        let stack = show.load(&mut engine).unwrap();

        assert_eq!(stack.name(), "Act 1");
        assert_eq!(stack.entries(), &[CueId(3), CueId(1)]);
        assert_eq!(engine.cue_ids().count(), 2);
    }

    #[test]
    fn test_load_stops_at_duplicate() {
        let show = Show::new("Broken")
            .with_cue(CueConfig::media(1, "A", MediaSource::new("a.wav")))
            .with_cue(CueConfig::media(1, "B", MediaSource::new("b.wav")));
        let mut engine = Engine::new(Box::new(RecordingBackend::new()), Box::new(ManualClock::new()));

        assert!(matches!(show.load(&mut engine), Err(EngineError::DuplicateId(CueId(1)))));
    }

    #[test]
    fn test_show_json_round_trip() {
        let show = Show::new("Tour").with_cue(CueConfig::media(7, "Intro", MediaSource::new("intro.wav")));
        let json = serde_json::to_string(&show).unwrap();
        let back: Show = serde_json::from_str(&json).unwrap();
        assert_eq!(back, show);
    }
}
