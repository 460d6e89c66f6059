use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cue::{CueConfig, CueId, CueState, GroupTrigger};
use crate::error::EngineError;
use crate::fade::FadeSpec;

/// Operator-level actions a trigger can apply to a cue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerAction {
    Start,
    /// Stop, running the fade-out if one is configured.
    Stop,
    /// Stop right now, skipping any fade-out.
    StopImmediate,
    Pause,
    Resume,
    /// Start when idle, resume when paused, stop otherwise.
    Toggle,
}

/// Which cue a trigger addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerTarget {
    Cue(CueId),
    /// The cue at the cue stack cursor. Start at the cursor is a GO.
    Cursor,
}

impl fmt::Display for TriggerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerTarget::Cue(id) => write!(f, "cue {}", id),
            TriggerTarget::Cursor => write!(f, "cursor"),
        }
    }
}

/// A single trigger, consumed synchronously by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerCommand {
    pub target: TriggerTarget,
    pub action: TriggerAction,
    /// Replaces the configured fade-in (Start) or fade-out (Stop).
    #[serde(default)]
    pub fade: Option<FadeSpec>,
}

impl TriggerCommand {
    pub fn new(id: CueId, action: TriggerAction) -> Self {
        Self {
            target: TriggerTarget::Cue(id),
            action,
            fade: None,
        }
    }

    pub fn start(id: CueId) -> Self {
        Self::new(id, TriggerAction::Start)
    }

    pub fn stop(id: CueId) -> Self {
        Self::new(id, TriggerAction::Stop)
    }

    pub fn stop_immediate(id: CueId) -> Self {
        Self::new(id, TriggerAction::StopImmediate)
    }

    pub fn pause(id: CueId) -> Self {
        Self::new(id, TriggerAction::Pause)
    }

    pub fn resume(id: CueId) -> Self {
        Self::new(id, TriggerAction::Resume)
    }

    /// Start the cue at the stack cursor and advance the cursor.
    pub fn go() -> Self {
        Self {
            target: TriggerTarget::Cursor,
            action: TriggerAction::Start,
            fade: None,
        }
    }

    pub fn with_fade(mut self, fade: FadeSpec) -> Self {
        self.fade = Some(fade);
        self
    }
}

/// Asynchronous reports from the backend.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendEvent {
    /// The media of a cue reached its natural end.
    PlaybackEnded(CueId),
    /// A fire-and-forget command could not be carried out.
    CommandFailed { cue: CueId, reason: String },
}

/// Everything that enters the engine's serialized input queue.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineInput {
    Trigger(TriggerCommand),
    Backend(BackendEvent),
}

/// How a dispatched command was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatched {
    Applied,
    /// Allowed but intentionally did nothing, e.g. an `Ignore` retrigger.
    Ignored,
    /// A `Queue` retrigger, left for the cue stack to replay.
    Queued,
}

/// Read-only view of a live cue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CueSnapshot {
    pub id: CueId,
    pub name: String,
    pub state: CueState,
    /// Time spent in the current phase, excluding pauses.
    pub elapsed: Duration,
    /// Fraction of the current phase, when the phase has a length.
    pub progress: Option<f64>,
    /// Last value written to the cue's fade property.
    pub level: Option<f64>,
}

/// Observation events published by the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// `progress` is how far the cue was through the phase it left.
    CueStateChanged {
        id: CueId,
        old: CueState,
        new: CueState,
        progress: Option<f64>,
    },
    /// The cue finished on its own rather than being stopped.
    CueEnded { id: CueId },
    PostWaitElapsed { id: CueId },
    /// A Start hit an active cue with the `Queue` retrigger policy.
    RetriggerQueued { id: CueId },
    CueFailed { id: CueId, reason: String },
    /// A queued command could not be applied.
    CommandRejected {
        command: TriggerCommand,
        error: EngineError,
    },
}

/// Commands sent from an operator surface to the show runner.
#[derive(Debug, Clone)]
pub enum ShowCommand {
    Go,
    GoTo { index: usize },
    Trigger(TriggerCommand),
    Group(GroupTrigger),
    Register(CueConfig),
    Unregister(CueId),
    QueryActiveCues,
    QueryCursor,
    Shutdown,
}

/// Events sent from the show runner to observers.
#[derive(Debug, Clone)]
pub enum ShowEvent {
    Engine(EngineEvent),
    ActiveCues { cues: Vec<CueSnapshot> },
    Cursor { index: usize, next: Option<CueId> },
    Registered { id: CueId },
    Unregistered { id: CueId },
    Error { message: String },
    ShutdownComplete,
}
