use std::time::Duration;

use thiserror::Error;

use crate::cue::{CueId, CueState};
use crate::messages::TriggerAction;

/// Errors surfaced by the cue engine and the cue stack.
///
/// None of these are fatal: the engine stays dispatchable after any of them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("cue {0} not found")]
    NotFound(CueId),

    #[error("cue {0} is already registered")]
    DuplicateId(CueId),

    #[error("cannot {action:?} cue {id} while {state}")]
    InvalidTransition {
        id: CueId,
        state: CueState,
        action: TriggerAction,
    },

    #[error("cue stack exhausted")]
    StackExhausted,

    #[error("backend failed for cue {id}: {reason}")]
    BackendCommandFailed { id: CueId, reason: String },

    #[error("invalid configuration for cue {id}: {reason}")]
    InvalidConfiguration { id: CueId, reason: String },

    #[error("group stagger of {stagger:?} over {targets} cues overflows the show clock")]
    StaggerOverflow { stagger: Duration, targets: usize },

    /// A cursor-relative command reached an engine with no cue stack to resolve it.
    #[error("trigger target {0} cannot be resolved without a cue stack")]
    UnresolvedTarget(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to write config file: {0}")]
    WriteError(String),
    #[error("Failed to parse config file: {0}")]
    ParseError(String),
    #[error("Failed to serialize config: {0}")]
    SerializeError(String),
    #[error("Config validation errors: {}", .0.join(", "))]
    ValidationError(Vec<String>),
}
