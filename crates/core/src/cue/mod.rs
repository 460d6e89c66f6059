pub mod cue;
pub mod cue_stack;
pub mod state;

pub use cue::{
    ControlAction, Cue, CueConfig, CueId, CueKind, MediaSource, NextAction, PropertyKey,
    RetriggerPolicy,
};
pub use cue_stack::{CueStack, GroupTargets, GroupTrigger};
pub use state::{CueState, Phase};
