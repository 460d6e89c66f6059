pub use backend::{
    AsyncModule, Backend, BackendCall, BackendCommand, ModuleBackend, ModuleHost,
    RecordingBackend, SimulatedMedia,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ConfigManager, ConfigSchema, Settings};
pub use cue::{
    ControlAction, Cue, CueConfig, CueId, CueKind, CueStack, CueState, GroupTargets,
    GroupTrigger, MediaSource, NextAction, Phase, PropertyKey, RetriggerPolicy,
};
pub use engine::{Engine, EngineHandle, EngineOptions, NoCursor, TriggerResolver};
pub use error::{EngineError, EngineResult};
pub use fade::{AutomationRunner, Breakpoint, FadeCurve, FadeSpec};
pub use messages::{
    CueSnapshot, Dispatched, EngineEvent, ShowCommand, ShowEvent, TriggerAction,
    TriggerCommand, TriggerTarget,
};
pub use show::runner::ShowRunner;
pub use show::show::Show;
pub use timecode::timecode::TimeCode;

pub mod backend;
pub mod clock;
mod config;
pub mod cue;
pub mod engine;
mod error;
pub mod fade;
pub mod messages;
mod show;
mod timecode;
