pub mod engine;
mod transitions;

pub use engine::{Engine, EngineHandle, EngineOptions, NoCursor, TriggerResolver};
