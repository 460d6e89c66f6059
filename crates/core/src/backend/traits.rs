use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::cue::{CueId, MediaSource, PropertyKey};
use crate::engine::EngineHandle;

/// The media capability the engine drives.
///
/// Every call is fire-and-forget: implementations must not block, and report
/// failures and end-of-media later through an [`EngineHandle`].
pub trait Backend: Send {
    fn play(&mut self, cue: CueId);

    fn pause(&mut self, cue: CueId);

    fn stop(&mut self, cue: CueId);

    fn set_property(&mut self, cue: CueId, key: &PropertyKey, value: f64);

    /// Called when a media cue is registered.
    fn prepare(&mut self, _cue: CueId, _source: &MediaSource) {}

    /// Called when a media cue is unregistered.
    fn release(&mut self, _cue: CueId) {}
}

/// Backend calls as messages, for backends that live in their own task.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    Prepare { cue: CueId, source: MediaSource },
    Release { cue: CueId },
    Play { cue: CueId },
    Pause { cue: CueId },
    Stop { cue: CueId },
    SetProperty { cue: CueId, key: PropertyKey, value: f64 },
    Shutdown,
}

/// Trait that all async backend modules must implement
#[async_trait]
pub trait AsyncModule: Send {
    /// Short name used in logs and status output
    fn name(&self) -> &'static str;

    /// Initialize the module (called once before `run`)
    async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Process backend commands until `Shutdown` arrives or the sender is dropped.
    /// Completion and failure reports go back through `engine`.
    async fn run(
        &mut self,
        rx: mpsc::UnboundedReceiver<BackendCommand>,
        engine: EngineHandle,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Shutdown the module gracefully
    async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Get the module's status
    fn status(&self) -> HashMap<String, String>;
}
