use std::sync::Arc;

use parking_lot::Mutex;

use super::traits::Backend;
use crate::cue::{CueId, MediaSource, PropertyKey};

/// One call made on a [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Prepare { cue: CueId, uri: String },
    Release { cue: CueId },
    Play { cue: CueId },
    Pause { cue: CueId },
    Stop { cue: CueId },
    SetProperty { cue: CueId, key: PropertyKey, value: f64 },
}

/// Backend that only remembers what it was asked to do.
///
/// Clones share the same log, so a caller can hand one to the engine and
/// inspect the other. Useful for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    calls: Arc<Mutex<Vec<BackendCall>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    /// Return and clear the recorded calls.
    pub fn take(&self) -> Vec<BackendCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    /// Calls other than property updates, in order.
    pub fn transport(&self) -> Vec<BackendCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| !matches!(call, BackendCall::SetProperty { .. }))
            .cloned()
            .collect()
    }

    /// Every value written to one property, in order.
    pub fn values(&self, cue: CueId, key: &PropertyKey) -> Vec<f64> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BackendCall::SetProperty {
                    cue: c,
                    key: k,
                    value,
                } if *c == cue && k == key => Some(*value),
                _ => None,
            })
            .collect()
    }

    pub fn last_value(&self, cue: CueId, key: &PropertyKey) -> Option<f64> {
        self.values(cue, key).last().copied()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().push(call);
    }
}

impl Backend for RecordingBackend {
    fn play(&mut self, cue: CueId) {
        self.record(BackendCall::Play { cue });
    }

    fn pause(&mut self, cue: CueId) {
        self.record(BackendCall::Pause { cue });
    }

    fn stop(&mut self, cue: CueId) {
        self.record(BackendCall::Stop { cue });
    }

    fn set_property(&mut self, cue: CueId, key: &PropertyKey, value: f64) {
        self.record(BackendCall::SetProperty {
            cue,
            key: key.clone(),
            value,
        });
    }

    fn prepare(&mut self, cue: CueId, source: &MediaSource) {
        self.record(BackendCall::Prepare {
            cue,
            uri: source.uri.clone(),
        });
    }

    fn release(&mut self, cue: CueId) {
        self.record(BackendCall::Release { cue });
    }
}
