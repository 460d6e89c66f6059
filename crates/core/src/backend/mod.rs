pub mod module_host;
pub mod recording;
pub mod simulated;
pub mod traits;

// Re-export for convenience
pub use module_host::{ModuleBackend, ModuleHost};
pub use recording::{BackendCall, RecordingBackend};
pub use simulated::SimulatedMedia;
pub use traits::{AsyncModule, Backend, BackendCommand};
