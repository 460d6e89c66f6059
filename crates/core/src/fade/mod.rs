pub mod automation;
pub mod curve;

pub use automation::{Automation, AutomationCompleted, AutomationRunner};
pub use curve::{Breakpoint, FadeCurve, FadeSpec};
