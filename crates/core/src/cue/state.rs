use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The active phases a cue can be paused in and resumed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Waiting,
    FadingIn,
    Running,
    FadingOut,
}

/// Cue lifecycle.
///
/// `Idle → Waiting → FadingIn → Running → FadingOut → Idle`, with `Paused`
/// reachable from every active phase. `Stopped` is transient: it is reported
/// to observers and immediately followed by `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CueState {
    #[default]
    Idle,
    Waiting,
    FadingIn,
    Running,
    FadingOut,
    Paused(Phase),
    Stopped,
}

impl CueState {
    /// Active means registered as live with the engine.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Stopped)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused(_))
    }

    /// The running phase, if the cue is in one and not paused.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Waiting => Some(Phase::Waiting),
            Self::FadingIn => Some(Phase::FadingIn),
            Self::Running => Some(Phase::Running),
            Self::FadingOut => Some(Phase::FadingOut),
            _ => None,
        }
    }
}

impl From<Phase> for CueState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Waiting => CueState::Waiting,
            Phase::FadingIn => CueState::FadingIn,
            Phase::Running => CueState::Running,
            Phase::FadingOut => CueState::FadingOut,
        }
    }
}

impl fmt::Display for CueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CueState::Idle => write!(f, "Idle"),
            CueState::Waiting => write!(f, "Waiting"),
            CueState::FadingIn => write!(f, "FadingIn"),
            CueState::Running => write!(f, "Running"),
            CueState::FadingOut => write!(f, "FadingOut"),
            CueState::Paused(phase) => write!(f, "Paused({:?})", phase),
            CueState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Pausable stopwatch over show time.
///
/// Elapsed time is always derived from timestamps. Pausing records the pause
/// instant; resuming shifts the start forward by the paused span.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Timer {
    started_at: Duration,
    length: Option<Duration>,
    paused_at: Option<Duration>,
}

impl Timer {
    pub fn new(started_at: Duration, length: Duration) -> Self {
        Self {
            started_at,
            length: Some(length),
            paused_at: None,
        }
    }

    pub fn unbounded(started_at: Duration) -> Self {
        Self {
            started_at,
            length: None,
            paused_at: None,
        }
    }

    pub fn length(&self) -> Option<Duration> {
        self.length
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        let end = self.paused_at.unwrap_or(now);
        end.saturating_sub(self.started_at)
    }

    /// Show time at which a bounded timer runs out, if it keeps running.
    pub fn deadline(&self) -> Option<Duration> {
        self.length.map(|length| self.started_at.saturating_add(length))
    }

    pub fn expired(&self, now: Duration) -> bool {
        match self.length {
            Some(length) => !self.is_paused() && self.elapsed(now) >= length,
            None => false,
        }
    }

    pub fn progress(&self, now: Duration) -> Option<f64> {
        let length = self.length?;
        if length.is_zero() {
            return Some(1.0);
        }
        Some((self.elapsed(now).as_secs_f64() / length.as_secs_f64()).min(1.0))
    }

    pub fn pause(&mut self, now: Duration) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    pub fn resume(&mut self, now: Duration) {
        if let Some(paused_at) = self.paused_at.take() {
            self.started_at += now.saturating_sub(paused_at);
        }
    }
}
