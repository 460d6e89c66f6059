use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cue::state::{CueState, Phase, Timer};
use crate::fade::{FadeCurve, FadeSpec};
use crate::messages::TriggerAction;

/// Stable cue identity. Display names may change, ids never do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CueId(pub u64);

impl fmt::Display for CueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CueId {
    fn from(value: u64) -> Self {
        CueId(value)
    }
}

/// Name of a numeric property a cue exposes to automation, e.g. `volume`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyKey(String);

impl PropertyKey {
    pub const VOLUME: &'static str = "volume";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn volume() -> Self {
        Self::new(Self::VOLUME)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PropertyKey {
    fn default() -> Self {
        Self::volume()
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happens when Start reaches a cue that is already active.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RetriggerPolicy {
    /// Stop (through the fade-out, if any) and start again from the top.
    Restart,
    /// Leave the running instance alone.
    #[default]
    Ignore,
    /// Defer the start until the cue is idle again. Handled by the cue stack.
    Queue,
}

/// What the cue stack does after this cue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NextAction {
    #[default]
    DoNothing,
    /// GO the next entry when this cue ends (auto-continue).
    TriggerAfterEnd,
    /// GO the next entry once the post-wait has elapsed (auto-follow).
    TriggerAfterWait,
}

/// Media payload handed to the backend. The engine never looks inside.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaSource {
    pub uri: String,
    /// Known length of the media, used by rehearsal backends.
    #[serde(default)]
    pub duration: Option<Duration>,
}

impl MediaSource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Actions a control cue performs on other cues.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ControlAction {
    StopAll {
        immediate: bool,
    },
    PauseAll,
    ResumeAll,
    /// Automate a property of another cue; the control cue ends with the fade.
    Fade {
        target: CueId,
        #[serde(default)]
        property: PropertyKey,
        to: f64,
        fade: FadeSpec,
    },
}

/// The payload of a cue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CueKind {
    Media { source: MediaSource },
    /// Applies `action` to every child when started, then ends.
    Composite {
        children: Vec<CueId>,
        action: TriggerAction,
    },
    Control(ControlAction),
}

impl CueKind {
    pub fn is_media(&self) -> bool {
        matches!(self, CueKind::Media { .. })
    }
}

fn default_level() -> f64 {
    1.0
}

/// Everything needed to define a cue. This is the serialisable part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CueConfig {
    pub id: CueId,
    pub name: String,
    pub kind: CueKind,
    #[serde(default)]
    pub pre_wait: Duration,
    #[serde(default)]
    pub post_wait: Duration,
    #[serde(default)]
    pub fade_in: Option<FadeSpec>,
    #[serde(default)]
    pub fade_out: Option<FadeSpec>,
    /// Value a fade-in ends at, and the value applied on start without one.
    #[serde(default = "default_level")]
    pub level: f64,
    #[serde(default)]
    pub fade_property: PropertyKey,
    #[serde(default)]
    pub next_action: NextAction,
    #[serde(default)]
    pub retrigger: RetriggerPolicy,
}

impl CueConfig {
    pub fn new(id: impl Into<CueId>, name: impl Into<String>, kind: CueKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            pre_wait: Duration::ZERO,
            post_wait: Duration::ZERO,
            fade_in: None,
            fade_out: None,
            level: default_level(),
            fade_property: PropertyKey::volume(),
            next_action: NextAction::DoNothing,
            retrigger: RetriggerPolicy::default(),
        }
    }

    pub fn media(id: impl Into<CueId>, name: impl Into<String>, source: MediaSource) -> Self {
        Self::new(id, name, CueKind::Media { source })
    }

    pub fn with_pre_wait(mut self, pre_wait: Duration) -> Self {
        self.pre_wait = pre_wait;
        self
    }

    pub fn with_post_wait(mut self, post_wait: Duration) -> Self {
        self.post_wait = post_wait;
        self
    }

    pub fn with_fade_in(mut self, duration: Duration, curve: FadeCurve) -> Self {
        self.fade_in = Some(FadeSpec::new(duration, curve));
        self
    }

    pub fn with_fade_out(mut self, duration: Duration, curve: FadeCurve) -> Self {
        self.fade_out = Some(FadeSpec::new(duration, curve));
        self
    }

    pub fn with_level(mut self, level: f64) -> Self {
        self.level = level;
        self
    }

    pub fn with_next_action(mut self, next_action: NextAction) -> Self {
        self.next_action = next_action;
        self
    }

    pub fn with_retrigger(mut self, retrigger: RetriggerPolicy) -> Self {
        self.retrigger = retrigger;
        self
    }

    /// The auto-continue flag: GO the next cue when this one ends.
    pub fn auto_continue(&self) -> bool {
        self.next_action == NextAction::TriggerAfterEnd
    }

    /// Reject configurations the engine cannot run.
    pub fn validate(&self) -> Result<(), String> {
        if !self.level.is_finite() || self.level < 0.0 {
            return Err(format!("level {} must be a finite, non-negative number", self.level));
        }
        for (label, fade) in [("fade_in", &self.fade_in), ("fade_out", &self.fade_out)] {
            if let Some(fade) = fade {
                fade.curve
                    .validate()
                    .map_err(|reason| format!("{}: {}", label, reason))?;
            }
        }

        match &self.kind {
            CueKind::Media { source } => {
                if source.uri.trim().is_empty() {
                    return Err("media source uri is empty".to_string());
                }
            }
            CueKind::Composite { children, .. } => {
                if children.contains(&self.id) {
                    return Err("composite cue cannot contain itself".to_string());
                }
            }
            CueKind::Control(ControlAction::Fade {
                target, to, fade, ..
            }) => {
                if *target == self.id {
                    return Err("fade control cue cannot target itself".to_string());
                }
                if !to.is_finite() {
                    return Err(format!("fade target value {} is not finite", to));
                }
                fade.curve.validate()?;
            }
            CueKind::Control(_) => {}
        }
        Ok(())
    }
}

/// Why an active cue is on its way back to idle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ending {
    Stopped,
    Natural,
}

/// A registered cue: its configuration plus live state.
#[derive(Clone, Debug)]
pub struct Cue {
    config: CueConfig,
    state: CueState,
    phase: Timer,
    post_wait: Option<Timer>,
    pub(crate) ending: Option<Ending>,
    /// Fade-in override carried through the pre-wait.
    pub(crate) pending_fade_in: Option<FadeSpec>,
    /// Set by a Restart retrigger; consumed when the cue reaches idle.
    pub(crate) restart: Option<Option<FadeSpec>>,
    /// Media ran out while paused; acted on at resume.
    pub(crate) pending_end: bool,
}

impl Cue {
    pub fn new(config: CueConfig) -> Self {
        Self {
            config,
            state: CueState::Idle,
            phase: Timer::unbounded(Duration::ZERO),
            post_wait: None,
            ending: None,
            pending_fade_in: None,
            restart: None,
            pending_end: false,
        }
    }

    pub fn id(&self) -> CueId {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.config.name = name.into();
    }

    pub fn config(&self) -> &CueConfig {
        &self.config
    }

    pub fn state(&self) -> CueState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Time spent in the current phase, excluding time spent paused.
    pub fn elapsed(&self, now: Duration) -> Duration {
        self.phase.elapsed(now)
    }

    /// Fraction of the current phase completed, for bounded phases.
    pub fn progress(&self, now: Duration) -> Option<f64> {
        self.phase.progress(now)
    }

    pub(crate) fn phase_timer(&self) -> &Timer {
        &self.phase
    }

    pub(crate) fn post_wait_timer(&self) -> Option<&Timer> {
        self.post_wait.as_ref()
    }

    /// Move to a new active phase or to idle, restarting the phase clock at
    /// `at`. Returns the previous state. A running post-wait survives a
    /// natural end; stops clear it explicitly.
    pub(crate) fn enter(&mut self, state: CueState, at: Duration, length: Option<Duration>) -> CueState {
        let old = self.state;
        self.state = state;
        self.phase = match length {
            Some(length) => Timer::new(at, length),
            None => Timer::unbounded(at),
        };
        if state == CueState::Idle {
            self.ending = None;
            self.pending_fade_in = None;
            self.pending_end = false;
        }
        old
    }

    pub(crate) fn start_post_wait(&mut self, at: Duration) {
        self.post_wait = Some(Timer::new(at, self.config.post_wait));
    }

    pub(crate) fn clear_post_wait(&mut self) {
        self.post_wait = None;
    }

    /// Freeze the phase and post-wait clocks. Returns the phase to resume.
    pub(crate) fn pause(&mut self, now: Duration) -> Option<Phase> {
        let phase = self.state.phase()?;
        self.state = CueState::Paused(phase);
        self.phase.pause(now);
        if let Some(post_wait) = self.post_wait.as_mut() {
            post_wait.pause(now);
        }
        Some(phase)
    }

    pub(crate) fn resume(&mut self, now: Duration) -> Option<Phase> {
        let CueState::Paused(phase) = self.state else {
            return None;
        };
        self.state = phase.into();
        self.phase.resume(now);
        if let Some(post_wait) = self.post_wait.as_mut() {
            post_wait.resume(now);
        }
        Some(phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_cue() -> CueConfig {
        CueConfig::media(1, "Song", MediaSource::new("file:///song.wav"))
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(media_cue().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(media_cue().with_level(-0.5).validate().is_err());
        assert!(media_cue().with_level(f64::NAN).validate().is_err());

        let empty = CueConfig::media(2, "Empty", MediaSource::new("  "));
        assert!(empty.validate().is_err());

        let recursive = CueConfig::new(
            3,
            "Group",
            CueKind::Composite {
                children: vec![CueId(1), CueId(3)],
                action: TriggerAction::Start,
            },
        );
        assert!(recursive.validate().is_err());

        let self_fade = CueConfig::new(
            4,
            "Dip",
            CueKind::Control(ControlAction::Fade {
                target: CueId(4),
                property: PropertyKey::volume(),
                to: 0.0,
                fade: FadeSpec::linear(Duration::from_secs(1)),
            }),
        );
        assert!(self_fade.validate().is_err());
    }

    #[test]
    fn test_auto_continue_flag() {
        assert!(!media_cue().auto_continue());
        assert!(media_cue()
            .with_next_action(NextAction::TriggerAfterEnd)
            .auto_continue());
        assert!(!media_cue()
            .with_next_action(NextAction::TriggerAfterWait)
            .auto_continue());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = media_cue()
            .with_pre_wait(Duration::from_millis(1_250))
            .with_post_wait(Duration::from_micros(333_333))
            .with_fade_in(Duration::from_secs_f64(2.75), FadeCurve::Logarithmic)
            .with_fade_out(Duration::from_nanos(999_999_999), FadeCurve::SCurve)
            .with_level(0.8)
            .with_next_action(NextAction::TriggerAfterEnd)
            .with_retrigger(RetriggerPolicy::Restart);

        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: CueConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let json = r#"{"id": 7, "name": "Bare", "kind": {"Media": {"source": {"uri": "a.wav"}}}}"#;
        let config: CueConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.id, CueId(7));
        assert_eq!(config.level, 1.0);
        assert_eq!(config.fade_property, PropertyKey::volume());
        assert_eq!(config.retrigger, RetriggerPolicy::Ignore);
        assert_eq!(config.pre_wait, Duration::ZERO);
    }

    #[test]
    fn test_pause_and_resume_keep_phase() {
        let mut cue = Cue::new(media_cue());
        cue.enter(CueState::Running, Duration::from_secs(1), None);
        assert_eq!(cue.pause(Duration::from_secs(3)), Some(Phase::Running));
        assert_eq!(cue.state(), CueState::Paused(Phase::Running));
        assert_eq!(cue.elapsed(Duration::from_secs(10)), Duration::from_secs(2));

        assert_eq!(cue.resume(Duration::from_secs(10)), Some(Phase::Running));
        assert_eq!(cue.state(), CueState::Running);
        assert_eq!(cue.elapsed(Duration::from_secs(11)), Duration::from_secs(3));
    }
}
