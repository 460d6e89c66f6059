use std::collections::HashSet;
use std::time::Duration;

use super::engine::Engine;
use crate::cue::cue::Ending;
use crate::cue::{
    ControlAction, Cue, CueId, CueKind, CueState, NextAction, Phase, RetriggerPolicy,
};
use crate::error::{EngineError, EngineResult};
use crate::fade::{Automation, AutomationCompleted, FadeSpec};
use crate::messages::{Dispatched, EngineEvent, TriggerAction, TriggerCommand};

impl Engine {
    pub(super) fn apply_to(
        &mut self,
        id: CueId,
        action: TriggerAction,
        fade: Option<FadeSpec>,
    ) -> EngineResult<Dispatched> {
        let state = self.state(id).ok_or(EngineError::NotFound(id))?;
        match action {
            TriggerAction::Start => self.start(id, fade),
            TriggerAction::Stop => self.stop(id, fade, false),
            TriggerAction::StopImmediate => self.stop(id, None, true),
            TriggerAction::Pause => self.pause(id),
            TriggerAction::Resume => self.resume(id),
            TriggerAction::Toggle => match state {
                CueState::Idle => self.start(id, fade),
                CueState::Paused(_) => self.resume(id),
                _ => self.stop(id, fade, false),
            },
        }
    }

    fn start(&mut self, id: CueId, fade: Option<FadeSpec>) -> EngineResult<Dispatched> {
        if self.cascade.contains(&id) {
            log::warn!("Cue {} already fired in this cascade", id);
            return Ok(Dispatched::Ignored);
        }
        let cue = self.cues.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let state = cue.state();
        if state == CueState::Idle {
            self.begin(id, fade);
            return Ok(Dispatched::Applied);
        }

        let policy = cue.config().retrigger;
        match policy {
            RetriggerPolicy::Ignore => {
                log::debug!("Cue {} already {}, start ignored", id, state);
                Ok(Dispatched::Ignored)
            }
            RetriggerPolicy::Queue => {
                self.emit(EngineEvent::RetriggerQueued { id });
                Ok(Dispatched::Queued)
            }
            RetriggerPolicy::Restart => {
                cue.restart = Some(fade);
                if state == CueState::FadingOut {
                    // Restarts when the fade-out lands
                    return Ok(Dispatched::Applied);
                }
                self.stop(id, None, false)
            }
        }
    }

    /// Leave Idle: into the pre-wait, or straight into the cue's action.
    pub(super) fn begin(&mut self, id: CueId, fade: Option<FadeSpec>) {
        let now = self.now;
        let Some(cue) = self.cues.get_mut(&id) else {
            return;
        };
        let pre_wait = cue.config().pre_wait;
        if pre_wait.is_zero() {
            self.begin_action(id, fade, now);
        } else {
            cue.pending_fade_in = fade;
            self.enter(id, CueState::Waiting, now, Some(pre_wait));
        }
    }

    /// Run the cue's action as of `at`, which is the end of the pre-wait and
    /// may be slightly earlier than the current tick.
    fn begin_action(&mut self, id: CueId, fade: Option<FadeSpec>, at: Duration) {
        let Some(cue) = self.cues.get_mut(&id) else {
            return;
        };
        let config = cue.config().clone();
        if !config.post_wait.is_zero() || config.next_action == NextAction::TriggerAfterWait {
            cue.start_post_wait(at);
        }

        match config.kind {
            CueKind::Media { .. } => match fade.or(config.fade_in) {
                Some(fade) => {
                    self.enter(id, CueState::FadingIn, at, Some(fade.duration));
                    let automation = Automation::new(
                        id,
                        config.fade_property,
                        id,
                        0.0,
                        config.level,
                        fade,
                        at,
                    );
                    self.start_automation(automation);
                    self.backend.play(id);
                }
                None => {
                    self.runner
                        .apply(self.backend.as_mut(), id, &config.fade_property, config.level);
                    self.enter(id, CueState::Running, at, None);
                    self.backend.play(id);
                }
            },
            CueKind::Composite { children, action } => {
                self.enter(id, CueState::Running, at, None);
                self.cascade.insert(id);
                self.followups.extend(
                    children
                        .into_iter()
                        .map(|child| TriggerCommand::new(child, action)),
                );
                self.end_naturally(id);
            }
            CueKind::Control(ControlAction::Fade {
                target,
                property,
                to,
                fade,
            }) => {
                let Some(target_cue) = self.cues.get(&target) else {
                    self.enter(id, CueState::Running, at, None);
                    self.fail(id, format!("fade target cue {} is not registered", target));
                    return;
                };
                let from = self
                    .runner
                    .level(target, &property)
                    .unwrap_or(target_cue.config().level);
                self.enter(id, CueState::Running, at, Some(fade.duration));
                self.start_automation(Automation::new(target, property, id, from, to, fade, at));
            }
            CueKind::Control(action) => {
                self.enter(id, CueState::Running, at, None);
                self.cascade.insert(id);
                let commands = self.control_commands(id, &action);
                self.followups.extend(commands);
                self.end_naturally(id);
            }
        }
    }

    /// Commands a StopAll, PauseAll or ResumeAll cue issues, in id order.
    fn control_commands(&self, id: CueId, action: &ControlAction) -> Vec<TriggerCommand> {
        let others = self.cues.values().filter(|cue| cue.id() != id);
        match action {
            ControlAction::StopAll { immediate } => others
                .filter(|cue| cue.is_active())
                .map(|cue| {
                    if *immediate {
                        TriggerCommand::stop_immediate(cue.id())
                    } else {
                        TriggerCommand::stop(cue.id())
                    }
                })
                .collect(),
            ControlAction::PauseAll => others
                .filter(|cue| cue.state().phase().is_some())
                .map(|cue| TriggerCommand::pause(cue.id()))
                .collect(),
            ControlAction::ResumeAll => others
                .filter(|cue| cue.state().is_paused())
                .map(|cue| TriggerCommand::resume(cue.id()))
                .collect(),
            ControlAction::Fade { .. } => Vec::new(),
        }
    }

    fn stop(&mut self, id: CueId, fade: Option<FadeSpec>, immediate: bool) -> EngineResult<Dispatched> {
        let cue = self.cues.get(&id).ok_or(EngineError::NotFound(id))?;
        let state = cue.state();
        match state {
            CueState::Idle | CueState::Stopped => Err(EngineError::InvalidTransition {
                id,
                state,
                action: if immediate {
                    TriggerAction::StopImmediate
                } else {
                    TriggerAction::Stop
                },
            }),
            CueState::Waiting | CueState::Paused(_) => {
                self.stop_now(id);
                Ok(Dispatched::Applied)
            }
            CueState::FadingOut => {
                if immediate || self.options.stop_escalates_fade_out {
                    self.stop_now(id);
                    Ok(Dispatched::Applied)
                } else {
                    Ok(Dispatched::Ignored)
                }
            }
            CueState::FadingIn | CueState::Running => {
                let fade = if immediate {
                    None
                } else {
                    fade.or_else(|| cue.config().fade_out.clone())
                };
                match fade {
                    Some(fade) if cue.config().kind.is_media() => {
                        if let Some(cue) = self.cues.get_mut(&id) {
                            cue.clear_post_wait();
                        }
                        self.fade_out(id, fade, Ending::Stopped);
                    }
                    _ => self.stop_now(id),
                }
                Ok(Dispatched::Applied)
            }
        }
    }

    /// Fade the cue's property from wherever it holds down to zero.
    fn fade_out(&mut self, id: CueId, fade: FadeSpec, ending: Ending) {
        self.cancel_automations(id);
        let now = self.now;
        let Some(cue) = self.cues.get_mut(&id) else {
            return;
        };
        cue.ending = Some(ending);
        let property = cue.config().fade_property.clone();
        let from = self
            .runner
            .level(id, &property)
            .unwrap_or(cue.config().level);

        self.enter(id, CueState::FadingOut, now, Some(fade.duration));
        self.start_automation(Automation::new(id, property, id, from, 0.0, fade, now));
    }

    /// Stop without a fade: `Stopped`, then straight back to `Idle`.
    pub(super) fn stop_now(&mut self, id: CueId) {
        self.cancel_automations(id);
        let now = self.now;
        let Some(cue) = self.cues.get_mut(&id) else {
            return;
        };
        cue.clear_post_wait();
        let was_playing = !matches!(
            cue.state(),
            CueState::Waiting | CueState::Paused(Phase::Waiting)
        );
        if cue.config().kind.is_media() && was_playing {
            self.backend.stop(id);
        }

        self.enter(id, CueState::Stopped, now, None);
        self.enter(id, CueState::Idle, now, None);
        self.after_idle(id);
    }

    /// The cue finished by itself: run the fade-out if there is one,
    /// otherwise settle to Idle and report the end.
    fn end_naturally(&mut self, id: CueId) {
        let Some(cue) = self.cues.get(&id) else {
            return;
        };
        let is_media = cue.config().kind.is_media();
        if is_media {
            if let Some(fade) = cue.config().fade_out.clone() {
                self.fade_out(id, fade, Ending::Natural);
                return;
            }
        }

        self.cancel_automations(id);
        if is_media {
            self.backend.stop(id);
        }
        let now = self.now;
        self.enter(id, CueState::Idle, now, None);
        self.emit(EngineEvent::CueEnded { id });
        self.after_idle(id);
    }

    /// The fade-out landed.
    fn finish_fade_out(&mut self, id: CueId) {
        let Some(cue) = self.cues.get(&id) else {
            return;
        };
        let ending = cue.ending.unwrap_or(Ending::Natural);
        if cue.config().kind.is_media() {
            self.backend.stop(id);
        }

        let now = self.now;
        match ending {
            Ending::Stopped => {
                self.enter(id, CueState::Stopped, now, None);
                self.enter(id, CueState::Idle, now, None);
            }
            Ending::Natural => {
                self.enter(id, CueState::Idle, now, None);
                self.emit(EngineEvent::CueEnded { id });
            }
        }
        self.after_idle(id);
    }

    /// Honour a pending Restart once the cue is back at Idle.
    fn after_idle(&mut self, id: CueId) {
        let restart = self.cues.get_mut(&id).and_then(|cue| cue.restart.take());
        if let Some(fade) = restart {
            log::debug!("Restarting cue {}", id);
            self.begin(id, fade);
        }
    }

    fn fail(&mut self, id: CueId, reason: String) {
        self.cancel_automations(id);
        let now = self.now;
        let Some(cue) = self.cues.get_mut(&id) else {
            return;
        };
        cue.clear_post_wait();
        cue.restart = None;
        let active = cue.is_active();
        // Observers see the failure before the idle transition
        self.emit(EngineEvent::CueFailed { id, reason });
        if active {
            self.enter(id, CueState::Idle, now, None);
        }
    }

    fn pause(&mut self, id: CueId) -> EngineResult<Dispatched> {
        let now = self.now;
        let cue = self.cues.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let old = cue.state();
        let progress = cue.progress(now);
        let Some(phase) = cue.pause(now) else {
            return Err(EngineError::InvalidTransition {
                id,
                state: old,
                action: TriggerAction::Pause,
            });
        };
        let is_media = cue.config().kind.is_media();

        self.pause_automations(id, now);
        if is_media && phase != Phase::Waiting {
            self.backend.pause(id);
        }
        self.emit(EngineEvent::CueStateChanged {
            id,
            old,
            new: CueState::Paused(phase),
            progress,
        });
        Ok(Dispatched::Applied)
    }

    fn resume(&mut self, id: CueId) -> EngineResult<Dispatched> {
        let now = self.now;
        let cue = self.cues.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let old = cue.state();
        let progress = cue.progress(now);
        let Some(phase) = cue.resume(now) else {
            return Err(EngineError::InvalidTransition {
                id,
                state: old,
                action: TriggerAction::Resume,
            });
        };
        let is_media = cue.config().kind.is_media();
        let property = cue.config().fade_property.clone();
        let ended = std::mem::take(&mut cue.pending_end);

        self.resume_automations(id, now);
        if is_media && phase != Phase::Waiting && !ended {
            self.backend.play(id);
        }
        self.emit(EngineEvent::CueStateChanged {
            id,
            old,
            new: phase.into(),
            progress,
        });

        if ended {
            log::debug!("Cue {} ended while paused", id);
            match phase {
                Phase::FadingIn | Phase::Running => self.end_naturally(id),
                Phase::FadingOut => self.finish_fade_out(id),
                Phase::Waiting => {}
            }
            return Ok(Dispatched::Applied);
        }

        // A fade replaced while paused leaves nothing to complete the phase
        if self.runner.get(id, &property).is_none() {
            match phase {
                Phase::FadingIn => self.enter(id, CueState::Running, now, None),
                Phase::FadingOut => self.finish_fade_out(id),
                _ => {}
            }
        }
        Ok(Dispatched::Applied)
    }

    pub(super) fn on_playback_ended(&mut self, id: CueId) {
        let Some(state) = self.state(id) else {
            log::warn!("Playback ended for unknown cue {}", id);
            return;
        };
        match state {
            CueState::FadingIn | CueState::Running => self.end_naturally(id),
            CueState::FadingOut => self.finish_fade_out(id),
            CueState::Paused(phase) if phase != Phase::Waiting => {
                if let Some(cue) = self.cues.get_mut(&id) {
                    cue.pending_end = true;
                }
            }
            _ => log::debug!("Ignoring playback end for cue {} while {}", id, state),
        }
    }

    pub(super) fn on_command_failed(&mut self, id: CueId, reason: String) {
        if !self.cues.contains_key(&id) {
            log::warn!("Backend failure for unknown cue {}: {}", id, reason);
            return;
        }
        let reason = EngineError::BackendCommandFailed { id, reason }.to_string();
        self.fail(id, reason);
    }

    pub(super) fn on_automation_completed(&mut self, done: AutomationCompleted) {
        if done.owner != done.cue {
            // A control fade ends with its automation
            if self.state(done.owner) == Some(CueState::Running) {
                self.end_naturally(done.owner);
            }
            return;
        }
        let now = self.now;
        match self.state(done.owner) {
            Some(CueState::FadingIn) => self.enter(done.owner, CueState::Running, now, None),
            Some(CueState::FadingOut) => self.finish_fade_out(done.owner),
            _ => {}
        }
    }

    /// Fire pre-waits and post-waits that ran out by now.
    pub(super) fn fire_timers(&mut self) {
        let now = self.now;
        let waits: Vec<(CueId, Duration)> = self
            .cues
            .values()
            .filter(|cue| cue.state() == CueState::Waiting)
            .filter(|cue| cue.phase_timer().expired(now))
            .filter_map(|cue| cue.phase_timer().deadline().map(|at| (cue.id(), at)))
            .collect();
        for (id, at) in waits {
            let fade = self
                .cues
                .get_mut(&id)
                .and_then(|cue| cue.pending_fade_in.take());
            self.begin_action(id, fade, at.min(now));
        }

        let post_waits: Vec<CueId> = self
            .cues
            .values()
            .filter(|cue| cue.post_wait_timer().is_some_and(|timer| timer.expired(now)))
            .map(|cue| cue.id())
            .collect();
        for id in post_waits {
            if let Some(cue) = self.cues.get_mut(&id) {
                cue.clear_post_wait();
            }
            self.emit(EngineEvent::PostWaitElapsed { id });
        }
    }

    /// Register an automation. A fade it replaces is wrapped up for its owner.
    fn start_automation(&mut self, automation: Automation) {
        let owner = automation.owner;
        let target = automation.cue;
        if let Some(replaced) = self.runner.start(self.backend.as_mut(), automation) {
            if replaced.owner != owner {
                self.release_owner(replaced);
            }
        }
        // A fade aimed at a paused cue waits for it
        if self.is_paused(target) {
            self.runner.pause_cue(target, self.now);
        }
    }

    fn is_paused(&self, id: CueId) -> bool {
        self.state(id).is_some_and(|state| state.is_paused())
    }

    /// Freeze every fade on `id` or run by it, including control fades
    /// aimed at it.
    fn pause_automations(&mut self, id: CueId, now: Duration) {
        self.runner.pause_cue(id, now);
    }

    fn resume_automations(&mut self, id: CueId, now: Duration) {
        let paused: HashSet<CueId> = self
            .cues
            .values()
            .filter(|cue| cue.state().is_paused())
            .map(Cue::id)
            .collect();
        self.runner.resume_cue(id, now, |cue| paused.contains(&cue));
    }

    /// Cancel everything that drives this cue or belongs to it.
    fn cancel_automations(&mut self, id: CueId) {
        for cancelled in self.runner.cancel_cue(id) {
            if cancelled.owner != id {
                self.release_owner(cancelled);
            }
        }
    }

    /// An automation was taken away from its owner before it completed.
    fn release_owner(&mut self, automation: Automation) {
        let owner = automation.owner;
        let now = self.now;
        if owner != automation.cue {
            if self.state(owner).is_some_and(|state| state.is_active()) {
                self.end_naturally(owner);
            }
            return;
        }
        match self.state(owner) {
            Some(CueState::FadingIn) => self.enter(owner, CueState::Running, now, None),
            Some(CueState::FadingOut) => self.finish_fade_out(owner),
            _ => {}
        }
    }

    /// Move a cue into `state` and report the transition.
    pub(super) fn enter(&mut self, id: CueId, state: CueState, at: Duration, length: Option<Duration>) {
        let now = self.now;
        let Some(cue) = self.cues.get_mut(&id) else {
            return;
        };
        let progress = cue.progress(now);
        let old = cue.enter(state, at, length);
        self.emit(EngineEvent::CueStateChanged {
            id,
            old,
            new: state,
            progress,
        });
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};
    use crate::clock::ManualClock;
    use crate::cue::{CueConfig, MediaSource, PropertyKey};
    use crate::fade::FadeCurve;

    fn setup() -> (Engine, ManualClock, RecordingBackend) {
        let clock = ManualClock::new();
        let backend = RecordingBackend::new();
        let engine = Engine::new(Box::new(backend.clone()), Box::new(clock.clone()));
        (engine, clock, backend)
    }

    fn media(id: u64) -> CueConfig {
        CueConfig::media(id, format!("Cue {}", id), MediaSource::new(format!("cue{}.wav", id)))
    }

    fn volume(backend: &RecordingBackend, id: u64) -> f64 {
        backend
            .last_value(CueId(id), &PropertyKey::volume())
            .unwrap_or(f64::NAN)
    }

    fn states(events: &[EngineEvent], id: u64) -> Vec<CueState> {
        events
            .iter()
            .filter_map(|event| match event {
                EngineEvent::CueStateChanged { id: cue, new, .. } if *cue == CueId(id) => Some(*new),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_without_fade_runs_at_level() {
        let (mut engine, _clock, backend) = setup();
        engine.register(media(1).with_level(0.8)).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();

        assert_eq!(engine.state(CueId(1)), Some(CueState::Running));
        assert_eq!(volume(&backend, 1), 0.8);
        assert!(backend.transport().contains(&BackendCall::Play { cue: CueId(1) }));
    }

    #[test]
    fn test_pre_wait_then_fade_in() {
        let (mut engine, clock, backend) = setup();
        let config = media(1)
            .with_pre_wait(Duration::from_secs(2))
            .with_fade_in(Duration::from_secs(4), FadeCurve::Linear);
        engine.register(config).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        assert_eq!(engine.state(CueId(1)), Some(CueState::Waiting));
        assert!(backend.transport().iter().all(|call| !matches!(call, BackendCall::Play { .. })));

        // Pre-wait ended at 2s; the fade is timed from there, not from the tick
        clock.set(Duration::from_secs(3));
        engine.tick();
        assert_eq!(engine.state(CueId(1)), Some(CueState::FadingIn));
        assert_relative_eq!(volume(&backend, 1), 0.25, epsilon = 1e-9);

        clock.set(Duration::from_secs(6));
        let events = engine.tick();
        assert_eq!(states(&events, 1), vec![CueState::Running]);
        assert_eq!(volume(&backend, 1), 1.0);
    }

    #[test]
    fn test_stop_with_fade_out_passes_through_stopped() {
        let (mut engine, clock, backend) = setup();
        engine
            .register(media(1).with_fade_out(Duration::from_secs(2), FadeCurve::Linear))
            .unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.drain_events();

        engine.dispatch(TriggerCommand::stop(CueId(1))).unwrap();
        assert_eq!(engine.state(CueId(1)), Some(CueState::FadingOut));

        clock.advance(Duration::from_secs(1));
        engine.tick();
        assert_relative_eq!(volume(&backend, 1), 0.5, epsilon = 1e-9);

        clock.advance(Duration::from_secs(1));
        let events = engine.tick();
        assert_eq!(states(&events, 1), vec![CueState::Stopped, CueState::Idle]);
        assert_eq!(volume(&backend, 1), 0.0);
        assert!(!events.iter().any(|event| matches!(event, EngineEvent::CueEnded { .. })));
    }

    #[test]
    fn test_second_stop_escalates_fade_out() {
        let (mut engine, _clock, _backend) = setup();
        engine
            .register(media(1).with_fade_out(Duration::from_secs(5), FadeCurve::Linear))
            .unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::stop(CueId(1))).unwrap();
        assert_eq!(
            engine.dispatch(TriggerCommand::stop(CueId(1))),
            Ok(Dispatched::Applied)
        );
        assert_eq!(engine.state(CueId(1)), Some(CueState::Idle));
        assert!(engine.automations().is_empty());
    }

    #[test]
    fn test_invalid_transitions_are_no_ops() {
        let (mut engine, _clock, backend) = setup();
        engine.register(media(1)).unwrap();

        let err = engine.dispatch(TriggerCommand::resume(CueId(1))).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert!(engine.dispatch(TriggerCommand::stop(CueId(1))).is_err());
        assert_eq!(
            engine.dispatch(TriggerCommand::start(CueId(9))),
            Err(EngineError::NotFound(CueId(9)))
        );
        assert_eq!(engine.state(CueId(1)), Some(CueState::Idle));
        assert!(backend.transport().iter().all(|call| matches!(call, BackendCall::Prepare { .. })));
    }

    #[test]
    fn test_toggle_cycles() {
        let (mut engine, _clock, _backend) = setup();
        engine.register(media(1)).unwrap();
        let toggle = TriggerCommand::new(CueId(1), TriggerAction::Toggle);

        engine.dispatch(toggle.clone()).unwrap();
        assert_eq!(engine.state(CueId(1)), Some(CueState::Running));
        engine.dispatch(TriggerCommand::pause(CueId(1))).unwrap();
        engine.dispatch(toggle.clone()).unwrap();
        assert_eq!(engine.state(CueId(1)), Some(CueState::Running));
        engine.dispatch(toggle).unwrap();
        assert_eq!(engine.state(CueId(1)), Some(CueState::Idle));
    }

    #[test]
    fn test_natural_end_reports_cue_ended() {
        let (mut engine, _clock, _backend) = setup();
        engine.register(media(1)).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.drain_events();

        engine.handle().playback_ended(CueId(1));
        let events = engine.tick();
        assert_eq!(states(&events, 1), vec![CueState::Idle]);
        assert!(events.contains(&EngineEvent::CueEnded { id: CueId(1) }));
    }

    #[test]
    fn test_backend_failure_idles_cue_and_reports() {
        let (mut engine, clock, _backend) = setup();
        engine
            .register(media(1).with_fade_in(Duration::from_secs(3), FadeCurve::Linear))
            .unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();

        engine.handle().command_failed(CueId(1), "device unplugged");
        clock.advance(Duration::from_secs(1));
        let events = engine.tick();

        assert_eq!(engine.state(CueId(1)), Some(CueState::Idle));
        assert!(engine.automations().is_empty());
        assert!(events.iter().any(|event| matches!(
            event,
            EngineEvent::CueFailed { id, reason } if *id == CueId(1) && reason.contains("device unplugged")
        )));
        let failed = events
            .iter()
            .position(|event| matches!(event, EngineEvent::CueFailed { .. }));
        let idle = events.iter().position(|event| {
            matches!(event, EngineEvent::CueStateChanged { new: CueState::Idle, .. })
        });
        assert!(failed < idle);

        // Still dispatchable
        assert!(engine.dispatch(TriggerCommand::start(CueId(1))).is_ok());
    }

    #[test]
    fn test_composite_starts_children_then_ends() {
        let (mut engine, _clock, _backend) = setup();
        engine.register(media(1)).unwrap();
        engine.register(media(2)).unwrap();
        engine
            .register(CueConfig::new(
                10,
                "Both",
                CueKind::Composite {
                    children: vec![CueId(1), CueId(2)],
                    action: TriggerAction::Start,
                },
            ))
            .unwrap();

        engine.dispatch(TriggerCommand::start(CueId(10))).unwrap();
        assert_eq!(engine.state(CueId(1)), Some(CueState::Running));
        assert_eq!(engine.state(CueId(2)), Some(CueState::Running));
        assert_eq!(engine.state(CueId(10)), Some(CueState::Idle));
        assert!(engine
            .drain_events()
            .contains(&EngineEvent::CueEnded { id: CueId(10) }));
    }

    #[test]
    fn test_mutually_nested_composites_fire_once() {
        let (mut engine, _clock, _backend) = setup();
        engine.register(media(1)).unwrap();
        for (id, other) in [(10, 11), (11, 10)] {
            engine
                .register(CueConfig::new(
                    id,
                    "Loop",
                    CueKind::Composite {
                        children: vec![CueId(1), CueId(other)],
                        action: TriggerAction::Start,
                    },
                ))
                .unwrap();
        }

        engine.dispatch(TriggerCommand::start(CueId(10))).unwrap();
        let ended = engine
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, EngineEvent::CueEnded { .. }))
            .count();
        assert_eq!(ended, 2);
        assert_eq!(engine.state(CueId(1)), Some(CueState::Running));
    }

    #[test]
    fn test_fade_control_cue_drives_target() {
        let (mut engine, clock, backend) = setup();
        engine.register(media(1)).unwrap();
        engine
            .register(CueConfig::new(
                2,
                "Dip",
                CueKind::Control(ControlAction::Fade {
                    target: CueId(1),
                    property: PropertyKey::volume(),
                    to: 0.2,
                    fade: FadeSpec::linear(Duration::from_secs(2)),
                }),
            ))
            .unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(2))).unwrap();

        clock.advance(Duration::from_secs(1));
        engine.tick();
        assert_relative_eq!(volume(&backend, 1), 0.6, epsilon = 1e-9);
        assert_eq!(engine.state(CueId(2)), Some(CueState::Running));

        clock.advance(Duration::from_secs(1));
        let events = engine.tick();
        assert_relative_eq!(volume(&backend, 1), 0.2, epsilon = 1e-9);
        assert!(events.contains(&EngineEvent::CueEnded { id: CueId(2) }));
        assert_eq!(engine.state(CueId(1)), Some(CueState::Running));
    }

    #[test]
    fn test_stopping_target_ends_fade_control_cue() {
        let (mut engine, _clock, _backend) = setup();
        engine.register(media(1)).unwrap();
        engine
            .register(CueConfig::new(
                2,
                "Dip",
                CueKind::Control(ControlAction::Fade {
                    target: CueId(1),
                    property: PropertyKey::volume(),
                    to: 0.0,
                    fade: FadeSpec::linear(Duration::from_secs(10)),
                }),
            ))
            .unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(2))).unwrap();

        engine.dispatch(TriggerCommand::stop(CueId(1))).unwrap();
        assert_eq!(engine.state(CueId(2)), Some(CueState::Idle));
        assert!(engine.automations().is_empty());
    }

    #[test]
    fn test_stop_all_and_pause_all() {
        let (mut engine, _clock, _backend) = setup();
        engine.register(media(1)).unwrap();
        engine.register(media(2)).unwrap();
        engine
            .register(CueConfig::new(8, "Hold", CueKind::Control(ControlAction::PauseAll)))
            .unwrap();
        engine
            .register(CueConfig::new(
                9,
                "Blackout",
                CueKind::Control(ControlAction::StopAll { immediate: true }),
            ))
            .unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(2))).unwrap();

        engine.dispatch(TriggerCommand::start(CueId(8))).unwrap();
        assert_eq!(engine.state(CueId(1)), Some(CueState::Paused(Phase::Running)));
        assert_eq!(engine.state(CueId(2)), Some(CueState::Paused(Phase::Running)));

        engine.dispatch(TriggerCommand::start(CueId(9))).unwrap();
        assert!(engine.active_cues().is_empty());
    }

    #[test]
    fn test_queue_retrigger_is_reported() {
        let (mut engine, _clock, _backend) = setup();
        engine
            .register(media(1).with_retrigger(RetriggerPolicy::Queue))
            .unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        assert_eq!(
            engine.dispatch(TriggerCommand::start(CueId(1))),
            Ok(Dispatched::Queued)
        );
        assert!(engine
            .drain_events()
            .contains(&EngineEvent::RetriggerQueued { id: CueId(1) }));
    }

    #[test]
    fn test_post_wait_elapses_after_action_starts() {
        let (mut engine, clock, _backend) = setup();
        engine
            .register(
                media(1)
                    .with_pre_wait(Duration::from_secs(1))
                    .with_post_wait(Duration::from_secs(2)),
            )
            .unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();

        clock.set(Duration::from_millis(2_900));
        assert!(!engine
            .tick()
            .contains(&EngineEvent::PostWaitElapsed { id: CueId(1) }));
        clock.set(Duration::from_secs(3));
        assert!(engine
            .tick()
            .contains(&EngineEvent::PostWaitElapsed { id: CueId(1) }));
    }

    #[test]
    fn test_unregister_live_cue_stops_and_releases() {
        let (mut engine, _clock, backend) = setup();
        engine.register(media(1)).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();

        let config = engine.unregister(CueId(1)).unwrap();
        assert_eq!(config.id, CueId(1));
        assert!(engine.cue(CueId(1)).is_none());
        let transport = backend.transport();
        assert!(transport.ends_with(&[
            BackendCall::Stop { cue: CueId(1) },
            BackendCall::Release { cue: CueId(1) }
        ]));
        assert_eq!(engine.unregister(CueId(1)), Err(EngineError::NotFound(CueId(1))));
    }

    #[test]
    fn test_register_rejects_duplicates_and_bad_config() {
        let (mut engine, _clock, _backend) = setup();
        engine.register(media(1)).unwrap();
        assert_eq!(engine.register(media(1)), Err(EngineError::DuplicateId(CueId(1))));
        assert!(matches!(
            engine.register(media(2).with_level(-1.0)),
            Err(EngineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_cursor_needs_a_stack() {
        let (mut engine, _clock, _backend) = setup();
        assert!(matches!(
            engine.dispatch(TriggerCommand::go()),
            Err(EngineError::UnresolvedTarget(_))
        ));
    }

    #[test]
    fn test_queued_failure_becomes_event() {
        let (mut engine, _clock, _backend) = setup();
        engine.handle().send(TriggerCommand::start(CueId(4)));
        let events = engine.tick();
        assert_eq!(
            events,
            vec![EngineEvent::CommandRejected {
                command: TriggerCommand::start(CueId(4)),
                error: EngineError::NotFound(CueId(4)),
            }]
        );
    }

    #[test]
    fn test_stop_all_drops_pending_restart() {
        let (mut engine, _clock, backend) = setup();
        engine
            .register(
                media(1)
                    .with_fade_out(Duration::from_secs(3), FadeCurve::Linear)
                    .with_retrigger(crate::cue::RetriggerPolicy::Restart),
            )
            .unwrap();
        engine.register(media(2).with_pre_wait(Duration::from_secs(1))).unwrap();
        engine.register(media(3)).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(2))).unwrap();
        assert_eq!(engine.state(CueId(1)), Some(CueState::FadingOut));
        backend.take();

        assert_eq!(engine.stop_all(), 2);

        assert!(engine.active_cues().is_empty());
        // The waiting cue never played, so only cue 1 is stopped
        assert_eq!(backend.transport(), vec![BackendCall::Stop { cue: CueId(1) }]);
        assert_eq!(engine.stop_all(), 0);
    }

    #[test]
    fn test_playback_end_while_paused_lands_on_resume() {
        let (mut engine, clock, backend) = setup();
        engine.register(media(1)).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::pause(CueId(1))).unwrap();
        engine.drain_events();

        engine.handle().playback_ended(CueId(1));
        clock.advance(Duration::from_secs(1));
        let events = engine.tick();
        assert_eq!(engine.state(CueId(1)), Some(CueState::Paused(Phase::Running)));
        assert!(!events.contains(&EngineEvent::CueEnded { id: CueId(1) }));
        backend.take();

        engine.dispatch(TriggerCommand::resume(CueId(1))).unwrap();
        let events = engine.drain_events();
        assert_eq!(engine.state(CueId(1)), Some(CueState::Idle));
        assert_eq!(states(&events, 1), vec![CueState::Running, CueState::Idle]);
        assert!(events.contains(&EngineEvent::CueEnded { id: CueId(1) }));
        // Nothing left to play
        assert_eq!(backend.transport(), vec![BackendCall::Stop { cue: CueId(1) }]);

        // A fresh start plays normally
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::pause(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::resume(CueId(1))).unwrap();
        assert_eq!(engine.state(CueId(1)), Some(CueState::Running));
    }

    #[test]
    fn test_control_fade_holds_while_target_paused() {
        let (mut engine, clock, backend) = setup();
        engine.register(media(1)).unwrap();
        engine
            .register(CueConfig::new(
                2,
                "Duck",
                CueKind::Control(ControlAction::Fade {
                    target: CueId(1),
                    property: PropertyKey::volume(),
                    to: 0.0,
                    fade: FadeSpec::new(Duration::from_secs(4), FadeCurve::Linear),
                }),
            ))
            .unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(2))).unwrap();

        clock.advance(Duration::from_secs(1));
        engine.tick();
        assert_relative_eq!(volume(&backend, 1), 0.75, epsilon = 1e-9);

        engine.dispatch(TriggerCommand::pause(CueId(1))).unwrap();
        clock.advance(Duration::from_secs(2));
        engine.tick();
        assert_relative_eq!(volume(&backend, 1), 0.75, epsilon = 1e-9);
        assert_eq!(engine.state(CueId(2)), Some(CueState::Running));

        engine.dispatch(TriggerCommand::resume(CueId(1))).unwrap();
        clock.advance(Duration::from_secs(1));
        engine.tick();
        assert_relative_eq!(volume(&backend, 1), 0.5, epsilon = 1e-9);

        clock.advance(Duration::from_secs(2));
        engine.tick();
        assert_eq!(volume(&backend, 1), 0.0);
        assert_eq!(engine.state(CueId(2)), Some(CueState::Idle));
    }

    #[test]
    fn test_control_fade_on_paused_target_waits() {
        let (mut engine, clock, backend) = setup();
        engine.register(media(1)).unwrap();
        engine
            .register(CueConfig::new(
                2,
                "Duck",
                CueKind::Control(ControlAction::Fade {
                    target: CueId(1),
                    property: PropertyKey::volume(),
                    to: 0.0,
                    fade: FadeSpec::new(Duration::from_secs(2), FadeCurve::Linear),
                }),
            ))
            .unwrap();
        engine.dispatch(TriggerCommand::start(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::pause(CueId(1))).unwrap();
        engine.dispatch(TriggerCommand::start(CueId(2))).unwrap();

        clock.advance(Duration::from_secs(5));
        engine.tick();
        assert_relative_eq!(volume(&backend, 1), 1.0, epsilon = 1e-9);

        engine.dispatch(TriggerCommand::resume(CueId(1))).unwrap();
        clock.advance(Duration::from_secs(1));
        engine.tick();
        assert_relative_eq!(volume(&backend, 1), 0.5, epsilon = 1e-9);
    }
}
