use std::collections::BTreeMap;
use std::time::Duration;

use crate::backend::Backend;
use crate::cue::{CueId, PropertyKey};
use crate::fade::FadeSpec;

/// A running fade of one property of one cue.
#[derive(Clone, Debug, PartialEq)]
pub struct Automation {
    /// Cue whose property is driven.
    pub cue: CueId,
    pub property: PropertyKey,
    /// Cue whose lifecycle the fade belongs to. Usually `cue`, but a control
    /// cue can fade someone else.
    pub owner: CueId,
    pub from: f64,
    pub to: f64,
    pub fade: FadeSpec,
    started_at: Duration,
    paused_at: Option<Duration>,
}

impl Automation {
    pub fn new(
        cue: CueId,
        property: PropertyKey,
        owner: CueId,
        from: f64,
        to: f64,
        fade: FadeSpec,
        started_at: Duration,
    ) -> Self {
        Self {
            cue,
            property,
            owner,
            from,
            to,
            fade,
            started_at,
            paused_at: None,
        }
    }

    fn touches(&self, cue: CueId) -> bool {
        self.cue == cue || self.owner == cue
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        self.paused_at.unwrap_or(now).saturating_sub(self.started_at)
    }

    /// Eased progress at `now`, evaluated from absolute elapsed time.
    pub fn progress(&self, now: Duration) -> f64 {
        let elapsed = self.elapsed(now);
        if elapsed >= self.fade.duration {
            return 1.0;
        }
        let t = elapsed.as_secs_f64() / self.fade.duration.as_secs_f64();
        self.fade.curve.evaluate(t)
    }

    pub fn value_at(&self, now: Duration) -> f64 {
        self.from + self.progress(now) * (self.to - self.from)
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    fn key(&self) -> AutomationKey {
        (self.cue, self.property.clone())
    }
}

pub type AutomationKey = (CueId, PropertyKey);

/// Emitted once when an automation reaches its end value.
#[derive(Clone, Debug, PartialEq)]
pub struct AutomationCompleted {
    pub cue: CueId,
    pub property: PropertyKey,
    pub owner: CueId,
}

/// Owns every active automation and the last value written per property.
///
/// At most one automation exists per `(cue, property)`; starting another
/// replaces it. Cancelled automations are dropped without writing their end
/// value, so the property holds where the fade was interrupted.
#[derive(Debug, Default)]
pub struct AutomationRunner {
    tasks: BTreeMap<AutomationKey, Automation>,
    levels: BTreeMap<AutomationKey, f64>,
}

impl AutomationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, cue: CueId, property: &PropertyKey) -> Option<&Automation> {
        self.tasks.get(&(cue, property.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Automation> {
        self.tasks.values()
    }

    /// Last value written for a property, by a fade or directly.
    pub fn level(&self, cue: CueId, property: &PropertyKey) -> Option<f64> {
        self.levels.get(&(cue, property.clone())).copied()
    }

    /// Write a property value straight through to the backend.
    pub fn apply(&mut self, backend: &mut dyn Backend, cue: CueId, property: &PropertyKey, value: f64) {
        backend.set_property(cue, property, value);
        self.levels.insert((cue, property.clone()), value);
    }

    /// Register an automation, writing its start value immediately.
    /// Returns the automation it replaced, if any.
    pub fn start(&mut self, backend: &mut dyn Backend, automation: Automation) -> Option<Automation> {
        let key = automation.key();
        let replaced = self.tasks.remove(&key);
        if replaced.is_some() {
            log::debug!("Automation on cue {} {} superseded", key.0, key.1);
        }
        self.apply(backend, automation.cue, &automation.property, automation.from);
        self.tasks.insert(key, automation);
        replaced
    }

    pub fn cancel(&mut self, cue: CueId, property: &PropertyKey) -> Option<Automation> {
        self.tasks.remove(&(cue, property.clone()))
    }

    /// Cancel every automation that drives `cue` or belongs to it.
    pub fn cancel_cue(&mut self, cue: CueId) -> Vec<Automation> {
        let keys: Vec<AutomationKey> = self
            .tasks
            .iter()
            .filter(|(key, task)| key.0 == cue || task.owner == cue)
            .map(|(key, _)| key.clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| self.tasks.remove(&key))
            .collect()
    }

    /// Freeze every automation that drives `cue` or belongs to it.
    pub fn pause_cue(&mut self, cue: CueId, now: Duration) {
        for task in self.tasks.values_mut().filter(|task| task.touches(cue)) {
            if task.paused_at.is_none() {
                task.paused_at = Some(now);
            }
        }
    }

    /// Unfreeze the automations frozen by [`pause_cue`](Self::pause_cue),
    /// continuing where they held. A fade whose owner or target is still
    /// `held` stays frozen.
    pub fn resume_cue(&mut self, cue: CueId, now: Duration, held: impl Fn(CueId) -> bool) {
        for task in self.tasks.values_mut().filter(|task| task.touches(cue)) {
            if held(task.cue) || held(task.owner) {
                continue;
            }
            if let Some(paused_at) = task.paused_at.take() {
                task.started_at += now.saturating_sub(paused_at);
            }
        }
    }

    /// Progress of the automation `owner` runs on its own property.
    pub fn owned_progress(&self, owner: CueId, property: &PropertyKey, now: Duration) -> Option<f64> {
        self.get(owner, property)
            .filter(|task| task.owner == owner)
            .map(|task| task.progress(now))
    }

    /// Forget the recorded levels of a cue that left the registry.
    pub fn forget(&mut self, cue: CueId) {
        self.levels.retain(|key, _| key.0 != cue);
    }

    /// Advance every running automation to `now`, writing values through the
    /// backend. Finished automations write their exact end value, are removed,
    /// and are reported once.
    pub fn advance(&mut self, backend: &mut dyn Backend, now: Duration) -> Vec<AutomationCompleted> {
        let mut completed = Vec::new();
        let mut writes = Vec::with_capacity(self.tasks.len());

        for (key, task) in &self.tasks {
            if task.is_paused() {
                continue;
            }
            if task.elapsed(now) >= task.fade.duration {
                writes.push((key.clone(), task.to));
                completed.push(AutomationCompleted {
                    cue: task.cue,
                    property: task.property.clone(),
                    owner: task.owner,
                });
            } else {
                writes.push((key.clone(), task.value_at(now)));
            }
        }

        for ((cue, property), value) in writes {
            self.apply(backend, cue, &property, value);
        }
        for done in &completed {
            self.tasks.remove(&(done.cue, done.property.clone()));
        }
        completed
    }
}
