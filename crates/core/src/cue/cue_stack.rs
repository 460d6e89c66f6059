use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use crate::cue::{CueId, CueState, NextAction};
use crate::engine::{Engine, TriggerResolver};
use crate::error::{EngineError, EngineResult};
use crate::fade::FadeSpec;
use crate::messages::{Dispatched, EngineEvent, TriggerAction, TriggerCommand};

/// Which stack entries a group trigger addresses.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupTargets {
    /// Entries `from..=to` by stack position.
    Range { from: usize, to: usize },
    Ids(Vec<CueId>),
    /// The next `n` entries from the cursor. The cursor moves past them.
    Next(usize),
}

/// One command applied to several cues, optionally staggered in time.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupTrigger {
    pub targets: GroupTargets,
    pub action: TriggerAction,
    /// Delay between consecutive targets. The first fires immediately.
    pub stagger: Duration,
    pub fade: Option<FadeSpec>,
}

impl GroupTrigger {
    pub fn new(targets: GroupTargets, action: TriggerAction) -> Self {
        Self {
            targets,
            action,
            stagger: Duration::ZERO,
            fade: None,
        }
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn with_fade(mut self, fade: FadeSpec) -> Self {
        self.fade = Some(fade);
        self
    }
}

#[derive(Clone, Debug)]
struct ScheduledTrigger {
    due: Duration,
    command: TriggerCommand,
}

/// Ordered list of cue ids with a GO cursor.
///
/// The stack never touches cue state itself: everything goes through the
/// engine. The cursor always lies in `0..=len`, where `len` means exhausted.
#[derive(Debug, Default)]
pub struct CueStack {
    name: String,
    entries: Vec<CueId>,
    cursor: usize,
    /// Cues with a queued retrigger waiting for them to go idle.
    queued: BTreeSet<CueId>,
    scheduled: Vec<ScheduledTrigger>,
}

impl CueStack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[CueId] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The cue the next GO would start.
    pub fn next_cue(&self) -> Option<CueId> {
        self.entries.get(self.cursor).copied()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.entries.len()
    }

    pub fn position(&self, id: CueId) -> Option<usize> {
        self.entries.iter().position(|entry| *entry == id)
    }

    pub fn push(&mut self, id: CueId) {
        self.entries.push(id);
    }

    /// Insert at `index` (clamped). An insert before the cursor keeps the
    /// cursor on the same cue.
    pub fn insert(&mut self, index: usize, id: CueId) {
        let index = index.min(self.entries.len());
        self.entries.insert(index, id);
        if index < self.cursor {
            self.cursor += 1;
        }
    }

    /// Remove every entry for `id`. Returns whether anything was removed.
    pub fn remove(&mut self, id: CueId) -> bool {
        let before = self.entries.len();
        let mut index = 0;
        while index < self.entries.len() {
            if self.entries[index] == id {
                self.entries.remove(index);
                if index < self.cursor {
                    self.cursor -= 1;
                }
            } else {
                index += 1;
            }
        }
        self.queued.remove(&id);
        self.entries.len() != before
    }

    /// Move the cursor without triggering anything. Clamped to `0..=len`.
    pub fn go_to(&mut self, index: usize) {
        self.cursor = index.min(self.entries.len());
    }

    pub fn go_to_previous(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    /// Start the cue at the cursor and advance the cursor.
    pub fn go(&mut self, engine: &mut Engine) -> EngineResult<Dispatched> {
        engine.dispatch_with(TriggerCommand::go(), self)
    }

    /// Apply one action to several cues.
    ///
    /// Targets due now are dispatched immediately; staggered ones fire from
    /// [`tick`](Self::tick) at their scheduled time. Returns how many cues
    /// were addressed.
    pub fn trigger_group(&mut self, engine: &mut Engine, group: GroupTrigger) -> EngineResult<usize> {
        let mut advance_to = None;
        let targets: Vec<CueId> = match &group.targets {
            GroupTargets::Range { from, to } => {
                let end = to.saturating_add(1).min(self.entries.len());
                let start = (*from).min(end);
                self.entries[start..end].to_vec()
            }
            GroupTargets::Ids(ids) => ids.clone(),
            GroupTargets::Next(count) => {
                if self.is_exhausted() {
                    return Err(EngineError::StackExhausted);
                }
                let end = self.cursor.saturating_add(*count).min(self.entries.len());
                advance_to = Some(end);
                self.entries[self.cursor..end].to_vec()
            }
        };

        // Nothing fires unless every offset fits on the show clock
        let overflow = EngineError::StaggerOverflow {
            stagger: group.stagger,
            targets: targets.len(),
        };
        let offsets = (0..targets.len())
            .map(|index| {
                u32::try_from(index)
                    .ok()
                    .and_then(|index| group.stagger.checked_mul(index))
            })
            .collect::<Option<Vec<Duration>>>()
            .ok_or_else(|| overflow.clone())?;
        if let Some(last) = offsets.last() {
            engine.now().checked_add(*last).ok_or(overflow)?;
        }
        if let Some(end) = advance_to {
            self.cursor = end;
        }

        let mut base = None;
        for (id, offset) in targets.iter().zip(offsets) {
            let mut command = TriggerCommand::new(*id, group.action);
            command.fade = group.fade.clone();

            if offset.is_zero() {
                if let Err(e) = engine.dispatch_with(command, self) {
                    log::warn!("Group trigger on cue {} failed: {}", id, e);
                }
            } else {
                // Staggered from the moment the first target fired
                let base = *base.get_or_insert(engine.now());
                self.scheduled.push(ScheduledTrigger {
                    due: base.saturating_add(offset),
                    command,
                });
            }
        }
        log::info!(
            "Group {:?} on {} cue(s) in stack '{}'",
            group.action,
            targets.len(),
            self.name
        );
        Ok(targets.len())
    }

    /// Drop staggered triggers that have not fired yet.
    pub fn cancel_scheduled(&mut self) -> usize {
        let count = self.scheduled.len();
        self.scheduled.clear();
        count
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled.len()
    }

    /// Tick the engine and react to what happened: auto-continue,
    /// auto-follow and queued retriggers.
    ///
    /// Reactions are handled in a loop over an event queue, so a long chain
    /// of auto-continuing cues never recurses. Returns every event seen.
    pub fn tick(&mut self, engine: &mut Engine) -> Vec<EngineEvent> {
        let mut pending: VecDeque<EngineEvent> = engine.tick_with(self).into();
        let mut seen = Vec::with_capacity(pending.len());

        while let Some(event) = pending.pop_front() {
            self.observe(engine, &event);
            pending.extend(engine.drain_events());
            seen.push(event);
        }
        seen
    }

    fn observe(&mut self, engine: &mut Engine, event: &EngineEvent) {
        match event {
            EngineEvent::CueEnded { id } => {
                if self.follows(engine, *id, NextAction::TriggerAfterEnd) {
                    log::debug!("Cue {} ended, continuing", id);
                    self.auto_go(engine);
                }
            }
            EngineEvent::PostWaitElapsed { id } => {
                if self.follows(engine, *id, NextAction::TriggerAfterWait) {
                    log::debug!("Cue {} post-wait elapsed, following", id);
                    self.auto_go(engine);
                }
            }
            EngineEvent::RetriggerQueued { id } => {
                if !self.queued.insert(*id) {
                    log::debug!("Cue {} already has a start queued", id);
                }
            }
            EngineEvent::CueFailed { id, .. } => {
                if self.queued.remove(id) {
                    log::info!("Dropped queued start of failed cue {}", id);
                }
            }
            EngineEvent::CueStateChanged {
                id,
                new: CueState::Idle,
                ..
            } => {
                if self.queued.remove(id) {
                    if let Err(e) = engine.dispatch_with(TriggerCommand::start(*id), self) {
                        log::warn!("Queued start of cue {} failed: {}", id, e);
                    }
                }
            }
            _ => {}
        }
    }

    /// Whether `id` is already behind the cursor and configured with `next`.
    fn follows(&self, engine: &Engine, id: CueId, next: NextAction) -> bool {
        let passed = self.entries[..self.cursor].contains(&id);
        passed
            && engine
                .cue(id)
                .is_some_and(|cue| cue.config().next_action == next)
    }

    fn auto_go(&mut self, engine: &mut Engine) {
        match self.go(engine) {
            Ok(_) => {}
            Err(EngineError::StackExhausted) => {
                log::info!("Stack '{}' finished", self.name)
            }
            Err(e) => log::warn!("Auto-continue in stack '{}' failed: {}", self.name, e),
        }
    }
}

impl TriggerResolver for CueStack {
    fn resolve_cursor(&mut self, action: TriggerAction) -> EngineResult<CueId> {
        let Some(id) = self.next_cue() else {
            return Err(EngineError::StackExhausted);
        };
        if action == TriggerAction::Start {
            self.cursor += 1;
        }
        Ok(id)
    }

    fn due(&mut self, now: Duration) -> Vec<TriggerCommand> {
        let (mut due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|trigger| trigger.due <= now);
        self.scheduled = later;
        due.sort_by_key(|trigger| trigger.due);
        due.into_iter().map(|trigger| trigger.command).collect()
    }
}
