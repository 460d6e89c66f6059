use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::backend::Backend;
use crate::clock::{Clock, ClockSampler};
use crate::cue::{Cue, CueConfig, CueId, CueState};
use crate::error::{EngineError, EngineResult};
use crate::fade::AutomationRunner;
use crate::messages::{
    BackendEvent, CueSnapshot, Dispatched, EngineEvent, EngineInput, TriggerAction,
    TriggerCommand, TriggerTarget,
};

/// Resolves cursor-relative triggers and supplies scheduled ones.
///
/// Implemented by the cue stack, which sits on top of the engine and is
/// consulted during the command phase of each tick.
pub trait TriggerResolver {
    fn resolve_cursor(&mut self, action: TriggerAction) -> EngineResult<CueId>;

    /// Triggers whose scheduled time is at or before `now`.
    fn due(&mut self, _now: Duration) -> Vec<TriggerCommand> {
        Vec::new()
    }
}

/// Resolver for an engine used without a cue stack.
pub struct NoCursor;

impl TriggerResolver for NoCursor {
    fn resolve_cursor(&mut self, _action: TriggerAction) -> EngineResult<CueId> {
        Err(EngineError::UnresolvedTarget(TriggerTarget::Cursor.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// A Stop during a fade-out cuts the fade short.
    pub stop_escalates_fade_out: bool,
    /// Buffer size of the observer broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            stop_escalates_fade_out: true,
            event_capacity: 1024,
        }
    }
}

/// Thread-safe producer side of the engine's input queue.
///
/// Anything sent here is applied at the start of the next tick, in the
/// order it was sent.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineInput>,
}

impl EngineHandle {
    pub fn new(tx: mpsc::UnboundedSender<EngineInput>) -> Self {
        Self { tx }
    }

    pub fn send(&self, command: TriggerCommand) {
        self.push(EngineInput::Trigger(command));
    }

    pub fn playback_ended(&self, cue: CueId) {
        self.push(EngineInput::Backend(BackendEvent::PlaybackEnded(cue)));
    }

    pub fn command_failed(&self, cue: CueId, reason: impl Into<String>) {
        self.push(EngineInput::Backend(BackendEvent::CommandFailed {
            cue,
            reason: reason.into(),
        }));
    }

    fn push(&self, input: EngineInput) {
        if let Err(e) = self.tx.send(input) {
            log::warn!("Engine is gone, dropped input {:?}", e.0);
        }
    }
}

/// The cue execution engine.
///
/// Owns every registered cue and every running automation. Only the thread
/// calling [`tick`](Engine::tick) and [`dispatch`](Engine::dispatch) mutates
/// them; other threads reach the engine through an [`EngineHandle`].
pub struct Engine {
    pub(super) sampler: ClockSampler,
    pub(super) now: Duration,
    pub(super) backend: Box<dyn Backend>,
    pub(super) cues: BTreeMap<CueId, Cue>,
    pub(super) runner: AutomationRunner,
    inbox_tx: mpsc::UnboundedSender<EngineInput>,
    inbox: mpsc::UnboundedReceiver<EngineInput>,
    /// Commands issued by composite and control cues, applied before the
    /// current command phase ends.
    pub(super) followups: VecDeque<TriggerCommand>,
    /// Composite and control cues that already fired in this cascade.
    pub(super) cascade: HashSet<CueId>,
    outbox: Vec<EngineEvent>,
    observers: broadcast::Sender<EngineEvent>,
    pub(super) options: EngineOptions,
}

impl Engine {
    pub fn new(backend: Box<dyn Backend>, clock: Box<dyn Clock>) -> Self {
        Self::with_options(backend, clock, EngineOptions::default())
    }

    pub fn with_options(backend: Box<dyn Backend>, clock: Box<dyn Clock>, options: EngineOptions) -> Self {
        let sampler = ClockSampler::new(clock);
        let now = sampler.last();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (observers, _) = broadcast::channel(options.event_capacity.max(1));

        Self {
            sampler,
            now,
            backend,
            cues: BTreeMap::new(),
            runner: AutomationRunner::new(),
            inbox_tx,
            inbox,
            followups: VecDeque::new(),
            cascade: HashSet::new(),
            outbox: Vec::new(),
            observers,
            options,
        }
    }

    /// Swap in a different backend, e.g. once an async module is running.
    pub fn set_backend(&mut self, backend: Box<dyn Backend>) {
        self.backend = backend;
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.inbox_tx.clone())
    }

    /// Receive every event the engine emits. Slow receivers lose events
    /// rather than holding the engine back.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.observers.subscribe()
    }

    /// Show time of the last clock sample.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn cue(&self, id: CueId) -> Option<&Cue> {
        self.cues.get(&id)
    }

    pub fn state(&self, id: CueId) -> Option<CueState> {
        self.cues.get(&id).map(Cue::state)
    }

    pub fn cue_ids(&self) -> impl Iterator<Item = CueId> + '_ {
        self.cues.keys().copied()
    }

    pub fn automations(&self) -> &AutomationRunner {
        &self.runner
    }

    pub fn register(&mut self, config: CueConfig) -> EngineResult<()> {
        let id = config.id;
        config
            .validate()
            .map_err(|reason| EngineError::InvalidConfiguration { id, reason })?;
        if self.cues.contains_key(&id) {
            return Err(EngineError::DuplicateId(id));
        }

        if let crate::cue::CueKind::Media { source } = &config.kind {
            self.backend.prepare(id, source);
        }
        log::info!("Registered cue {} '{}'", id, config.name);
        self.cues.insert(id, Cue::new(config));
        Ok(())
    }

    /// Remove a cue, stopping it immediately if it is live.
    pub fn unregister(&mut self, id: CueId) -> EngineResult<CueConfig> {
        let cue = self.cues.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        cue.restart = None;
        if cue.is_active() {
            self.now = self.sampler.sample();
            self.stop_now(id);
        }

        let cue = self.cues.remove(&id).ok_or(EngineError::NotFound(id))?;
        if cue.config().kind.is_media() {
            self.backend.release(id);
        }
        self.runner.forget(id);
        log::info!("Unregistered cue {} '{}'", id, cue.name());
        Ok(cue.config().clone())
    }

    /// Stop every live cue at once, skipping fade-outs and dropping pending
    /// restarts. Returns how many cues were stopped.
    pub fn stop_all(&mut self) -> usize {
        self.now = self.sampler.sample();
        let live: Vec<CueId> = self
            .cues
            .values()
            .filter(|cue| cue.is_active())
            .map(Cue::id)
            .collect();
        for cue in self.cues.values_mut() {
            cue.restart = None;
        }

        let mut stopped = 0;
        for id in live {
            // Stopping a fade target can end its control cue first
            if self.state(id).is_some_and(|state| state.is_active()) {
                self.stop_now(id);
                stopped += 1;
            }
        }
        self.followups.clear();
        self.cascade.clear();
        log::info!("Stopped {} cue(s)", stopped);
        stopped
    }

    pub fn rename(&mut self, id: CueId, name: impl Into<String>) -> EngineResult<()> {
        let cue = self.cues.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        cue.set_name(name);
        Ok(())
    }

    /// Apply a command right away. The state change has happened when this
    /// returns.
    pub fn dispatch(&mut self, command: TriggerCommand) -> EngineResult<Dispatched> {
        self.dispatch_with(command, &mut NoCursor)
    }

    pub fn dispatch_with(
        &mut self,
        command: TriggerCommand,
        resolver: &mut dyn TriggerResolver,
    ) -> EngineResult<Dispatched> {
        self.now = self.sampler.sample();
        let result = self.apply(command, resolver);
        if let Err(e) = &result {
            log::warn!("Command rejected: {}", e);
        }
        self.run_followups(resolver);
        result
    }

    pub fn tick(&mut self) -> Vec<EngineEvent> {
        self.tick_with(&mut NoCursor)
    }

    /// One scheduling step.
    ///
    /// Samples the clock once, applies every queued input in arrival order,
    /// fires expired waits, then advances automations to the sampled time.
    /// Returns every event emitted since the previous call.
    pub fn tick_with(&mut self, resolver: &mut dyn TriggerResolver) -> Vec<EngineEvent> {
        self.now = self.sampler.sample();

        let mut inputs = Vec::new();
        while let Ok(input) = self.inbox.try_recv() {
            inputs.push(input);
        }
        inputs.extend(
            resolver
                .due(self.now)
                .into_iter()
                .map(EngineInput::Trigger),
        );
        for input in inputs {
            self.apply_input(input, resolver);
        }

        self.fire_timers();
        self.run_followups(resolver);

        let completed = self.runner.advance(self.backend.as_mut(), self.now);
        for done in completed {
            self.on_automation_completed(done);
        }
        self.run_followups(resolver);

        self.drain_events()
    }

    /// Take the events emitted since the last tick or drain.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Snapshot of every live cue, in id order.
    pub fn active_cues(&self) -> Vec<CueSnapshot> {
        self.cues
            .values()
            .filter(|cue| cue.is_active())
            .map(|cue| CueSnapshot {
                id: cue.id(),
                name: cue.name().to_string(),
                state: cue.state(),
                elapsed: cue.elapsed(self.now),
                progress: cue.progress(self.now),
                level: self.runner.level(cue.id(), &cue.config().fade_property),
            })
            .collect()
    }

    fn apply_input(&mut self, input: EngineInput, resolver: &mut dyn TriggerResolver) {
        match input {
            EngineInput::Trigger(command) => {
                log::debug!("Applying queued {:?} on {}", command.action, command.target);
                if let Err(error) = self.apply(command.clone(), resolver) {
                    self.reject(command, error);
                }
                self.run_followups(resolver);
            }
            EngineInput::Backend(BackendEvent::PlaybackEnded(id)) => self.on_playback_ended(id),
            EngineInput::Backend(BackendEvent::CommandFailed { cue, reason }) => {
                self.on_command_failed(cue, reason)
            }
        }
    }

    pub(super) fn apply(
        &mut self,
        command: TriggerCommand,
        resolver: &mut dyn TriggerResolver,
    ) -> EngineResult<Dispatched> {
        let id = match command.target {
            TriggerTarget::Cue(id) => id,
            TriggerTarget::Cursor => resolver.resolve_cursor(command.action)?,
        };
        self.apply_to(id, command.action, command.fade)
    }

    /// Apply composite and control follow-ups until none are left.
    fn run_followups(&mut self, resolver: &mut dyn TriggerResolver) {
        while let Some(command) = self.followups.pop_front() {
            match self.apply(command.clone(), resolver) {
                Ok(_) => {}
                Err(EngineError::InvalidTransition { id, state, action }) => {
                    log::debug!("Skipped {:?} on cue {} while {}", action, id, state);
                }
                Err(error) => self.reject(command, error),
            }
        }
        self.cascade.clear();
    }

    fn reject(&mut self, command: TriggerCommand, error: EngineError) {
        log::warn!("Command {:?} on {} rejected: {}", command.action, command.target, error);
        self.emit(EngineEvent::CommandRejected { command, error });
    }

    pub(super) fn emit(&mut self, event: EngineEvent) {
        match &event {
            EngineEvent::CueStateChanged { id, old, new, .. } => {
                log::info!("Cue {}: {} -> {}", id, old, new)
            }
            EngineEvent::CueFailed { id, reason } => log::error!("Cue {} failed: {}", id, reason),
            other => log::debug!("{:?}", other),
        }
        // No subscribers is fine
        let _ = self.observers.send(event.clone());
        self.outbox.push(event);
    }
}
