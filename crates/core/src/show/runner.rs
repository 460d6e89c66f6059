use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::backend::ModuleHost;
use crate::config::Settings;
use crate::cue::CueStack;
use crate::engine::{Engine, EngineHandle};
use crate::messages::{EngineEvent, ShowCommand, ShowEvent, TriggerCommand};
use crate::show::show::Show;

/// Drives one show: owns the engine and its cue stack, ticks them at the
/// configured rate and serves operator commands between ticks.
pub struct ShowRunner {
    engine: Engine,
    stack: CueStack,
    settings: Settings,
    host: Option<ModuleHost>,
}

impl ShowRunner {
    pub fn new(engine: Engine, stack: CueStack, settings: Settings) -> Self {
        Self {
            engine,
            stack,
            settings,
            host: None,
        }
    }

    /// Load `show` into a fresh engine.
    pub fn load(mut engine: Engine, show: &Show, settings: Settings) -> crate::EngineResult<Self> {
        let stack = show.load(&mut engine)?;
        Ok(Self::new(engine, stack, settings))
    }

    /// Hand over a started backend module so it is shut down with the show.
    pub fn with_host(mut self, host: ModuleHost) -> Self {
        self.host = Some(host);
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn stack(&self) -> &CueStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut CueStack {
        &mut self.stack
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn handle(&self) -> EngineHandle {
        self.engine.handle()
    }

    /// One tick of the engine and the stack.
    pub fn tick(&mut self) -> Vec<EngineEvent> {
        self.stack.tick(&mut self.engine)
    }

    /// Apply one command. Returns false once the runner should stop.
    pub fn process_command(
        &mut self,
        command: ShowCommand,
        event_tx: &mpsc::UnboundedSender<ShowEvent>,
    ) -> bool {
        match command {
            ShowCommand::Go => self.trigger(TriggerCommand::go(), event_tx),
            ShowCommand::Trigger(trigger) => self.trigger(trigger, event_tx),
            ShowCommand::Group(group) => {
                if let Err(e) = self.stack.trigger_group(&mut self.engine, group) {
                    let _ = event_tx.send(ShowEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
            ShowCommand::GoTo { index } => {
                self.stack.go_to(index);
                self.send_cursor(event_tx);
            }
            ShowCommand::Register(config) => {
                let id = config.id;
                match self.engine.register(config) {
                    Ok(()) => {
                        self.stack.push(id);
                        let _ = event_tx.send(ShowEvent::Registered { id });
                    }
                    Err(e) => {
                        let _ = event_tx.send(ShowEvent::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }
            ShowCommand::Unregister(id) => match self.engine.unregister(id) {
                Ok(_) => {
                    self.stack.remove(id);
                    let _ = event_tx.send(ShowEvent::Unregistered { id });
                }
                Err(e) => {
                    let _ = event_tx.send(ShowEvent::Error {
                        message: e.to_string(),
                    });
                }
            },
            ShowCommand::QueryActiveCues => {
                let _ = event_tx.send(ShowEvent::ActiveCues {
                    cues: self.engine.active_cues(),
                });
            }
            ShowCommand::QueryCursor => self.send_cursor(event_tx),
            ShowCommand::Shutdown => return false,
        }
        true
    }

    fn trigger(&mut self, command: TriggerCommand, event_tx: &mpsc::UnboundedSender<ShowEvent>) {
        if let Err(e) = self.engine.dispatch_with(command, &mut self.stack) {
            let _ = event_tx.send(ShowEvent::Error {
                message: e.to_string(),
            });
        }
    }

    fn send_cursor(&self, event_tx: &mpsc::UnboundedSender<ShowEvent>) {
        let _ = event_tx.send(ShowEvent::Cursor {
            index: self.stack.cursor(),
            next: self.stack.next_cue(),
        });
    }

    /// Stop every live cue at once and shut the backend module down.
    pub async fn shutdown(&mut self) -> Result<Vec<EngineEvent>, anyhow::Error> {
        log::info!("Shutting down show '{}'...", self.stack.name());
        self.stack.cancel_scheduled();
        self.engine.stop_all();
        let events = self.engine.drain_events();

        if let Some(host) = self.host.as_mut() {
            host.shutdown()
                .await
                .map_err(|e| anyhow::anyhow!("{} module: {}", host.name(), e))?;
        }
        Ok(events)
    }

    pub async fn run_with_channels(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<ShowCommand>,
        event_tx: mpsc::UnboundedSender<ShowEvent>,
    ) -> Result<(), anyhow::Error> {
        let mut tick_interval = tokio::time::interval(self.settings.tick_interval());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut status_interval = tokio::time::interval(self.settings.status_interval());
        status_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!(
            "Show '{}' running at {} Hz",
            self.stack.name(),
            self.settings.tick_rate_hz
        );

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        log::info!("Command channel closed");
                        for event in self.shutdown().await? {
                            let _ = event_tx.send(ShowEvent::Engine(event));
                        }
                        break;
                    };
                    if !self.process_command(command, &event_tx) {
                        for event in self.shutdown().await? {
                            let _ = event_tx.send(ShowEvent::Engine(event));
                        }
                        let _ = event_tx.send(ShowEvent::ShutdownComplete);
                        break;
                    }
                }

                _ = tick_interval.tick() => {
                    for event in self.tick() {
                        let _ = event_tx.send(ShowEvent::Engine(event));
                    }
                }

                _ = status_interval.tick() => {
                    let cues = self.engine.active_cues();
                    if !cues.is_empty() {
                        let _ = event_tx.send(ShowEvent::ActiveCues { cues });
                    }
                }
            }
        }

        log::info!("Show runner completed");
        Ok(())
    }
}
