use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::traits::{AsyncModule, Backend, BackendCommand};
use crate::cue::{CueId, MediaSource, PropertyKey};
use crate::engine::EngineHandle;

/// [`Backend`] that forwards every call to a module running in its own task.
#[derive(Debug, Clone)]
pub struct ModuleBackend {
    name: &'static str,
    tx: mpsc::UnboundedSender<BackendCommand>,
}

impl ModuleBackend {
    fn send(&self, command: BackendCommand) {
        if let Err(e) = self.tx.send(command) {
            log::warn!("Backend module {} is gone, dropped {:?}", self.name, e.0);
        }
    }
}

impl Backend for ModuleBackend {
    fn play(&mut self, cue: CueId) {
        self.send(BackendCommand::Play { cue });
    }

    fn pause(&mut self, cue: CueId) {
        self.send(BackendCommand::Pause { cue });
    }

    fn stop(&mut self, cue: CueId) {
        self.send(BackendCommand::Stop { cue });
    }

    fn set_property(&mut self, cue: CueId, key: &PropertyKey, value: f64) {
        self.send(BackendCommand::SetProperty {
            cue,
            key: key.clone(),
            value,
        });
    }

    fn prepare(&mut self, cue: CueId, source: &MediaSource) {
        self.send(BackendCommand::Prepare {
            cue,
            source: source.clone(),
        });
    }

    fn release(&mut self, cue: CueId) {
        self.send(BackendCommand::Release { cue });
    }
}

/// Owns one backend module: initializes it, runs it on the tokio runtime and
/// shuts it down.
///
/// The command channel exists from construction, so the engine can be given
/// its [`ModuleBackend`] before the module runs; early commands wait in the
/// channel.
pub struct ModuleHost {
    name: &'static str,
    module: Option<Box<dyn AsyncModule>>,
    handle: Option<JoinHandle<()>>,
    sender: mpsc::UnboundedSender<BackendCommand>,
    receiver: Option<mpsc::UnboundedReceiver<BackendCommand>>,
    initialized: bool,
}

impl ModuleHost {
    pub fn new(module: Box<dyn AsyncModule>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name: module.name(),
            module: Some(module),
            handle: None,
            sender,
            receiver: Some(receiver),
            initialized: false,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The backend the engine should drive.
    pub fn backend(&self) -> ModuleBackend {
        ModuleBackend {
            name: self.name,
            tx: self.sender.clone(),
        }
    }

    /// Initialize the module. Must be called before `start`.
    pub async fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(module) = self.module.as_mut() else {
            return Err(format!("Module {} is already running", self.name).into());
        };
        match module.initialize().await {
            Ok(_) => {
                log::info!("Module {} initialized successfully", self.name);
                self.initialized = true;
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to initialize module {}: {}", self.name, e);
                Err(format!("{} module error: {}", self.name, e).into())
            }
        }
    }

    /// Spawn the module in its own task. Reports go back through `engine`.
    pub fn start(&mut self, engine: EngineHandle) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.initialized {
            return Err(format!("Module {} has not been initialized", self.name).into());
        }
        let (Some(mut module), Some(rx)) = (self.module.take(), self.receiver.take()) else {
            return Err(format!("Module {} is already running", self.name).into());
        };

        let name = self.name;
        let handle = tokio::spawn(async move {
            if let Err(e) = module.run(rx, engine).await {
                log::error!("Module {} error: {}", name, e);
            }
            if let Err(e) = module.shutdown().await {
                log::error!("Module {} shutdown error: {}", name, e);
            }
        });

        self.handle = Some(handle);
        log::info!("Module {} started", self.name);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Ask the module to stop and wait for its task to finish.
    pub async fn shutdown(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        log::info!("Shutting down module {}...", self.name);
        let _ = self.sender.send(BackendCommand::Shutdown);
        if let Err(e) = handle.await {
            log::error!("Module {} shutdown error: {}", self.name, e);
            return Err(e.into());
        }
        log::info!("Module {} shutdown complete", self.name);
        Ok(())
    }

    /// Status of a module that has not been started yet, or a running flag.
    pub fn status(&self) -> HashMap<String, String> {
        match &self.module {
            Some(module) => module.status(),
            None => HashMap::from([
                ("module".to_string(), self.name.to_string()),
                ("running".to_string(), self.is_running().to_string()),
            ]),
        }
    }
}
