//! Discovery worker thread.

use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::DiscoveryError;

/// Outcome of one discovery round
pub type DiscoveryResult = Result<Vec<String>, DiscoveryError>;

/// A blocking service locator
pub trait DiscoveryAgent: Send {
    /// Prepare sockets or other resources; called once before the worker starts
    fn init(&mut self) -> Result<(), DiscoveryError> {
        Ok(())
    }

    /// Run one discovery round and return the service URLs found
    fn find_services(&self) -> Result<Vec<String>, DiscoveryError>;
}

enum Command {
    Discover,
    Shutdown,
}

/// Runs a [`DiscoveryAgent`] on its own OS thread
pub struct DiscoveryThread {
    agent: Option<Box<dyn DiscoveryAgent>>,
    results: mpsc::UnboundedSender<DiscoveryResult>,
    commands: Option<std_mpsc::Sender<Command>>,
    handle: Option<JoinHandle<()>>,
    initialized: bool,
}

impl DiscoveryThread {
    /// Create a thread wrapper; results of every round are sent to `results`
    pub fn new(
        agent: Box<dyn DiscoveryAgent>,
        results: mpsc::UnboundedSender<DiscoveryResult>,
    ) -> Self {
        Self {
            agent: Some(agent),
            results,
            commands: None,
            handle: None,
            initialized: false,
        }
    }

    /// Initialize the agent
    pub fn init(&mut self) -> Result<(), DiscoveryError> {
        let agent = self
            .agent
            .as_mut()
            .ok_or(DiscoveryError::State("already started"))?;
        agent.init()?;
        self.initialized = true;
        Ok(())
    }

    /// Spawn the worker thread
    pub fn start(&mut self) -> Result<(), DiscoveryError> {
        if !self.initialized {
            return Err(DiscoveryError::State("not initialized"));
        }
        let agent = self
            .agent
            .take()
            .ok_or(DiscoveryError::State("already started"))?;

        let (tx, rx) = std_mpsc::channel();
        let results = self.results.clone();
        let handle = thread::Builder::new()
            .name("e133-discovery".to_string())
            .spawn(move || worker(agent, rx, results))?;

        self.commands = Some(tx);
        self.handle = Some(handle);
        info!("Discovery thread started");
        Ok(())
    }

    /// Queue one discovery round; returns false when the worker is not running
    pub fn discover(&self) -> bool {
        match &self.commands {
            Some(commands) => commands.send(Command::Discover).is_ok(),
            None => false,
        }
    }

    /// True while the worker thread is running
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop and join the worker; safe to call more than once
    pub fn join(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Shutdown);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Discovery thread panicked");
            } else {
                debug!("Discovery thread joined");
            }
        }
    }
}

impl Drop for DiscoveryThread {
    fn drop(&mut self) {
        self.join();
    }
}

impl std::fmt::Debug for DiscoveryThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryThread")
            .field("initialized", &self.initialized)
            .field("running", &self.is_running())
            .finish()
    }
}

fn worker(
    agent: Box<dyn DiscoveryAgent>,
    commands: std_mpsc::Receiver<Command>,
    results: mpsc::UnboundedSender<DiscoveryResult>,
) {
    // A round queued behind Shutdown is dropped with the channel
    while let Ok(Command::Discover) = commands.recv() {
        let result = agent.find_services();
        if let Err(e) = &result {
            warn!("Discovery round failed: {}", e);
        }
        if results.send(result).is_err() {
            debug!("Discovery result receiver dropped, stopping");
            break;
        }
    }
}
