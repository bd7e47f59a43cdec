//! Threaded host for a [`SubscriptionManager`].
//!
//! One dispatcher thread owns the manager. Client requests, connection
//! closes, store notifications and debounce deadlines are all funneled into
//! that thread, so the manager never sees concurrent access and collection
//! evaluations for one subscription never overlap.

use crate::delivery::Connection;
use crate::error::{Result, SyncError};
use crate::subscriptions::{EngineStats, SubscriptionManager};
use crate::types::{ConnectionId, Scope, SubscriptionId};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// How long the dispatcher sleeps when no timer is pending.
const IDLE_WAIT: Duration = Duration::from_millis(500);

enum Command {
    Request {
        connection: Arc<dyn Connection>,
        scope: Scope,
        text: String,
    },
    Unsubscribe(SubscriptionId),
    ConnectionClosed(ConnectionId),
    Stats(Sender<EngineStats>),
    Shutdown,
}

/// Cloneable entry point into a running [`SyncService`].
#[derive(Clone)]
pub struct SyncHandle {
    commands: Sender<Command>,
}

impl SyncHandle {
    /// Forward raw request text received on `connection`.
    pub fn request(
        &self,
        connection: Arc<dyn Connection>,
        scope: Scope,
        text: impl Into<String>,
    ) -> Result<()> {
        self.send(Command::Request {
            connection,
            scope,
            text: text.into(),
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.send(Command::Unsubscribe(id))
    }

    /// Report that a connection closed; all its subscriptions are torn down.
    pub fn connection_closed(&self, connection: ConnectionId) -> Result<()> {
        self.send(Command::ConnectionClosed(connection))
    }

    pub fn stats(&self) -> Result<EngineStats> {
        let (reply, response) = bounded(1);
        self.send(Command::Stats(reply))?;
        response.recv().map_err(|_| SyncError::ServiceStopped)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::ServiceStopped)
    }
}

/// A dispatcher thread driving one manager.
pub struct SyncService {
    handle: SyncHandle,
    worker: Option<JoinHandle<()>>,
}

impl SyncService {
    /// Move `manager` onto a new dispatcher thread.
    ///
    /// Register models before spawning; the manager is not reachable afterwards.
    pub fn spawn(manager: SubscriptionManager) -> Result<Self> {
        let (commands, receiver) = unbounded();
        let worker = thread::Builder::new()
            .name("livesync-dispatcher".to_string())
            .spawn(move || run(manager, receiver))?;

        Ok(Self {
            handle: SyncHandle { commands },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Stop the dispatcher, disposing the manager, and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.handle.commands.send(Command::Shutdown);
            if worker.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut manager: SubscriptionManager, commands: Receiver<Command>) {
    let feed = manager.feed_receiver();
    debug!("dispatcher started");

    loop {
        let timeout = manager.time_until_next_deadline().unwrap_or(IDLE_WAIT);

        select! {
            recv(commands) -> command => match command {
                Ok(Command::Shutdown) | Err(_) => break,
                Ok(command) => execute(&mut manager, command),
            },
            recv(feed) -> event => {
                if let Ok(event) = event {
                    manager.dispatch(&event.model, event.change);
                }
            },
            default(timeout) => {},
        }

        manager.run_due();
    }

    manager.dispose();
    debug!("dispatcher stopped");
}

fn execute(manager: &mut SubscriptionManager, command: Command) {
    match command {
        Command::Request {
            connection,
            scope,
            text,
        } => {
            manager.handle_text(&connection, scope, &text);
        }
        Command::Unsubscribe(id) => {
            manager.unsubscribe(id);
        }
        Command::ConnectionClosed(connection) => {
            manager.close_connection(connection);
        }
        Command::Stats(reply) => {
            let _ = reply.send(manager.stats());
        }
        Command::Shutdown => {}
    }
}
