//! Channel plumbing between operations and backend workers.

use tokio::sync::mpsc;

use crate::{ErrorKind, OpError, WorkerCommand, WorkerEvent, WORKER_CHANNEL_SIZE};

/// The operation-side end of a worker exchange.
///
/// Dropping the handle is how an operation abandons a worker; the worker sees
/// its command channel close and winds down.
#[derive(Debug)]
pub struct WorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    events: mpsc::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Send one command to the worker.
    pub async fn send(&self, cmd: WorkerCommand) -> Result<(), OpError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| OpError::new(ErrorKind::WorkerDied, "worker command channel closed"))
    }

    /// Receive the next event. A closed channel reports as a dead worker.
    pub async fn recv(&mut self) -> Result<WorkerEvent, OpError> {
        self.events
            .recv()
            .await
            .ok_or_else(|| OpError::new(ErrorKind::WorkerDied, "worker event channel closed"))
    }
}

/// The worker-side end of the exchange.
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub commands: mpsc::Receiver<WorkerCommand>,
    pub events: mpsc::Sender<WorkerEvent>,
}

impl WorkerEndpoint {
    /// Emit one event toward the operation. Returns false when the operation
    /// has gone away.
    pub async fn emit(&self, event: WorkerEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Receive the next command, or None when the operation dropped its
    /// handle.
    pub async fn next_command(&mut self) -> Option<WorkerCommand> {
        self.commands.recv().await
    }
}

/// Create a connected handle/endpoint pair.
pub fn worker_channel() -> (WorkerHandle, WorkerEndpoint) {
    let (cmd_tx, cmd_rx) = mpsc::channel(WORKER_CHANNEL_SIZE);
    let (event_tx, event_rx) = mpsc::channel(WORKER_CHANNEL_SIZE);
    (
        WorkerHandle {
            commands: cmd_tx,
            events: event_rx,
        },
        WorkerEndpoint {
            commands: cmd_rx,
            events: event_tx,
        },
    )
}
