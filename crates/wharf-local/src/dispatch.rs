//! Dispatcher spawning local filesystem workers.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use wharf_core::{worker_channel, Dispatch, OpError, ResourceUrl, WorkerHandle};

use crate::worker::serve_worker;

/// Assigns one worker task per operation, with a hold pool for workers parked
/// across redirects.
#[derive(Debug, Default)]
pub struct LocalDispatch {
    held: Mutex<HashMap<String, Vec<WorkerHandle>>>,
}

impl LocalDispatch {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Dispatch for LocalDispatch {
    async fn assign(&self, url: &ResourceUrl) -> Result<WorkerHandle, OpError> {
        if !url.is_local() {
            return Err(OpError::unsupported(url));
        }
        if let Some(held) = self.take_from_hold(url).await {
            return Ok(held);
        }
        let (handle, endpoint) = worker_channel();
        tokio::spawn(serve_worker(endpoint));
        Ok(handle)
    }

    async fn put_on_hold(&self, worker: WorkerHandle, url: ResourceUrl) {
        self.held
            .lock()
            .expect("hold pool lock poisoned")
            .entry(url.to_string())
            .or_default()
            .push(worker);
    }

    async fn take_from_hold(&self, url: &ResourceUrl) -> Option<WorkerHandle> {
        self.held
            .lock()
            .expect("hold pool lock poisoned")
            .get_mut(&url.to_string())?
            .pop()
    }
}
