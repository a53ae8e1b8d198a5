//! Dispatcher interface: assigns backend workers to operations.

use async_trait::async_trait;

use crate::{OpError, ResourceUrl, WorkerHandle};

/// Assigns backend workers to operations and pools still-open workers for
/// reuse.
///
/// Scheduling policy (which worker process serves a request, pooling,
/// timeouts) is entirely the implementor's business; the engine only relies
/// on this contract.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Assign a worker able to serve `url`. The returned handle carries the
    /// event channel the worker reports on.
    async fn assign(&self, url: &ResourceUrl) -> Result<WorkerHandle, OpError>;

    /// Park a still-open worker for reuse by a future operation on the same
    /// URL, typically after a redirect.
    async fn put_on_hold(&self, worker: WorkerHandle, url: ResourceUrl);

    /// Take a previously held worker for `url`, if one is parked.
    async fn take_from_hold(&self, url: &ResourceUrl) -> Option<WorkerHandle>;
}
