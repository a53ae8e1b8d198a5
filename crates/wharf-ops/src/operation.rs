//! Operation identity, handles and the owning engine.
//!
//! Construction never runs an operation synchronously: `Engine` methods
//! register the operation and spawn it, so the caller can still attach itself
//! to the progress stream before anything happens. Completion is delivered
//! exactly once through the handle's future; the registry entry is released
//! when the operation reaches its terminal state.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use wharf_core::{
    Capabilities, Dispatch, EngineConfig, EntryRecord, ErrorKind, Interact, Notifier, OpError,
    ResourceUrl,
};

use crate::copy_move::{self, CopySummary, TransferMode};
use crate::delete::{self, DeleteSummary};
use crate::file_copy::{self, CopyFlags};
use crate::list::{self, ListOptions, ListUpdate};
use crate::progress::{OpKind, OpProgress, Reporter};
use crate::simple;
use crate::transfer;

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(pub u64);

impl OpId {
    fn next() -> Self {
        Self(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Shared services every operation runs against.
pub(crate) struct OpEnv {
    pub dispatch: Arc<dyn Dispatch>,
    pub caps: Arc<dyn Capabilities>,
    pub interact: Arc<dyn Interact>,
    pub notifier: Arc<Notifier>,
    pub config: EngineConfig,
}

/// Caller-side handle to a running operation.
///
/// Dropping the handle does not cancel the operation; it keeps running to
/// completion (fire and forget). [`OpHandle::kill`] cancels it.
#[derive(Debug)]
pub struct OpHandle<T = ()> {
    id: OpId,
    progress: mpsc::Receiver<OpProgress>,
    done: oneshot::Receiver<Result<T, OpError>>,
    cancel: CancellationToken,
}

impl<T> OpHandle<T> {
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Cancel the operation and everything it has in flight. Idempotent;
    /// never blocks.
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    /// Next progress snapshot, or None once the operation stopped reporting.
    pub async fn next_progress(&mut self) -> Option<OpProgress> {
        self.progress.recv().await
    }

    /// Wait for completion. Resolves exactly once.
    pub async fn wait(self) -> Result<T, OpError> {
        match self.done.await {
            Ok(result) => result,
            Err(_) => Err(OpError::new(
                ErrorKind::Internal,
                "operation dropped without completing",
            )),
        }
    }

    /// Drain remaining progress, then wait for completion.
    pub async fn finish(mut self) -> (Vec<OpProgress>, Result<T, OpError>) {
        let mut seen = Vec::new();
        while let Some(progress) = self.progress.recv().await {
            seen.push(progress);
        }
        (seen, self.wait().await)
    }
}

/// The operation engine: owns running operations and the services they use.
pub struct Engine {
    env: Arc<OpEnv>,
    registry: Arc<Mutex<HashMap<u64, CancellationToken>>>,
}

impl Engine {
    pub fn new(
        dispatch: Arc<dyn Dispatch>,
        caps: Arc<dyn Capabilities>,
        interact: Arc<dyn Interact>,
        notifier: Arc<Notifier>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            env: Arc::new(OpEnv {
                dispatch,
                caps,
                interact,
                notifier,
                config,
            }),
            registry: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Ids of operations that have not yet completed.
    pub fn active(&self) -> Vec<OpId> {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .map(|id| OpId(*id))
            .collect()
    }

    /// Cancel one operation by id.
    pub fn kill(&self, id: OpId) {
        if let Some(token) = self
            .registry
            .lock()
            .expect("registry lock poisoned")
            .get(&id.0)
        {
            token.cancel();
        }
    }

    /// Cancel every running operation.
    pub fn shutdown(&self) {
        for token in self
            .registry
            .lock()
            .expect("registry lock poisoned")
            .values()
        {
            token.cancel();
        }
    }

    pub(crate) fn spawn<T, F, Fut>(&self, kind: OpKind, f: F) -> OpHandle<T>
    where
        F: FnOnce(Arc<OpEnv>, Reporter, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, OpError>> + Send + 'static,
        T: Send + 'static,
    {
        let id = OpId::next();
        let (progress_tx, progress_rx) = mpsc::channel(self.env.config.progress_buffer);
        let (done_tx, done_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .insert(id.0, cancel.clone());

        let env = self.env.clone();
        let registry = self.registry.clone();
        let token = cancel.clone();
        let reporter = Reporter::new(kind, progress_tx);
        let span = tracing::debug_span!("op", id = id.0, kind = %kind);
        tokio::spawn(
            async move {
                let work = f(env, reporter, token.clone());
                tokio::pin!(work);
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(OpError::cancelled()),
                    result = &mut work => result,
                };
                registry.lock().expect("registry lock poisoned").remove(&id.0);
                if let Err(err) = &result {
                    tracing::debug!(kind = %err.kind.label(), detail = %err.detail, "operation failed");
                }
                let _ = done_tx.send(result);
            }
            .instrument(span),
        );

        OpHandle {
            id,
            progress: progress_rx,
            done: done_rx,
            cancel,
        }
    }

    // --- single-command operations -------------------------------------

    /// Stat one resource.
    pub fn stat(&self, url: ResourceUrl) -> OpHandle<EntryRecord> {
        self.spawn(OpKind::Stat, move |env, _reporter, _token| async move {
            simple::stat(&env, &url).await
        })
    }

    /// Create one directory.
    pub fn mkdir(&self, url: ResourceUrl, permissions: i64) -> OpHandle<()> {
        self.spawn(OpKind::Mkdir, move |env, _reporter, _token| async move {
            simple::mkdir(&env, &url, permissions).await
        })
    }

    /// Rename within a backend.
    pub fn rename(&self, src: ResourceUrl, dst: ResourceUrl, overwrite: bool) -> OpHandle<()> {
        self.spawn(OpKind::Rename, move |env, _reporter, _token| async move {
            simple::rename(&env, &src, &dst, overwrite).await
        })
    }

    /// Change permission bits.
    pub fn chmod(&self, url: ResourceUrl, permissions: i64) -> OpHandle<()> {
        self.spawn(OpKind::Chmod, move |env, _reporter, _token| async move {
            simple::chmod(&env, &url, permissions).await
        })
    }

    /// Set the modification time.
    pub fn set_modification_time(&self, url: ResourceUrl, mtime: i64) -> OpHandle<()> {
        self.spawn(
            OpKind::SetModificationTime,
            move |env, _reporter, _token| async move {
                simple::set_modification_time(&env, &url, mtime).await
            },
        )
    }

    /// Remove one resource.
    pub fn remove(&self, url: ResourceUrl, is_file: bool) -> OpHandle<()> {
        self.spawn(OpKind::Remove, move |env, _reporter, _token| async move {
            simple::remove(&env, &url, is_file).await
        })
    }

    /// Create a symlink.
    pub fn symlink(&self, target: String, dst: ResourceUrl, overwrite: bool) -> OpHandle<()> {
        self.spawn(OpKind::Symlink, move |env, _reporter, _token| async move {
            simple::symlink(&env, &target, &dst, overwrite).await
        })
    }

    // --- transfer operations -------------------------------------------

    /// Download a whole resource into memory.
    pub fn get(&self, url: ResourceUrl) -> OpHandle<Vec<u8>> {
        self.spawn(OpKind::Get, move |env, mut reporter, _token| async move {
            transfer::get(&env, &mut reporter, &url).await
        })
    }

    /// Upload a buffer.
    pub fn put(
        &self,
        url: ResourceUrl,
        data: Vec<u8>,
        permissions: i64,
        overwrite: bool,
    ) -> OpHandle<()> {
        self.spawn(OpKind::Put, move |env, mut reporter, _token| async move {
            transfer::put(&env, &mut reporter, &url, data, permissions, overwrite).await
        })
    }

    /// Copy one source to one destination, preferring backend-native copy and
    /// falling back to a get/put data pump.
    pub fn file_copy(&self, src: ResourceUrl, dst: ResourceUrl, flags: CopyFlags) -> OpHandle<()> {
        self.spawn(OpKind::FileCopy, move |env, mut reporter, _token| async move {
            file_copy::file_copy(&env, &mut reporter, &src, &dst, &flags).await
        })
    }

    // --- listing --------------------------------------------------------

    /// List a directory. Entries stream through the returned receiver; the
    /// handle resolves with the forwarded entry count.
    pub fn list_dir(
        &self,
        url: ResourceUrl,
        opts: ListOptions,
    ) -> (OpHandle<u64>, mpsc::Receiver<ListUpdate>) {
        let (tx, rx) = mpsc::channel(self.env.config.progress_buffer);
        let handle = self.spawn(OpKind::List, move |env, mut reporter, _token| async move {
            list::run_listing(&env, url, opts, &tx, Some(&mut reporter)).await
        });
        (handle, rx)
    }

    // --- orchestrators --------------------------------------------------

    /// Recursively copy sources into a destination.
    pub fn copy(&self, sources: Vec<ResourceUrl>, dest: ResourceUrl) -> OpHandle<CopySummary> {
        self.spawn(OpKind::Copy, move |env, mut reporter, _token| async move {
            copy_move::run(&env, &mut reporter, TransferMode::Copy, sources, dest).await
        })
    }

    /// Recursively move sources into a destination.
    pub fn move_to(&self, sources: Vec<ResourceUrl>, dest: ResourceUrl) -> OpHandle<CopySummary> {
        self.spawn(OpKind::Move, move |env, mut reporter, _token| async move {
            copy_move::run(&env, &mut reporter, TransferMode::Move, sources, dest).await
        })
    }

    /// Link sources into a destination.
    pub fn link(&self, sources: Vec<ResourceUrl>, dest: ResourceUrl) -> OpHandle<CopySummary> {
        self.spawn(OpKind::Link, move |env, mut reporter, _token| async move {
            copy_move::run(&env, &mut reporter, TransferMode::Link, sources, dest).await
        })
    }

    /// Recursively delete sources.
    pub fn delete(&self, sources: Vec<ResourceUrl>) -> OpHandle<DeleteSummary> {
        self.spawn(OpKind::Delete, move |env, mut reporter, _token| async move {
            delete::run(&env, &mut reporter, sources).await
        })
    }
}
