//! Core types and backend interfaces for wharf.
//!
//! This crate defines the vocabulary shared by every wharf component: URLs,
//! directory entry records, the error taxonomy, the command/event wire between
//! an operation and its backend worker, and the traits for the external
//! collaborators (dispatcher, capability registry, interaction service,
//! notification service).

mod capability;
mod config;
mod dispatch;
mod entry;
mod error;
mod event;
mod interact;
mod notify;
pub mod testing;
mod url;
mod worker;

pub use capability::{Capabilities, CopyNameSource, LocalCapabilities};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use dispatch::Dispatch;
pub use entry::{EntryField, EntryRecord, EntryValue, FILE_TYPE_DIR, FILE_TYPE_FILE, FILE_TYPE_SYMLINK};
pub use error::{ErrorKind, OpError};
pub use event::{WorkerCommand, WorkerEvent};
pub use interact::{
    AutoConflictPolicy, AutoInteract, ConflictKind, ConflictPrompt, Interact, OverwriteDecision,
    SkipDecision,
};
pub use notify::{ChangeNotice, Notifier};
pub use url::ResourceUrl;
pub use worker::{worker_channel, WorkerEndpoint, WorkerHandle};

/// Default channel buffer size for worker command/event exchanges.
pub const WORKER_CHANNEL_SIZE: usize = 64;
