//! Progress reporting types for operations.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use wharf_core::ResourceUrl;

/// The kind of operation reporting progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    Stat,
    Mkdir,
    Rename,
    Chmod,
    SetModificationTime,
    Remove,
    Symlink,
    Get,
    Put,
    FileCopy,
    List,
    Copy,
    Move,
    Link,
    Delete,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Stat => "stat",
            Self::Mkdir => "mkdir",
            Self::Rename => "rename",
            Self::Chmod => "chmod",
            Self::SetModificationTime => "set mtime",
            Self::Remove => "remove",
            Self::Symlink => "symlink",
            Self::Get => "get",
            Self::Put => "put",
            Self::FileCopy => "copy file",
            Self::List => "list",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Link => "link",
            Self::Delete => "delete",
        };
        write!(f, "{label}")
    }
}

/// A progress snapshot for an ongoing operation.
#[derive(Debug, Clone)]
pub struct OpProgress {
    pub kind: OpKind,
    /// Bytes processed so far.
    pub processed_bytes: u64,
    /// Total bytes to process (0 if unknown).
    pub total_bytes: u64,
    /// Items (files, dirs, entries) processed so far.
    pub processed_items: u64,
    /// Total items to process (0 if unknown).
    pub total_items: u64,
    /// The resource currently being processed.
    pub current: Option<ResourceUrl>,
}

impl OpProgress {
    /// Progress as a percentage (0.0 to 100.0), by bytes when known,
    /// otherwise by item count.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.processed_bytes as f64 / self.total_bytes as f64) * 100.0
        } else if self.total_items > 0 {
            (self.processed_items as f64 / self.total_items as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Operation-side progress accumulator.
///
/// Emission is lossy on purpose: a slow or absent consumer never stalls the
/// operation.
#[derive(Debug)]
pub(crate) struct Reporter {
    kind: OpKind,
    tx: mpsc::Sender<OpProgress>,
    pub processed_bytes: u64,
    pub total_bytes: u64,
    pub processed_items: u64,
    pub total_items: u64,
    pub current: Option<ResourceUrl>,
    /// Progress reporting is suspended, e.g. while a conflict decision is
    /// pending.
    muted: bool,
}

impl Reporter {
    pub fn new(kind: OpKind, tx: mpsc::Sender<OpProgress>) -> Self {
        Self {
            kind,
            tx,
            processed_bytes: 0,
            total_bytes: 0,
            processed_items: 0,
            total_items: 0,
            current: None,
            muted: false,
        }
    }

    pub fn snapshot(&self) -> OpProgress {
        OpProgress {
            kind: self.kind,
            processed_bytes: self.processed_bytes,
            total_bytes: self.total_bytes,
            processed_items: self.processed_items,
            total_items: self.total_items,
            current: self.current.clone(),
        }
    }

    /// Emit a snapshot unless muted.
    pub fn emit(&self) {
        if !self.muted {
            let _ = self.tx.try_send(self.snapshot());
        }
    }

    pub fn mute(&mut self) {
        self.muted = true;
    }

    pub fn unmute(&mut self) {
        self.muted = false;
    }
}
