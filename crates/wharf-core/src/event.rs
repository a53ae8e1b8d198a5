//! The command/event wire between an operation and a backend worker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{EntryRecord, OpError, ResourceUrl};

/// A request sent to a backend worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Stat one resource; the worker answers with a single-entry `Entries`.
    Stat { url: ResourceUrl },
    /// List one directory; entries arrive in one or more `Entries` batches.
    ListDir { url: ResourceUrl },
    /// Create one directory. `permissions < 0` means backend default.
    Mkdir { url: ResourceUrl, permissions: i64 },
    /// Rename within the backend (or to/from a local file when the backend
    /// advertises that capability).
    Rename {
        src: ResourceUrl,
        dst: ResourceUrl,
        overwrite: bool,
    },
    /// Change permission bits.
    Chmod { url: ResourceUrl, permissions: i64 },
    /// Set the modification time (seconds since the epoch).
    SetModificationTime { url: ResourceUrl, mtime: i64 },
    /// Remove one resource. Directories are removed recursively only when
    /// the backend advertises recursive deletion.
    Remove { url: ResourceUrl, is_file: bool },
    /// Create a symlink at `dst` pointing at `target`.
    Symlink {
        target: String,
        dst: ResourceUrl,
        overwrite: bool,
    },
    /// Open a read stream; data arrives in `Data` events.
    Get { url: ResourceUrl, offset: u64 },
    /// Open a write stream; the worker first reports `CanResume`, then pulls
    /// chunks via `DataRequested`.
    Put {
        url: ResourceUrl,
        permissions: i64,
        overwrite: bool,
        resume: bool,
    },
    /// Backend-native copy, when source and destination are reachable from
    /// one worker (or one side is a local file the backend can touch).
    CopyNative {
        src: ResourceUrl,
        dst: ResourceUrl,
        permissions: i64,
        overwrite: bool,
    },
    /// One chunk of upload data. An empty chunk ends the stream.
    Data(Vec<u8>),
    /// Answer to `CanResume`: whether the transfer resumes at the offered
    /// offset.
    ResumeAnswer(bool),
}

impl WorkerCommand {
    /// The URL a fresh submission of this command targets, if it has one.
    pub fn url(&self) -> Option<&ResourceUrl> {
        match self {
            Self::Stat { url }
            | Self::ListDir { url }
            | Self::Mkdir { url, .. }
            | Self::Chmod { url, .. }
            | Self::SetModificationTime { url, .. }
            | Self::Remove { url, .. }
            | Self::Get { url, .. }
            | Self::Put { url, .. } => Some(url),
            Self::Rename { src, .. } | Self::CopyNative { src, .. } => Some(src),
            Self::Symlink { dst, .. } => Some(dst),
            Self::Data(_) | Self::ResumeAnswer(_) => None,
        }
    }

    /// Rewrite the target URL after a redirect.
    pub fn with_url(&self, url: ResourceUrl) -> Self {
        let mut cmd = self.clone();
        match &mut cmd {
            Self::Stat { url: u }
            | Self::ListDir { url: u }
            | Self::Mkdir { url: u, .. }
            | Self::Chmod { url: u, .. }
            | Self::SetModificationTime { url: u, .. }
            | Self::Remove { url: u, .. }
            | Self::Get { url: u, .. }
            | Self::Put { url: u, .. } => *u = url,
            Self::Rename { src, .. } | Self::CopyNative { src, .. } => *src = url,
            Self::Symlink { dst, .. } => *dst = url,
            Self::Data(_) | Self::ResumeAnswer(_) => {}
        }
        cmd
    }
}

/// An event produced by a backend worker.
///
/// Events for one worker arrive in the order the backend produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerEvent {
    /// The exchange failed. At most one per exchange; terminal.
    Error(OpError),
    /// The exchange completed successfully. Terminal.
    Finished,
    /// One chunk of download data. An empty chunk ends the stream.
    Data(Vec<u8>),
    /// The worker wants the next upload chunk.
    DataRequested,
    /// A batch of listing/stat entries.
    Entries(Vec<EntryRecord>),
    /// The resource lives elsewhere; the operation should re-submit there.
    Redirect(ResourceUrl),
    /// A put destination reported resumability: `offset` bytes already exist.
    CanResume(u64),
    /// Free-form backend metadata.
    MetaData(HashMap<String, String>),
}
