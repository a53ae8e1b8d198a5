//! Interaction service: conflict and skip decisions.
//!
//! Orchestrators never render dialogs; they describe the conflict and wait
//! for a decision. A GUI would bridge this trait to its dialog stack; tests
//! and the CLI use [`AutoInteract`].

use async_trait::async_trait;

use serde::{Deserialize, Serialize};

use crate::{OpError, ResourceUrl};

/// What kind of conflict is being decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// A file already exists at the destination.
    FileExists,
    /// A directory already exists at the destination.
    DirExists,
    /// Source and destination denote the same object.
    SameObject,
}

/// Everything a dialog needs to describe an overwrite conflict.
#[derive(Debug, Clone)]
pub struct ConflictPrompt {
    pub kind: ConflictKind,
    pub src: ResourceUrl,
    pub dst: ResourceUrl,
    /// Source and destination sizes, when known.
    pub src_size: Option<i64>,
    pub dst_size: Option<i64>,
    /// Source and destination mtimes (epoch seconds), when known.
    pub src_mtime: Option<i64>,
    pub dst_mtime: Option<i64>,
    /// A partial destination exists and the backend can resume into it.
    pub offer_resume: bool,
}

impl ConflictPrompt {
    pub fn new(kind: ConflictKind, src: ResourceUrl, dst: ResourceUrl) -> Self {
        Self {
            kind,
            src,
            dst,
            src_size: None,
            dst_size: None,
            src_mtime: None,
            dst_mtime: None,
            offer_resume: false,
        }
    }
}

/// Decision for an overwrite conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverwriteDecision {
    /// Abort the whole orchestration.
    Cancel,
    /// Copy to this new destination instead.
    Rename(ResourceUrl),
    /// Skip this item.
    Skip,
    /// Skip this and every later conflict.
    AutoSkip,
    /// Overwrite the destination.
    Overwrite,
    /// Overwrite this and every later conflict.
    OverwriteAll,
    /// Source and destination are the same object; nothing to do.
    OverwriteItself,
    /// Resume the partial destination at its current offset.
    Resume,
    /// Resume this and every later partial destination.
    ResumeAll,
}

/// Decision for a non-conflict failure the user may want to skip past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    Skip,
    AutoSkip,
    Cancel,
}

/// Asynchronous decision source for conflicts.
#[async_trait]
pub trait Interact: Send + Sync {
    /// Decide an overwrite conflict.
    async fn decide_overwrite(&self, prompt: ConflictPrompt) -> OverwriteDecision;

    /// Decide whether to skip past a failed item. `multiple` is true when
    /// more items follow, making Skip/AutoSkip meaningful.
    async fn decide_skip(&self, multiple: bool, error: &OpError) -> SkipDecision;
}

/// Fixed-policy decisions, for tests and non-interactive callers.
#[derive(Debug, Clone, Copy)]
pub struct AutoInteract {
    pub on_conflict: AutoConflictPolicy,
    pub skip_failures: bool,
}

/// Preset conflict policy for [`AutoInteract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoConflictPolicy {
    Skip,
    Overwrite,
    Cancel,
}

impl AutoInteract {
    /// Skip every conflict, fail on every error.
    pub fn skipping() -> Self {
        Self {
            on_conflict: AutoConflictPolicy::Skip,
            skip_failures: false,
        }
    }

    /// Overwrite every conflict.
    pub fn overwriting() -> Self {
        Self {
            on_conflict: AutoConflictPolicy::Overwrite,
            skip_failures: false,
        }
    }

    /// Cancel on the first conflict.
    pub fn cancelling() -> Self {
        Self {
            on_conflict: AutoConflictPolicy::Cancel,
            skip_failures: false,
        }
    }
}

#[async_trait]
impl Interact for AutoInteract {
    async fn decide_overwrite(&self, prompt: ConflictPrompt) -> OverwriteDecision {
        if prompt.kind == ConflictKind::SameObject {
            return OverwriteDecision::OverwriteItself;
        }
        match self.on_conflict {
            AutoConflictPolicy::Skip => OverwriteDecision::AutoSkip,
            AutoConflictPolicy::Overwrite => OverwriteDecision::OverwriteAll,
            AutoConflictPolicy::Cancel => OverwriteDecision::Cancel,
        }
    }

    async fn decide_skip(&self, _multiple: bool, _error: &OpError) -> SkipDecision {
        if self.skip_failures {
            SkipDecision::AutoSkip
        } else {
            SkipDecision::Cancel
        }
    }
}
