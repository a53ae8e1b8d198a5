//! Asynchronous operation engine for wharf.
//!
//! Operations are cooperative state machines driven by backend worker events.
//! An [`Engine`] owns running operations in a registry keyed by id and hands
//! the caller an [`OpHandle`]: a progress stream plus a completion future.
//! Orchestrators (recursive copy/move/link, recursive delete) compose the
//! primitive operations one child at a time.

mod copy_move;
mod delete;
mod file_copy;
mod list;
mod operation;
mod progress;
mod simple;
mod transfer;

pub use copy_move::{CopyInfo, CopyPhase, CopySummary, TransferMode};
pub use delete::DeleteSummary;
pub use file_copy::CopyFlags;
pub use list::{ListOptions, ListUpdate};
pub use operation::{Engine, OpHandle, OpId};
pub use progress::{OpKind, OpProgress};
