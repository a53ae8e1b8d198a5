//! Local filesystem backend.
//!
//! Serves `file://` URLs by running filesystem calls on the blocking thread
//! pool behind the standard worker command/event exchange. Pair
//! [`LocalDispatch`] with [`wharf_core::LocalCapabilities`] when building an
//! engine for local paths.

mod dispatch;
mod worker;

pub use dispatch::LocalDispatch;
pub use wharf_core::LocalCapabilities;
