//! Shared directory listing cache.
//!
//! Sits on top of [`wharf_ops::Engine`]: consumers ask for directories
//! through [`ListerCache::list_dir`] and the cache makes sure each directory
//! is listed at most once, replays held snapshots instantly, keeps a bounded
//! registry of idle items, and patches everything with the engine's change
//! notices.

mod cache;
mod dir_item;
mod handle;

pub use cache::ListerCache;
pub use dir_item::DirItem;
pub use handle::{Lister, ListerEvent, ListerHandle};
