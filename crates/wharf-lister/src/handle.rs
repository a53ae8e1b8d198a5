//! Consumer-facing side of the listing cache.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use wharf_core::{EntryRecord, OpError, ResourceUrl};

use crate::cache::ListerCache;

/// Events a listing consumer receives, in order.
///
/// A fresh listing streams [`ListerEvent::Entries`] batches and ends with
/// [`ListerEvent::Completed`]. A consumer joining a directory that is already
/// held or cached first receives the current snapshot as one `Entries` batch.
/// A reload serves the stale snapshot first, then one [`ListerEvent::Refreshed`]
/// with the full new set once the fresh listing finishes.
#[derive(Debug, Clone)]
pub enum ListerEvent {
    /// New entries for the directory.
    Entries(Vec<EntryRecord>),
    /// The full entry set after a reload; supersedes everything seen so far.
    Refreshed(Vec<EntryRecord>),
    /// Entries changed in place, for example after an external rename.
    Changed(Vec<EntryRecord>),
    /// These resources disappeared from the directory.
    Removed(Vec<ResourceUrl>),
    /// The directory now lives at this URL.
    Redirect(ResourceUrl),
    /// The listing is complete; the entries seen so far are the full set.
    Completed,
    /// The listing failed. No further events follow.
    Failed(OpError),
}

/// One consumer's attachment to a directory in the cache.
///
/// Dropping the handle detaches it; when the last holder of a directory
/// detaches, the item is demoted to the cached registry or discarded.
#[derive(Debug)]
pub struct ListerHandle {
    pub(crate) url: ResourceUrl,
    pub(crate) holder_id: u64,
    pub(crate) rx: mpsc::UnboundedReceiver<ListerEvent>,
    pub(crate) cache: Weak<ListerCache>,
}

impl ListerHandle {
    /// The URL this handle is attached to.
    pub fn url(&self) -> &ResourceUrl {
        &self.url
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<ListerEvent> {
        self.rx.recv().await
    }

    /// Drain events until `Completed` or `Failed`, returning the resulting
    /// entry set. Snapshot and refresh batches replace what came before;
    /// plain batches accumulate.
    pub async fn collect(&mut self) -> Result<Vec<EntryRecord>, OpError> {
        let mut entries: Vec<EntryRecord> = Vec::new();
        while let Some(event) = self.rx.recv().await {
            match event {
                ListerEvent::Entries(batch) => entries.extend(batch),
                ListerEvent::Refreshed(full) => entries = full,
                ListerEvent::Changed(changed) => {
                    for record in changed {
                        entries.retain(|e| e.name() != record.name());
                        entries.push(record);
                    }
                }
                ListerEvent::Removed(urls) => {
                    for url in &urls {
                        if let Some(name) = url.file_name() {
                            entries.retain(|e| e.name() != name);
                        }
                    }
                }
                ListerEvent::Redirect(_) => {}
                ListerEvent::Completed => return Ok(entries),
                ListerEvent::Failed(err) => return Err(err),
            }
        }
        Err(OpError::internal("listing stream closed without completing"))
    }

    /// Stop listening. Equivalent to dropping the handle.
    pub fn forget(self) {}
}

impl Drop for ListerHandle {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.detach(&self.url, self.holder_id);
        }
    }
}

/// A consumer that holds one or more directories open through the cache.
///
/// `open_url` with `keep = false` releases everything held so far, matching
/// the usual single-view navigation pattern; `keep = true` adds the directory
/// to the held set, for tree views.
pub struct Lister {
    cache: Arc<ListerCache>,
    held: Vec<ListerHandle>,
}

impl Lister {
    pub fn new(cache: Arc<ListerCache>) -> Self {
        Self {
            cache,
            held: Vec::new(),
        }
    }

    /// Start (or join) a listing of `url`.
    pub fn open_url(&mut self, url: ResourceUrl, keep: bool, reload: bool) -> &mut ListerHandle {
        if !keep {
            self.held.clear();
        }
        let handle = self.cache.list_dir(url, reload);
        self.held.push(handle);
        self.held.last_mut().expect("just pushed")
    }

    /// Release one held directory.
    pub fn forget_dir(&mut self, url: &ResourceUrl) {
        self.held.retain(|h| h.url() != url);
    }

    /// URLs currently held by this consumer.
    pub fn held_urls(&self) -> Vec<ResourceUrl> {
        self.held.iter().map(|h| h.url().clone()).collect()
    }
}
