//! Shared listing cache.
//!
//! One directory is listed at most once no matter how many consumers ask for
//! it: the first request starts a listing operation, later requests replay
//! what has arrived so far and join the same stream. Idle complete items are
//! demoted to a bounded cached registry and revived on the next request;
//! change notices from the rest of the engine keep both registries coherent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use indexmap::IndexMap;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use wharf_core::{ChangeNotice, EngineConfig, EntryRecord, Notifier, OpError, ResourceUrl};
use wharf_ops::{Engine, ListOptions, ListUpdate};

use crate::dir_item::DirItem;
use crate::handle::{ListerEvent, ListerHandle};

/// One consumer attached to an in-use directory.
struct Holder {
    id: u64,
    tx: mpsc::UnboundedSender<ListerEvent>,
}

impl Holder {
    fn send(&self, event: ListerEvent) {
        let _ = self.tx.send(event);
    }
}

/// A listing operation currently feeding an item.
struct ListingState {
    cancel: CancellationToken,
    /// Entries received so far. Replaces the item's snapshot on completion.
    fresh: Vec<EntryRecord>,
}

/// An in-use directory: the item plus everyone holding it.
struct Slot {
    item: DirItem,
    holders: Vec<Holder>,
    listing: Option<ListingState>,
}

impl Slot {
    fn broadcast(&self, event: &ListerEvent) {
        for holder in &self.holders {
            holder.send(event.clone());
        }
    }
}

struct CacheState {
    /// Directories with at least one holder or a listing in flight.
    in_use: HashMap<ResourceUrl, Slot>,
    /// Idle complete items, oldest first. Bounded.
    cached: IndexMap<ResourceUrl, DirItem>,
    /// Mount roots whose items must not carry a passive watch.
    removable: Vec<ResourceUrl>,
    next_holder: u64,
    closed: bool,
}

/// The listing cache service.
pub struct ListerCache {
    engine: Arc<Engine>,
    notifier: Arc<Notifier>,
    config: EngineConfig,
    state: Mutex<CacheState>,
}

impl ListerCache {
    /// Create the cache and start consuming change notices in the background.
    pub fn new(engine: Arc<Engine>, notifier: Arc<Notifier>, config: EngineConfig) -> Arc<Self> {
        let cache = Arc::new(Self {
            engine,
            notifier: notifier.clone(),
            config,
            state: Mutex::new(CacheState {
                in_use: HashMap::new(),
                cached: IndexMap::new(),
                removable: Vec::new(),
                next_holder: 0,
                closed: false,
            }),
        });
        let weak = Arc::downgrade(&cache);
        let mut notices = notifier.subscribe();
        tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => {
                        let Some(cache) = weak.upgrade() else { break };
                        cache.apply_notice(&notice);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "listing cache missed change notices");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        cache
    }

    /// Attach a consumer to `url`, starting a listing only when needed.
    ///
    /// Held directories replay their current contents immediately; a listing
    /// already in flight gains an extra listener instead of a second
    /// operation; otherwise a cached item is revived or a fresh listing
    /// starts. `reload` always starts a fresh listing but still serves the
    /// stale snapshot first.
    pub fn list_dir(self: &Arc<Self>, url: ResourceUrl, reload: bool) -> ListerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().expect("cache lock poisoned");
        let id = state.next_holder;
        state.next_holder += 1;
        let handle = ListerHandle {
            url: url.clone(),
            holder_id: id,
            rx,
            cache: Arc::downgrade(self),
        };
        if state.closed {
            let _ = tx.send(ListerEvent::Failed(OpError::cancelled()));
            return handle;
        }

        // Revive a cached item unless the directory is already in use.
        if !state.in_use.contains_key(&url) {
            if let Some(mut item) = state.cached.shift_remove(&url) {
                item.set_watched(false);
                tracing::debug!(url = %url, "cached listing revived");
                state.in_use.insert(
                    url.clone(),
                    Slot {
                        item,
                        holders: Vec::new(),
                        listing: None,
                    },
                );
            }
        }

        let needs_listing = match state.in_use.get_mut(&url) {
            Some(slot) => {
                if slot.item.is_complete() {
                    let _ = tx.send(ListerEvent::Entries(slot.item.entries().to_vec()));
                    if slot.listing.is_none() && !reload {
                        let _ = tx.send(ListerEvent::Completed);
                    }
                } else if let Some(listing) = &slot.listing {
                    if !listing.fresh.is_empty() {
                        let _ = tx.send(ListerEvent::Entries(listing.fresh.clone()));
                    }
                }
                let start = slot.listing.is_none() && (reload || !slot.item.is_complete());
                slot.holders.push(Holder { id, tx });
                start
            }
            None => {
                state.in_use.insert(
                    url.clone(),
                    Slot {
                        item: DirItem::new(url.clone()),
                        holders: vec![Holder { id, tx }],
                        listing: None,
                    },
                );
                true
            }
        };
        if needs_listing {
            self.start_listing(&mut state, &url);
        }
        handle
    }

    /// Suppress passive watches for items under this mount root.
    pub fn mark_removable(&self, root: ResourceUrl) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        if !state.removable.contains(&root) {
            state.removable.push(root);
        }
    }

    /// Drop a cached item so the next request lists afresh.
    pub fn forget_cached(&self, url: &ResourceUrl) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.cached.shift_remove(url);
    }

    /// Cancel in-flight listings and clear both registries. Attached
    /// consumers receive a failure event.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.closed = true;
        for (_, slot) in state.in_use.drain() {
            if let Some(listing) = &slot.listing {
                listing.cancel.cancel();
            }
            for holder in &slot.holders {
                holder.send(ListerEvent::Failed(OpError::cancelled()));
            }
        }
        state.cached.clear();
    }

    /// Idle cached directories with their watch state, oldest first.
    pub fn cached_dirs(&self) -> Vec<(ResourceUrl, bool)> {
        let state = self.state.lock().expect("cache lock poisoned");
        state
            .cached
            .values()
            .map(|item| (item.url().clone(), item.is_watched()))
            .collect()
    }

    /// Directories currently in use.
    pub fn held_dirs(&self) -> Vec<ResourceUrl> {
        let state = self.state.lock().expect("cache lock poisoned");
        state.in_use.keys().cloned().collect()
    }

    /// Apply one change notice to both registries.
    ///
    /// Normally driven by the background subscription; exposed so callers
    /// with out-of-band knowledge can patch the cache directly.
    pub fn apply_notice(self: &Arc<Self>, notice: &ChangeNotice) {
        match notice {
            ChangeNotice::FilesAdded(dir) => self.on_files_added(dir),
            ChangeNotice::FilesRemoved(urls) => self.on_files_removed(urls),
            ChangeNotice::FileRenamed { src, dst } => self.on_file_renamed(src, dst),
        }
    }

    fn on_files_added(self: &Arc<Self>, dir: &ResourceUrl) {
        if self.notifier.updates_paused(dir) {
            return;
        }
        let mut state = self.state.lock().expect("cache lock poisoned");
        let refresh = match state.in_use.get(dir) {
            Some(slot) => slot.listing.is_none(),
            None => false,
        };
        if refresh {
            tracing::debug!(url = %dir, "held listing refreshed after change");
            self.start_listing(&mut state, dir);
        } else if !state.in_use.contains_key(dir) {
            // A stale idle snapshot is worse than none.
            state.cached.shift_remove(dir);
        }
    }

    fn on_files_removed(self: &Arc<Self>, urls: &[ResourceUrl]) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        for url in urls {
            Self::evict_subtree(&mut state, url);
            let Some(parent) = url.parent() else { continue };
            if self.notifier.updates_paused(&parent) {
                continue;
            }
            let Some(name) = url.file_name() else { continue };
            if let Some(slot) = state.in_use.get_mut(&parent) {
                if slot.item.remove_entry(name) {
                    slot.broadcast(&ListerEvent::Removed(vec![url.clone()]));
                }
            } else if let Some(item) = state.cached.get_mut(&parent) {
                item.remove_entry(name);
            }
        }
    }

    fn on_file_renamed(self: &Arc<Self>, src: &ResourceUrl, dst: &ResourceUrl) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        Self::rekey_subtree(&mut state, src, dst);

        let (Some(src_parent), Some(src_name)) = (src.parent(), src.file_name()) else {
            return;
        };
        let same_parent = dst.parent().as_ref() == Some(&src_parent);
        if !self.notifier.updates_paused(&src_parent) {
            if let Some(slot) = state.in_use.get_mut(&src_parent) {
                if same_parent {
                    if let (Some(entry), Some(new_name)) =
                        (slot.item.find_entry_mut(src_name), dst.file_name())
                    {
                        entry.set_name(new_name);
                        let changed = entry.clone();
                        slot.broadcast(&ListerEvent::Changed(vec![changed]));
                    }
                } else if slot.item.remove_entry(src_name) {
                    slot.broadcast(&ListerEvent::Removed(vec![src.clone()]));
                }
            } else if let Some(item) = state.cached.get_mut(&src_parent) {
                if same_parent {
                    if let (Some(entry), Some(new_name)) =
                        (item.find_entry_mut(src_name), dst.file_name())
                    {
                        entry.set_name(new_name);
                    }
                } else {
                    item.remove_entry(src_name);
                }
            }
        }

        // A cross-directory move also lands something new in the
        // destination's parent.
        if !same_parent {
            if let Some(dst_parent) = dst.parent() {
                drop(state);
                self.on_files_added(&dst_parent);
            }
        }
    }

    // --- internals ------------------------------------------------------

    fn start_listing(self: &Arc<Self>, state: &mut CacheState, url: &ResourceUrl) {
        let Some(slot) = state.in_use.get_mut(url) else {
            return;
        };
        let cancel = CancellationToken::new();
        slot.listing = Some(ListingState {
            cancel: cancel.clone(),
            fresh: Vec::new(),
        });
        tracing::debug!(url = %url, "listing started");
        let cache = Arc::downgrade(self);
        let engine = self.engine.clone();
        let url = url.clone();
        let list_hidden = self.config.list_hidden;
        tokio::spawn(drive_listing(cache, engine, url, cancel, list_hidden));
    }

    fn on_batch(&self, url: &ResourceUrl, batch: Vec<EntryRecord>) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        let Some(slot) = state.in_use.get_mut(url) else {
            return;
        };
        match slot.listing.as_mut() {
            Some(listing) => listing.fresh.extend(batch.iter().cloned()),
            None => return,
        }
        // During a refresh the stale snapshot stays authoritative until the
        // fresh set is complete.
        if !slot.item.is_complete() {
            slot.broadcast(&ListerEvent::Entries(batch));
        }
    }

    fn on_redirect(&self, url: &ResourceUrl, target: ResourceUrl) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        let Some(slot) = state.in_use.get_mut(url) else {
            return;
        };
        slot.item.set_url(target.clone());
        slot.broadcast(&ListerEvent::Redirect(target));
    }

    fn on_listing_done(&self, url: &ResourceUrl, result: Result<(), OpError>) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        let mut idle = false;
        let mut discard = false;
        {
            let Some(slot) = state.in_use.get_mut(url) else {
                return;
            };
            let Some(listing) = slot.listing.take() else {
                return;
            };
            match result {
                Ok(()) => {
                    let was_refresh = slot.item.is_complete();
                    slot.item.replace_entries(listing.fresh);
                    if was_refresh {
                        slot.broadcast(&ListerEvent::Refreshed(slot.item.entries().to_vec()));
                    }
                    slot.broadcast(&ListerEvent::Completed);
                    idle = slot.holders.is_empty();
                }
                Err(err) => {
                    tracing::debug!(url = %url, error = %err, "listing failed");
                    slot.broadcast(&ListerEvent::Failed(err));
                    slot.holders.clear();
                    if slot.item.is_complete() {
                        // Refresh failed; the stale snapshot is still usable.
                        idle = true;
                    } else {
                        discard = true;
                    }
                }
            }
        }
        if discard {
            state.in_use.remove(url);
        } else if idle {
            if let Some(slot) = state.in_use.remove(url) {
                self.demote(&mut state, slot.item);
            }
        }
    }

    pub(crate) fn detach(&self, url: &ResourceUrl, holder_id: u64) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        let Some(slot) = state.in_use.get_mut(url) else {
            return;
        };
        slot.holders.retain(|h| h.id != holder_id);
        if !slot.holders.is_empty() {
            return;
        }
        if let Some(listing) = &slot.listing {
            // Nobody is waiting any more; the completion callback will
            // demote or discard the item.
            listing.cancel.cancel();
            return;
        }
        if let Some(slot) = state.in_use.remove(url) {
            if slot.item.is_complete() {
                self.demote(&mut state, slot.item);
            }
        }
    }

    /// Move an idle complete item to the cached registry, evicting the
    /// oldest entries past the bound.
    fn demote(&self, state: &mut CacheState, mut item: DirItem) {
        let url = item.url().clone();
        let watch = !state
            .removable
            .iter()
            .any(|root| root == &url || root.is_ancestor_of(&url));
        item.set_watched(watch);
        if watch {
            tracing::debug!(url = %url, "item demoted, passive watch enabled");
        } else {
            tracing::debug!(url = %url, "item demoted, watch suppressed for removable mount");
        }
        state.cached.shift_remove(&url);
        state.cached.insert(url, item);
        while state.cached.len() > self.config.lister_cache_bound {
            state.cached.shift_remove_index(0);
        }
    }

    /// Drop the item for a removed directory and everything cached below it.
    fn evict_subtree(state: &mut CacheState, url: &ResourceUrl) {
        let gone: Vec<ResourceUrl> = state
            .in_use
            .keys()
            .filter(|key| *key == url || url.is_ancestor_of(key))
            .cloned()
            .collect();
        for key in gone {
            if let Some(mut slot) = state.in_use.remove(&key) {
                if let Some(listing) = slot.listing.take() {
                    listing.cancel.cancel();
                }
                for holder in &slot.holders {
                    holder.send(ListerEvent::Removed(vec![key.clone()]));
                }
            }
        }
        state
            .cached
            .retain(|key, _| !(key == url || url.is_ancestor_of(key)));
    }

    /// Re-key items under a renamed directory to its new location.
    fn rekey_subtree(state: &mut CacheState, src: &ResourceUrl, dst: &ResourceUrl) {
        let rebase = |key: &ResourceUrl| -> ResourceUrl {
            match key.relative_to(src) {
                Some(rest) if !rest.is_empty() => dst.join(rest),
                _ => dst.clone(),
            }
        };
        let held: Vec<ResourceUrl> = state
            .in_use
            .keys()
            .filter(|key| *key == src || src.is_ancestor_of(key))
            .cloned()
            .collect();
        for key in held {
            if let Some(mut slot) = state.in_use.remove(&key) {
                let new_key = rebase(&key);
                slot.item.set_url(new_key.clone());
                slot.broadcast(&ListerEvent::Redirect(new_key.clone()));
                state.in_use.insert(new_key, slot);
            }
        }
        let cached: Vec<ResourceUrl> = state
            .cached
            .keys()
            .filter(|key| *key == src || src.is_ancestor_of(key))
            .cloned()
            .collect();
        for key in cached {
            if let Some(mut item) = state.cached.shift_remove(&key) {
                let new_key = rebase(&key);
                item.set_url(new_key.clone());
                state.cached.insert(new_key, item);
            }
        }
    }
}

/// Pump one listing operation's updates into the cache.
async fn drive_listing(
    cache: Weak<ListerCache>,
    engine: Arc<Engine>,
    url: ResourceUrl,
    cancel: CancellationToken,
    list_hidden: bool,
) {
    let opts = ListOptions {
        recursive: false,
        include_hidden: list_hidden,
    };
    let (handle, mut updates) = engine.list_dir(url.clone(), opts);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                handle.kill();
                break;
            }
            update = updates.recv() => match update {
                Some(ListUpdate::Entries(batch)) => {
                    let Some(cache) = cache.upgrade() else {
                        handle.kill();
                        return;
                    };
                    cache.on_batch(&url, batch);
                }
                Some(ListUpdate::Redirect(target)) => {
                    let Some(cache) = cache.upgrade() else {
                        handle.kill();
                        return;
                    };
                    cache.on_redirect(&url, target);
                }
                None => break,
            }
        }
    }
    let result = handle.wait().await.map(|_count| ());
    if let Some(cache) = cache.upgrade() {
        cache.on_listing_done(&url, result);
    }
}
