//! Change notification service.
//!
//! Successful operations broadcast what they changed; the listing cache
//! consumes the same broadcasts to keep unrelated views coherent. The delete
//! orchestrator additionally pauses per-directory update notifications while
//! it works, so a large deletion does not produce a storm of change events.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::ResourceUrl;

/// What changed, as broadcast after a successful operation.
#[derive(Debug, Clone)]
pub enum ChangeNotice {
    /// New entries appeared inside this directory.
    FilesAdded(ResourceUrl),
    /// These resources were removed.
    FilesRemoved(Vec<ResourceUrl>),
    /// A resource moved.
    FileRenamed { src: ResourceUrl, dst: ResourceUrl },
}

/// Process-wide notification hub.
#[derive(Debug)]
pub struct Notifier {
    tx: broadcast::Sender<ChangeNotice>,
    /// Reference-counted update suppression per directory.
    paused: Mutex<HashMap<ResourceUrl, usize>>,
    /// Total pause/resume call pairs, observable for verification.
    pause_calls: Mutex<u64>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            paused: Mutex::new(HashMap::new()),
            pause_calls: Mutex::new(0),
        }
    }

    /// Subscribe to change notices.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.tx.subscribe()
    }

    pub fn files_added(&self, dir: ResourceUrl) {
        let _ = self.tx.send(ChangeNotice::FilesAdded(dir));
    }

    pub fn files_removed(&self, urls: Vec<ResourceUrl>) {
        if !urls.is_empty() {
            let _ = self.tx.send(ChangeNotice::FilesRemoved(urls));
        }
    }

    pub fn file_renamed(&self, src: ResourceUrl, dst: ResourceUrl) {
        let _ = self.tx.send(ChangeNotice::FileRenamed { src, dst });
    }

    /// Suppress live-update notifications for these directories. Balanced by
    /// [`Notifier::resume_updates`]; nesting is reference-counted.
    pub fn pause_updates(&self, dirs: &[ResourceUrl]) {
        let mut paused = self.paused.lock().expect("notifier lock poisoned");
        for dir in dirs {
            *paused.entry(dir.clone()).or_insert(0) += 1;
        }
        *self.pause_calls.lock().expect("notifier lock poisoned") += 1;
    }

    /// Re-enable live-update notifications for these directories.
    pub fn resume_updates(&self, dirs: &[ResourceUrl]) {
        let mut paused = self.paused.lock().expect("notifier lock poisoned");
        for dir in dirs {
            if let Some(count) = paused.get_mut(dir) {
                *count -= 1;
                if *count == 0 {
                    paused.remove(dir);
                }
            }
        }
    }

    /// Whether updates for this directory are currently suppressed.
    pub fn updates_paused(&self, dir: &ResourceUrl) -> bool {
        self.paused
            .lock()
            .expect("notifier lock poisoned")
            .contains_key(dir)
    }

    /// How many times a pause was issued. Each logical suppression window is
    /// exactly one call.
    pub fn pause_call_count(&self) -> u64 {
        *self.pause_calls.lock().expect("notifier lock poisoned")
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_is_reference_counted() {
        let notifier = Notifier::new();
        let dir = ResourceUrl::parse("/a").unwrap();
        notifier.pause_updates(std::slice::from_ref(&dir));
        notifier.pause_updates(std::slice::from_ref(&dir));
        notifier.resume_updates(std::slice::from_ref(&dir));
        assert!(notifier.updates_paused(&dir));
        notifier.resume_updates(std::slice::from_ref(&dir));
        assert!(!notifier.updates_paused(&dir));
        assert_eq!(notifier.pause_call_count(), 2);
    }

    #[tokio::test]
    async fn broadcasts_reach_subscribers() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        notifier.files_added(ResourceUrl::parse("/dir").unwrap());
        match rx.recv().await.unwrap() {
            ChangeNotice::FilesAdded(url) => assert_eq!(url.path(), "/dir"),
            other => panic!("unexpected notice: {other:?}"),
        }
    }
}
