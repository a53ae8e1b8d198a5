//! Listing cache behavior against the in-memory backend.

use std::sync::Arc;

use wharf_core::testing::{MemoryBackend, MemoryCapabilities, MemoryDispatch};
use wharf_core::{
    AutoInteract, ChangeNotice, EngineConfig, EntryRecord, ErrorKind, Notifier, ResourceUrl,
};
use wharf_lister::{Lister, ListerCache, ListerEvent};
use wharf_ops::Engine;

fn url(s: &str) -> ResourceUrl {
    s.parse().expect("test url")
}

struct Rig {
    backend: MemoryBackend,
    notifier: Arc<Notifier>,
    cache: Arc<ListerCache>,
}

fn rig_with_config(config: EngineConfig) -> Rig {
    let backend = MemoryBackend::new();
    let notifier = Arc::new(Notifier::new());
    let engine = Engine::new(
        Arc::new(MemoryDispatch::new(backend.clone())),
        Arc::new(MemoryCapabilities::default()),
        Arc::new(AutoInteract::cancelling()),
        notifier.clone(),
        config.clone(),
    );
    let cache = ListerCache::new(engine, notifier.clone(), config);
    Rig {
        backend,
        notifier,
        cache,
    }
}

fn rig() -> Rig {
    rig_with_config(EngineConfig::default())
}

fn names(entries: &[EntryRecord]) -> Vec<String> {
    let mut out: Vec<String> = entries.iter().map(|e| e.name().to_string()).collect();
    out.sort();
    out
}

fn list_lines(log: &[String]) -> usize {
    log.iter().filter(|line| line.starts_with("list ")).count()
}

#[tokio::test]
async fn two_consumers_share_one_listing() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/a"), b"aa".to_vec());
    rig.backend.add_file(&url("mem://h/d/b"), b"bbb".to_vec());

    let mut first = rig.cache.list_dir(url("mem://h/d"), false);
    let mut second = rig.cache.list_dir(url("mem://h/d"), false);

    let entries_first = first.collect().await.unwrap();
    let entries_second = second.collect().await.unwrap();

    assert_eq!(names(&entries_first), vec![".", "a", "b"]);
    assert_eq!(names(&entries_first), names(&entries_second));
    assert_eq!(list_lines(&rig.backend.log()), 1);
}

#[tokio::test]
async fn idle_item_is_demoted_and_revived_without_relisting() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/a"), b"aa".to_vec());

    let mut handle = rig.cache.list_dir(url("mem://h/d"), false);
    let entries = handle.collect().await.unwrap();
    drop(handle);

    let cached = rig.cache.cached_dirs();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].0, url("mem://h/d"));
    assert!(cached[0].1, "idle item should carry a passive watch");

    let mut revived = rig.cache.list_dir(url("mem://h/d"), false);
    let replayed = revived.collect().await.unwrap();
    assert_eq!(names(&entries), names(&replayed));
    assert_eq!(list_lines(&rig.backend.log()), 1);
    assert!(rig.cache.cached_dirs().is_empty());
}

#[tokio::test]
async fn reload_serves_stale_snapshot_then_fresh_set() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/a"), b"aa".to_vec());

    rig.cache
        .list_dir(url("mem://h/d"), false)
        .collect()
        .await
        .unwrap();
    rig.backend.add_file(&url("mem://h/d/b"), b"bb".to_vec());

    let mut handle = rig.cache.list_dir(url("mem://h/d"), true);
    match handle.next_event().await.unwrap() {
        ListerEvent::Entries(stale) => {
            assert_eq!(names(&stale), vec![".", "a"]);
        }
        other => panic!("expected stale snapshot first, got {other:?}"),
    }
    match handle.next_event().await.unwrap() {
        ListerEvent::Refreshed(fresh) => {
            assert_eq!(names(&fresh), vec![".", "a", "b"]);
        }
        other => panic!("expected refreshed set, got {other:?}"),
    }
    assert!(matches!(
        handle.next_event().await,
        Some(ListerEvent::Completed)
    ));
    assert_eq!(list_lines(&rig.backend.log()), 2);
}

#[tokio::test]
async fn cache_bound_evicts_oldest_idle_item() {
    let config = EngineConfig::builder()
        .lister_cache_bound(2usize)
        .build()
        .unwrap();
    let rig = rig_with_config(config);
    for name in ["d1", "d2", "d3"] {
        let dir = url(&format!("mem://h/{name}"));
        rig.backend.add_dir(&dir);
        rig.cache.list_dir(dir, false).collect().await.unwrap();
    }

    let cached: Vec<ResourceUrl> = rig.cache.cached_dirs().into_iter().map(|(u, _)| u).collect();
    assert_eq!(cached, vec![url("mem://h/d2"), url("mem://h/d3")]);
}

#[tokio::test]
async fn removable_mount_suppresses_passive_watch() {
    let rig = rig();
    rig.cache.mark_removable(url("mem://h/usb"));
    rig.backend.add_dir(&url("mem://h/usb"));
    rig.backend.add_dir(&url("mem://h/usb/photos"));
    rig.backend.add_dir(&url("mem://h/home"));

    rig.cache
        .list_dir(url("mem://h/usb/photos"), false)
        .collect()
        .await
        .unwrap();
    rig.cache
        .list_dir(url("mem://h/home"), false)
        .collect()
        .await
        .unwrap();

    let cached = rig.cache.cached_dirs();
    let watched: std::collections::HashMap<ResourceUrl, bool> = cached.into_iter().collect();
    assert!(!watched[&url("mem://h/usb/photos")]);
    assert!(watched[&url("mem://h/home")]);
}

#[tokio::test]
async fn removal_notice_patches_held_item() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/a"), b"aa".to_vec());
    rig.backend.add_file(&url("mem://h/d/b"), b"bb".to_vec());

    let mut handle = rig.cache.list_dir(url("mem://h/d"), false);
    handle.collect().await.unwrap();

    rig.cache
        .apply_notice(&ChangeNotice::FilesRemoved(vec![url("mem://h/d/a")]));
    match handle.next_event().await.unwrap() {
        ListerEvent::Removed(gone) => assert_eq!(gone, vec![url("mem://h/d/a")]),
        other => panic!("expected removal event, got {other:?}"),
    }

    // A joiner sees the patched snapshot; no second listing runs.
    let mut joiner = rig.cache.list_dir(url("mem://h/d"), false);
    let entries = joiner.collect().await.unwrap();
    assert_eq!(names(&entries), vec![".", "b"]);
    assert_eq!(list_lines(&rig.backend.log()), 1);
}

#[tokio::test]
async fn paused_directory_ignores_removal_notice() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/a"), b"aa".to_vec());

    let mut handle = rig.cache.list_dir(url("mem://h/d"), false);
    let before = handle.collect().await.unwrap();

    let dirs = vec![url("mem://h/d")];
    rig.notifier.pause_updates(&dirs);
    rig.cache
        .apply_notice(&ChangeNotice::FilesRemoved(vec![url("mem://h/d/a")]));
    rig.notifier.resume_updates(&dirs);

    let mut joiner = rig.cache.list_dir(url("mem://h/d"), false);
    let after = joiner.collect().await.unwrap();
    assert_eq!(names(&before), names(&after));
}

#[tokio::test]
async fn rename_notice_rekeys_cached_item() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/a"));
    rig.backend.add_dir(&url("mem://h/a/b"));

    rig.cache
        .list_dir(url("mem://h/a/b"), false)
        .collect()
        .await
        .unwrap();
    assert_eq!(rig.cache.cached_dirs()[0].0, url("mem://h/a/b"));

    rig.cache.apply_notice(&ChangeNotice::FileRenamed {
        src: url("mem://h/a/b"),
        dst: url("mem://h/a/c"),
    });
    assert_eq!(rig.cache.cached_dirs()[0].0, url("mem://h/a/c"));
}

#[tokio::test]
async fn rename_notice_updates_held_parent_entry() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/a"), b"aa".to_vec());

    let mut handle = rig.cache.list_dir(url("mem://h/d"), false);
    handle.collect().await.unwrap();

    rig.cache.apply_notice(&ChangeNotice::FileRenamed {
        src: url("mem://h/d/a"),
        dst: url("mem://h/d/a2"),
    });
    match handle.next_event().await.unwrap() {
        ListerEvent::Changed(changed) => {
            assert_eq!(changed.len(), 1);
            assert_eq!(changed[0].name(), "a2");
        }
        other => panic!("expected changed entry, got {other:?}"),
    }

    let mut joiner = rig.cache.list_dir(url("mem://h/d"), false);
    let entries = joiner.collect().await.unwrap();
    assert_eq!(names(&entries), vec![".", "a2"]);
}

#[tokio::test]
async fn change_notice_refreshes_held_item() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/a"), b"aa".to_vec());

    let mut handle = rig.cache.list_dir(url("mem://h/d"), false);
    handle.collect().await.unwrap();

    rig.backend.add_file(&url("mem://h/d/new"), b"n".to_vec());
    rig.cache
        .apply_notice(&ChangeNotice::FilesAdded(url("mem://h/d")));

    match handle.next_event().await.unwrap() {
        ListerEvent::Refreshed(fresh) => {
            assert_eq!(names(&fresh), vec![".", "a", "new"]);
        }
        other => panic!("expected refreshed set, got {other:?}"),
    }
    assert!(matches!(
        handle.next_event().await,
        Some(ListerEvent::Completed)
    ));
    assert_eq!(list_lines(&rig.backend.log()), 2);
}

#[tokio::test]
async fn failed_listing_is_not_cached() {
    let rig = rig();

    let mut handle = rig.cache.list_dir(url("mem://h/missing"), false);
    let err = handle.collect().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(rig.cache.cached_dirs().is_empty());
    assert!(rig.cache.held_dirs().is_empty());
}

#[tokio::test]
async fn shutdown_fails_holders_and_clears_registries() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_dir(&url("mem://h/idle"));

    rig.cache
        .list_dir(url("mem://h/idle"), false)
        .collect()
        .await
        .unwrap();
    let mut held = rig.cache.list_dir(url("mem://h/d"), false);
    held.collect().await.unwrap();

    rig.cache.shutdown();
    match held.next_event().await.unwrap() {
        ListerEvent::Failed(err) => assert_eq!(err.kind, ErrorKind::UserCancelled),
        other => panic!("expected failure on shutdown, got {other:?}"),
    }
    assert!(rig.cache.cached_dirs().is_empty());
    assert!(rig.cache.held_dirs().is_empty());

    let mut late = rig.cache.list_dir(url("mem://h/d"), false);
    match late.next_event().await.unwrap() {
        ListerEvent::Failed(err) => assert_eq!(err.kind, ErrorKind::UserCancelled),
        other => panic!("expected failure after shutdown, got {other:?}"),
    }
}

#[tokio::test]
async fn hidden_entries_follow_engine_config() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/.secret"), b"s".to_vec());
    rig.backend.add_file(&url("mem://h/d/a"), b"a".to_vec());
    let entries = rig
        .cache
        .list_dir(url("mem://h/d"), false)
        .collect()
        .await
        .unwrap();
    assert_eq!(names(&entries), vec![".", "a"]);

    let rig = rig_with_config(EngineConfig::builder().list_hidden(true).build().unwrap());
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/.secret"), b"s".to_vec());
    rig.backend.add_file(&url("mem://h/d/a"), b"a".to_vec());
    let entries = rig
        .cache
        .list_dir(url("mem://h/d"), false)
        .collect()
        .await
        .unwrap();
    assert_eq!(names(&entries), vec![".", ".secret", "a"]);
}

#[tokio::test]
async fn keep_flag_controls_held_set() {
    let rig = rig();
    for name in ["d1", "d2", "d3"] {
        rig.backend.add_dir(&url(&format!("mem://h/{name}")));
    }
    let mut lister = Lister::new(rig.cache.clone());

    lister
        .open_url(url("mem://h/d1"), false, false)
        .collect()
        .await
        .unwrap();
    lister
        .open_url(url("mem://h/d2"), true, false)
        .collect()
        .await
        .unwrap();
    assert_eq!(lister.held_urls().len(), 2);

    lister.forget_dir(&url("mem://h/d1"));
    assert_eq!(lister.held_urls(), vec![url("mem://h/d2")]);
    assert_eq!(rig.cache.held_dirs(), vec![url("mem://h/d2")]);

    lister
        .open_url(url("mem://h/d3"), false, false)
        .collect()
        .await
        .unwrap();
    assert_eq!(lister.held_urls(), vec![url("mem://h/d3")]);
    let cached: Vec<ResourceUrl> = rig.cache.cached_dirs().into_iter().map(|(u, _)| u).collect();
    assert!(cached.contains(&url("mem://h/d1")));
    assert!(cached.contains(&url("mem://h/d2")));
}
