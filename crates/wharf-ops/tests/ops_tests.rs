//! End-to-end operation tests against the in-memory backend.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use wharf_core::testing::{MemoryBackend, MemoryCapabilities, MemoryDispatch};
use wharf_core::{
    AutoInteract, ChangeNotice, ConflictPrompt, EngineConfig, ErrorKind, Interact, Notifier,
    OpError, OverwriteDecision, ResourceUrl, SkipDecision,
};
use wharf_ops::{Engine, ListOptions, ListUpdate, TransferMode};

fn url(s: &str) -> ResourceUrl {
    s.parse().expect("test url")
}

struct Rig {
    backend: MemoryBackend,
    notifier: Arc<Notifier>,
    engine: Arc<Engine>,
}

fn rig_with(caps: MemoryCapabilities, interact: Arc<dyn Interact>) -> Rig {
    let backend = MemoryBackend::new();
    let notifier = Arc::new(Notifier::new());
    let engine = Engine::new(
        Arc::new(MemoryDispatch::new(backend.clone())),
        Arc::new(caps),
        interact,
        notifier.clone(),
        EngineConfig::default(),
    );
    Rig {
        backend,
        notifier,
        engine,
    }
}

fn rig() -> Rig {
    rig_with(
        MemoryCapabilities::default(),
        Arc::new(AutoInteract::cancelling()),
    )
}

/// Replays a fixed decision list; cancels once the script runs out.
struct ScriptedInteract {
    decisions: Mutex<VecDeque<OverwriteDecision>>,
}

impl ScriptedInteract {
    fn new(decisions: impl IntoIterator<Item = OverwriteDecision>) -> Arc<Self> {
        Arc::new(Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
        })
    }
}

#[async_trait]
impl Interact for ScriptedInteract {
    async fn decide_overwrite(&self, _prompt: ConflictPrompt) -> OverwriteDecision {
        self.decisions
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or(OverwriteDecision::Cancel)
    }

    async fn decide_skip(&self, _multiple: bool, _error: &OpError) -> SkipDecision {
        SkipDecision::Cancel
    }
}

fn log_index(log: &[String], needle: &str) -> usize {
    log.iter()
        .position(|line| line == needle)
        .unwrap_or_else(|| panic!("log line {needle:?} not found in {log:#?}"))
}

#[tokio::test]
async fn stat_reports_entry() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/f.txt"), b"hello".to_vec());

    let entry = rig.engine.stat(url("mem://h/d/f.txt")).wait().await.unwrap();
    assert_eq!(entry.name(), "f.txt");
    assert_eq!(entry.size(), 5);
    assert!(!entry.is_dir());
}

#[tokio::test]
async fn completion_fires_once_and_progress_stops() {
    let rig = rig();
    rig.backend.add_file(&url("mem://h/f"), b"abcdef".to_vec());
    rig.backend.set_chunk_size(2);

    let handle = rig.engine.get(url("mem://h/f"));
    let id = handle.id();
    let (_progress, result) = handle.finish().await;
    // finish() drains progress to channel close before the completion
    // resolves: nothing can arrive afterwards.
    assert_eq!(result.unwrap(), b"abcdef".to_vec());
    assert!(!rig.engine.active().contains(&id));
}

#[tokio::test]
async fn put_then_get_round_trip() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));

    rig.engine
        .put(url("mem://h/d/new.bin"), vec![7u8; 300], -1, false)
        .wait()
        .await
        .unwrap();
    assert_eq!(rig.backend.file_data(&url("mem://h/d/new.bin")), Some(vec![7u8; 300]));

    let body = rig.engine.get(url("mem://h/d/new.bin")).wait().await.unwrap();
    assert_eq!(body.len(), 300);
}

#[tokio::test]
async fn put_refuses_existing_destination() {
    let rig = rig();
    rig.backend.add_file(&url("mem://h/f"), b"old".to_vec());

    let err = rig
        .engine
        .put(url("mem://h/f"), b"new".to_vec(), -1, false)
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::FileAlreadyExists);
    assert_eq!(rig.backend.file_data(&url("mem://h/f")), Some(b"old".to_vec()));
}

#[tokio::test]
async fn self_redirect_fails_on_the_sixth() {
    let rig = rig();
    rig.backend.add_file(&url("mem://h/f"), b"x".to_vec());
    rig.backend.redirect(&url("mem://h/f"), &url("mem://h/f"));

    let err = rig.engine.get(url("mem://h/f")).wait().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CyclicRedirection);

    // Five redirects are followed; the sixth trips the limit, so the command
    // was submitted six times and never a seventh.
    let submissions = rig
        .backend
        .log()
        .iter()
        .filter(|line| line.starts_with("get mem://h/f"))
        .count();
    assert_eq!(submissions, 6);
}

#[tokio::test]
async fn native_copy_falls_back_to_pump() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/src.txt"), b"pump me".to_vec());
    rig.backend.set_unsupported("copy");

    rig.engine
        .file_copy(url("mem://h/d/src.txt"), url("mem://h/d/dst.txt"), Default::default())
        .wait()
        .await
        .unwrap();
    assert_eq!(
        rig.backend.file_data(&url("mem://h/d/dst.txt")),
        Some(b"pump me".to_vec())
    );

    // Native attempt first, then the pump: put opens before the get, and the
    // resumability answer precedes any data flow.
    let log = rig.backend.log();
    let native = log_index(&log, "copy mem://h/d/src.txt -> mem://h/d/dst.txt");
    let put = log_index(&log, "put mem://h/d/dst.txt");
    let canresume = log_index(&log, "canresume 0");
    let get = log_index(&log, "get mem://h/d/src.txt @0");
    assert!(native < put);
    assert!(put < canresume);
    assert!(canresume < get);
}

#[tokio::test]
async fn copy_tree_counts_dirs_files_and_bytes() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/src"));
    rig.backend.add_file(&url("mem://h/src/a.txt"), vec![b'a'; 10]);
    rig.backend.add_dir(&url("mem://h/src/sub"));
    rig.backend.add_file(&url("mem://h/src/sub/b.txt"), vec![b'b'; 5]);
    rig.backend.add_dir(&url("mem://h/dst"));

    let summary = rig
        .engine
        .copy(vec![url("mem://h/src")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.dirs, 2);
    assert_eq!(summary.files, 2);
    assert_eq!(summary.bytes, 15);
    assert_eq!(summary.skipped, 0);
    assert_eq!(
        rig.backend.file_data(&url("mem://h/dst/src/a.txt")),
        Some(vec![b'a'; 10])
    );
    assert_eq!(
        rig.backend.file_data(&url("mem://h/dst/src/sub/b.txt")),
        Some(vec![b'b'; 5])
    );
}

#[tokio::test]
async fn skipped_conflict_leaves_destination_untouched() {
    let rig = rig_with(
        MemoryCapabilities::default(),
        Arc::new(AutoInteract::skipping()),
    );
    rig.backend.add_dir(&url("mem://h/src"));
    rig.backend.add_file(&url("mem://h/src/file.txt"), b"new".to_vec());
    rig.backend.add_dir(&url("mem://h/dst"));
    rig.backend.add_file(&url("mem://h/dst/file.txt"), b"old".to_vec());

    let summary = rig
        .engine
        .copy(vec![url("mem://h/src/file.txt")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.files, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(
        rig.backend.file_data(&url("mem://h/dst/file.txt")),
        Some(b"old".to_vec())
    );
}

#[tokio::test]
async fn skipped_move_keeps_source_and_destination() {
    let rig = rig_with(
        MemoryCapabilities::default(),
        Arc::new(AutoInteract::skipping()),
    );
    rig.backend.add_dir(&url("mem://h/src"));
    rig.backend.add_file(&url("mem://h/src/file.txt"), b"new".to_vec());
    rig.backend.add_dir(&url("mem://h/dst"));
    rig.backend.add_file(&url("mem://h/dst/file.txt"), b"old".to_vec());

    let summary = rig
        .engine
        .move_to(vec![url("mem://h/src/file.txt")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.skipped, 1);
    assert!(rig.backend.contains(&url("mem://h/src/file.txt")));
    assert_eq!(
        rig.backend.file_data(&url("mem://h/dst/file.txt")),
        Some(b"old".to_vec())
    );
}

#[tokio::test]
async fn dir_rename_decision_rewrites_planned_descendants() {
    let interact = ScriptedInteract::new([OverwriteDecision::Rename(url("mem://h/dst/c"))]);
    let rig = rig_with(MemoryCapabilities::default(), interact);
    rig.backend.add_dir(&url("mem://h/a"));
    rig.backend.add_dir(&url("mem://h/a/b"));
    rig.backend.add_file(&url("mem://h/a/b/x.txt"), b"x".to_vec());
    rig.backend.add_dir(&url("mem://h/dst"));
    rig.backend.add_dir(&url("mem://h/dst/b"));

    rig.engine
        .copy(vec![url("mem://h/a/b")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();
    assert!(rig.backend.contains(&url("mem://h/dst/c/x.txt")));
    assert!(!rig.backend.contains(&url("mem://h/dst/b/x.txt")));
}

#[tokio::test]
async fn move_deletes_source_dirs_deepest_first() {
    let caps = MemoryCapabilities {
        rename_in_place: false,
        ..MemoryCapabilities::default()
    };
    let rig = rig_with(caps, Arc::new(AutoInteract::cancelling()));
    rig.backend.add_dir(&url("mem://h/src"));
    rig.backend.add_file(&url("mem://h/src/a.txt"), b"aa".to_vec());
    rig.backend.add_dir(&url("mem://h/src/sub"));
    rig.backend.add_file(&url("mem://h/src/sub/leaf.txt"), b"ll".to_vec());
    rig.backend.add_dir(&url("mem://h/dst"));

    rig.engine
        .move_to(vec![url("mem://h/src")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();

    assert!(rig.backend.contains(&url("mem://h/dst/src/sub/leaf.txt")));
    assert!(!rig.backend.contains(&url("mem://h/src")));
    assert!(!rig.backend.contains(&url("mem://h/src/sub")));

    let log = rig.backend.log();
    let sub = log_index(&log, "remove dir mem://h/src/sub");
    let root = log_index(&log, "remove dir mem://h/src");
    assert!(sub < root);
}

#[tokio::test]
async fn overwrite_all_rerun_is_idempotent() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/src"));
    rig.backend.add_file(&url("mem://h/src/a.txt"), b"aa".to_vec());
    rig.backend.add_dir(&url("mem://h/src/sub"));
    rig.backend.add_file(&url("mem://h/src/sub/b.txt"), b"bb".to_vec());
    rig.backend.add_dir(&url("mem://h/dst"));

    rig.engine
        .copy(vec![url("mem://h/src")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();
    let after_first = rig.backend.paths();

    // Second engine over the same tree; only the conflict policy differs.
    let rerun = Engine::new(
        Arc::new(MemoryDispatch::new(rig.backend.clone())),
        Arc::new(MemoryCapabilities::default()),
        Arc::new(AutoInteract::overwriting()),
        Arc::new(Notifier::new()),
        EngineConfig::default(),
    );
    let summary = rerun
        .copy(vec![url("mem://h/src")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.files, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(rig.backend.paths(), after_first);
}

#[tokio::test]
async fn delete_suppresses_notifications_exactly_once() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/t"));
    rig.backend.add_dir(&url("mem://h/t/a"));
    rig.backend.add_dir(&url("mem://h/t/a/b"));
    rig.backend.add_file(&url("mem://h/t/a/b/c.txt"), b"c".to_vec());

    let summary = rig
        .engine
        .delete(vec![url("mem://h/t")])
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.files, 1);
    assert_eq!(summary.dirs, 3);
    assert!(!rig.backend.contains(&url("mem://h/t")));

    assert_eq!(rig.notifier.pause_call_count(), 1);
    assert!(!rig.notifier.updates_paused(&url("mem://h")));

    let log = rig.backend.log();
    let deepest = log_index(&log, "remove dir mem://h/t/a/b");
    let middle = log_index(&log, "remove dir mem://h/t/a");
    let root = log_index(&log, "remove dir mem://h/t");
    let file = log_index(&log, "remove file mem://h/t/a/b/c.txt");
    assert!(file < deepest);
    assert!(deepest < middle);
    assert!(middle < root);
}

#[tokio::test]
async fn flat_listing_keeps_dot_entry_and_filters_hidden() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/vis.txt"), b"v".to_vec());
    rig.backend.add_file(&url("mem://h/d/.hidden"), b"h".to_vec());

    let (handle, mut updates) = rig.engine.list_dir(url("mem://h/d"), ListOptions::default());
    let mut names = Vec::new();
    while let Some(update) = updates.recv().await {
        if let ListUpdate::Entries(batch) = update {
            names.extend(batch.into_iter().map(|e| e.name().to_string()));
        }
    }
    let count = handle.wait().await.unwrap();
    assert_eq!(count, names.len() as u64);
    assert!(names.contains(&".".to_string()));
    assert!(names.contains(&"vis.txt".to_string()));
    assert!(!names.contains(&".hidden".to_string()));
}

#[tokio::test]
async fn recursive_listing_prefixes_child_entries() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_dir(&url("mem://h/d/sub"));
    rig.backend.add_file(&url("mem://h/d/sub/leaf.txt"), b"l".to_vec());
    rig.backend.add_file(&url("mem://h/d/top.txt"), b"t".to_vec());

    let opts = ListOptions {
        recursive: true,
        include_hidden: true,
    };
    let (handle, mut updates) = rig.engine.list_dir(url("mem://h/d"), opts);
    let mut names = Vec::new();
    while let Some(update) = updates.recv().await {
        if let ListUpdate::Entries(batch) = update {
            names.extend(batch.into_iter().map(|e| e.name().to_string()));
        }
    }
    handle.wait().await.unwrap();
    assert!(names.contains(&"top.txt".to_string()));
    assert!(names.contains(&"sub".to_string()));
    assert!(names.contains(&"sub/leaf.txt".to_string()));
    assert!(!names.contains(&".".to_string()));
}

#[tokio::test]
async fn listing_redirect_is_reemitted_not_failed() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/real"));
    rig.backend.add_file(&url("mem://h/real/f.txt"), b"f".to_vec());
    rig.backend.add_dir(&url("mem://h/alias"));
    rig.backend.redirect(&url("mem://h/alias"), &url("mem://h/real"));

    let (handle, mut updates) = rig
        .engine
        .list_dir(url("mem://h/alias"), ListOptions::default());
    let mut saw_redirect = None;
    let mut names = Vec::new();
    while let Some(update) = updates.recv().await {
        match update {
            ListUpdate::Redirect(target) => saw_redirect = Some(target),
            ListUpdate::Entries(batch) => {
                names.extend(batch.into_iter().map(|e| e.name().to_string()));
            }
        }
    }
    handle.wait().await.unwrap();
    assert_eq!(saw_redirect, Some(url("mem://h/real")));
    assert!(names.contains(&"f.txt".to_string()));
}

#[tokio::test]
async fn kill_before_start_cancels_cleanly() {
    let rig = rig();
    rig.backend.add_file(&url("mem://h/f"), b"data".to_vec());

    let handle = rig.engine.get(url("mem://h/f"));
    handle.kill();
    let err = handle.wait().await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(rig.engine.active().is_empty());
}

#[tokio::test]
async fn link_mode_creates_symlinks_same_backend_only() {
    let rig = rig();
    rig.backend.add_file(&url("mem://h/src.txt"), b"s".to_vec());
    rig.backend.add_dir(&url("mem://h/dst"));

    let summary = rig
        .engine
        .link(vec![url("mem://h/src.txt")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.symlinks, 1);
    let entry = rig.engine.stat(url("mem://h/dst/src.txt")).wait().await.unwrap();
    assert!(entry.is_link());
    assert_eq!(entry.link_target(), Some("/src.txt"));

    let err = rig
        .engine
        .link(vec![url("mem://h/src.txt")], url("mem://other/dst"))
        .wait()
        .await
        .unwrap_err();
    assert!(err.is_unsupported());
}

#[tokio::test]
async fn partial_destination_resumes_at_offset() {
    let caps = MemoryCapabilities {
        copy_in_place: false,
        ..MemoryCapabilities::default()
    };
    let interact = ScriptedInteract::new([OverwriteDecision::Resume]);
    let rig = rig_with(caps, interact);
    rig.backend.add_dir(&url("mem://h/d"));
    rig.backend.add_file(&url("mem://h/d/src"), b"hello world".to_vec());
    rig.backend.add_file(&url("mem://h/d/part"), b"hel".to_vec());

    rig.engine
        .file_copy(url("mem://h/d/src"), url("mem://h/d/part"), Default::default())
        .wait()
        .await
        .unwrap();
    assert_eq!(
        rig.backend.file_data(&url("mem://h/d/part")),
        Some(b"hello world".to_vec())
    );

    let log = rig.backend.log();
    assert!(log.contains(&"canresume 3".to_string()));
    assert!(log.contains(&"resume-answer true".to_string()));
    assert!(log.contains(&"get mem://h/d/src @3".to_string()));
}

#[tokio::test]
async fn move_uses_direct_rename_when_possible() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/src"));
    rig.backend.add_file(&url("mem://h/src/f.txt"), b"f".to_vec());
    rig.backend.add_dir(&url("mem://h/dst"));

    let summary = rig
        .engine
        .move_to(vec![url("mem://h/src")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.renamed, 1);
    assert!(rig.backend.contains(&url("mem://h/dst/src/f.txt")));
    assert!(!rig.backend.contains(&url("mem://h/src")));
    // One rename, no per-file machinery.
    assert!(rig
        .backend
        .log()
        .contains(&"rename mem://h/src -> mem://h/dst/src".to_string()));
}

#[tokio::test]
async fn move_restores_destination_dir_mtimes() {
    let caps = MemoryCapabilities {
        rename_in_place: false,
        ..MemoryCapabilities::default()
    };
    let rig = rig_with(caps, Arc::new(AutoInteract::cancelling()));
    rig.backend.add_dir(&url("mem://h/src"));
    rig.backend.add_file(&url("mem://h/src/f.txt"), b"data".to_vec());
    rig.backend.add_dir(&url("mem://h/dst"));
    rig.engine
        .set_modification_time(url("mem://h/src"), 777)
        .wait()
        .await
        .unwrap();

    rig.engine
        .move_to(vec![url("mem://h/src")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();

    // The moved tree's destination directory gets its mtime back, after the
    // vacated source directory is gone.
    let log = rig.backend.log();
    let removed = log_index(&log, "remove dir mem://h/src");
    let restored = log_index(&log, "mtime mem://h/dst/src 777");
    assert!(removed < restored);
}

#[tokio::test]
async fn move_uses_assisted_rename_with_one_local_side() {
    let caps = MemoryCapabilities {
        rename_in_place: false,
        rename_with_local: true,
        ..MemoryCapabilities::default()
    };
    let rig = rig_with(caps, Arc::new(AutoInteract::cancelling()));
    rig.backend
        .add_file(&url("file:///work/report.txt"), b"r".to_vec());
    rig.backend.add_dir(&url("mem://h/dst"));

    let summary = rig
        .engine
        .move_to(vec![url("file:///work/report.txt")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();

    assert_eq!(summary.renamed, 1);
    assert_eq!(summary.files, 0);
    assert!(rig.backend.contains(&url("mem://h/dst/report.txt")));
    assert!(!rig.backend.contains(&url("file:///work/report.txt")));
    let log = rig.backend.log();
    log_index(&log, "rename file:///work/report.txt -> mem://h/dst/report.txt");
    assert!(!log
        .iter()
        .any(|line| line.starts_with("copy ") || line.starts_with("get ")));
}

#[tokio::test]
async fn move_announces_vacated_sources() {
    let caps = MemoryCapabilities {
        rename_in_place: false,
        ..MemoryCapabilities::default()
    };
    let rig = rig_with(caps, Arc::new(AutoInteract::cancelling()));
    rig.backend.add_dir(&url("mem://h/src"));
    rig.backend.add_file(&url("mem://h/src/f.txt"), b"x".to_vec());
    rig.backend.add_dir(&url("mem://h/dst"));
    let mut notices = rig.notifier.subscribe();

    rig.engine
        .move_to(vec![url("mem://h/src")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap();

    let mut removed = Vec::new();
    let mut added = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        match notice {
            ChangeNotice::FilesRemoved(urls) => removed.extend(urls),
            ChangeNotice::FilesAdded(dir) => added.push(dir),
            ChangeNotice::FileRenamed { .. } => {}
        }
    }
    assert!(removed.contains(&url("mem://h/src/f.txt")));
    assert!(removed.contains(&url("mem://h/src")));
    assert!(added.contains(&url("mem://h/dst")));
}

#[tokio::test]
async fn delete_skips_sources_the_backend_cannot_delete() {
    let caps = MemoryCapabilities {
        deleting: false,
        ..MemoryCapabilities::default()
    };
    let rig = rig_with(caps, Arc::new(AutoInteract::cancelling()));
    rig.backend.add_file(&url("mem://h/keep.txt"), b"k".to_vec());

    let summary = rig
        .engine
        .delete(vec![url("mem://h/keep.txt")])
        .wait()
        .await
        .unwrap();

    assert_eq!(summary.files, 0);
    assert!(rig.backend.contains(&url("mem://h/keep.txt")));
    assert!(!rig
        .backend
        .log()
        .iter()
        .any(|line| line.starts_with("remove ")));
}

#[tokio::test]
async fn listing_requires_backend_support() {
    let caps = MemoryCapabilities {
        listing: false,
        ..MemoryCapabilities::default()
    };
    let rig = rig_with(caps, Arc::new(AutoInteract::cancelling()));
    rig.backend.add_dir(&url("mem://h/d"));

    let (handle, _updates) = rig.engine.list_dir(url("mem://h/d"), ListOptions::default());
    let err = handle.wait().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedAction);
}

#[tokio::test]
async fn unrelated_error_aborts_orchestration() {
    let rig = rig();
    rig.backend.add_dir(&url("mem://h/src"));
    rig.backend.add_file(&url("mem://h/src/a.txt"), b"a".to_vec());
    rig.backend.add_dir(&url("mem://h/dst"));
    rig.backend
        .fail_once("copy", &url("mem://h/src/a.txt"), ErrorKind::AccessDenied);

    let err = rig
        .engine
        .copy(vec![url("mem://h/src/a.txt")], url("mem://h/dst"))
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::AccessDenied);
}

#[tokio::test]
async fn transfer_mode_is_plain_data() {
    // Guard against accidental non-exhaustive growth; orchestrator callers
    // match on all three.
    let modes = [TransferMode::Copy, TransferMode::Move, TransferMode::Link];
    assert_eq!(modes.len(), 3);
}
