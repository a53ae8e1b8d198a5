//! Engine operations against real temporary directories.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use wharf_core::{
    AutoInteract, EngineConfig, ErrorKind, LocalCapabilities, Notifier, ResourceUrl,
};
use wharf_local::LocalDispatch;
use wharf_ops::{Engine, ListOptions, ListUpdate};

fn url_for(path: &Path) -> ResourceUrl {
    ResourceUrl::parse(path.to_str().expect("utf-8 temp path")).expect("test url")
}

fn engine() -> Arc<Engine> {
    Engine::new(
        Arc::new(LocalDispatch::new()),
        Arc::new(LocalCapabilities),
        Arc::new(AutoInteract::cancelling()),
        Arc::new(Notifier::new()),
        EngineConfig::default(),
    )
}

#[tokio::test]
async fn stat_reads_file_metadata() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("f.txt");
    fs::write(&file, b"hello").unwrap();

    let entry = engine().stat(url_for(&file)).wait().await.unwrap();
    assert_eq!(entry.name(), "f.txt");
    assert_eq!(entry.size(), 5);
    assert!(!entry.is_dir());
}

#[tokio::test]
async fn get_streams_file_contents() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("f.bin");
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&file, &payload).unwrap();

    let body = engine().get(url_for(&file)).wait().await.unwrap();
    assert_eq!(body, payload);
}

#[tokio::test]
async fn put_writes_and_refuses_existing() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("out.txt");
    let engine = engine();

    engine
        .put(url_for(&file), b"payload".to_vec(), -1, false)
        .wait()
        .await
        .unwrap();
    assert_eq!(fs::read(&file).unwrap(), b"payload");

    let err = engine
        .put(url_for(&file), b"other".to_vec(), -1, false)
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::FileAlreadyExists);

    engine
        .put(url_for(&file), b"other".to_vec(), -1, true)
        .wait()
        .await
        .unwrap();
    assert_eq!(fs::read(&file).unwrap(), b"other");
}

#[tokio::test]
async fn list_dir_reports_sorted_entries() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("b.txt"), b"b").unwrap();
    fs::write(dir.path().join("a.txt"), b"a").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();

    let (handle, mut updates) = engine().list_dir(url_for(dir.path()), ListOptions::default());
    let mut names = Vec::new();
    while let Some(update) = updates.recv().await {
        if let ListUpdate::Entries(batch) = update {
            names.extend(batch.iter().map(|e| e.name().to_string()));
        }
    }
    handle.wait().await.unwrap();
    names.sort();
    assert_eq!(names, vec![".", "a.txt", "b.txt", "sub"]);
}

#[tokio::test]
async fn copy_replicates_a_tree() {
    let src_root = TempDir::new().unwrap();
    let dst_root = TempDir::new().unwrap();
    let tree = src_root.path().join("tree");
    fs::create_dir_all(tree.join("sub")).unwrap();
    fs::write(tree.join("top.txt"), b"top").unwrap();
    fs::write(tree.join("sub/inner.txt"), b"inner-data").unwrap();

    let summary = engine()
        .copy(vec![url_for(&tree)], url_for(dst_root.path()))
        .wait()
        .await
        .unwrap();

    let copied = dst_root.path().join("tree");
    assert_eq!(fs::read(copied.join("top.txt")).unwrap(), b"top");
    assert_eq!(fs::read(copied.join("sub/inner.txt")).unwrap(), b"inner-data");
    assert_eq!(summary.dirs, 2);
    assert_eq!(summary.files, 2);
    assert_eq!(summary.bytes, 13);
    // Source untouched.
    assert!(tree.join("top.txt").exists());
}

#[tokio::test]
async fn move_renames_in_place() {
    let root = TempDir::new().unwrap();
    let src = root.path().join("old.txt");
    let dst_dir = root.path().join("dest");
    fs::write(&src, b"contents").unwrap();
    fs::create_dir(&dst_dir).unwrap();

    let summary = engine()
        .move_to(vec![url_for(&src)], url_for(&dst_dir))
        .wait()
        .await
        .unwrap();

    assert!(!src.exists());
    assert_eq!(fs::read(dst_dir.join("old.txt")).unwrap(), b"contents");
    assert_eq!(summary.renamed, 1);
    assert_eq!(summary.files, 0);
}

#[tokio::test]
async fn delete_removes_a_tree() {
    let root = TempDir::new().unwrap();
    let doomed = root.path().join("doomed");
    fs::create_dir_all(doomed.join("nested")).unwrap();
    fs::write(doomed.join("nested/file.txt"), b"x").unwrap();

    let summary = engine()
        .delete(vec![url_for(&doomed)])
        .wait()
        .await
        .unwrap();

    assert!(!doomed.exists());
    assert!(summary.dirs >= 1);
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_created_and_statted() {
    let root = TempDir::new().unwrap();
    let link = root.path().join("link");

    engine()
        .symlink("/somewhere/else".to_string(), url_for(&link), false)
        .wait()
        .await
        .unwrap();

    let target = fs::read_link(&link).unwrap();
    assert_eq!(target.to_str().unwrap(), "/somewhere/else");

    let entry = engine().stat(url_for(&link)).wait().await.unwrap();
    assert!(entry.is_link());
    assert_eq!(entry.link_target(), Some("/somewhere/else"));
}

#[tokio::test]
async fn mkdir_conflicts_with_existing_directory() {
    let root = TempDir::new().unwrap();
    let dir = root.path().join("made");
    let engine = engine();

    engine.mkdir(url_for(&dir), -1).wait().await.unwrap();
    assert!(dir.is_dir());

    let err = engine.mkdir(url_for(&dir), -1).wait().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::DirAlreadyExists);
}
