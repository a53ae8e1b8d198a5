//! Worker servicing commands against the local filesystem.
//!
//! All filesystem calls run on the blocking thread pool; the worker task only
//! shuttles commands and events. Open file handles move in and out of the
//! blocking closures so one get or put streams through a single descriptor.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use tokio::task;

use wharf_core::{
    EntryField, EntryRecord, ErrorKind, OpError, ResourceUrl, WorkerCommand, WorkerEndpoint,
    WorkerEvent, FILE_TYPE_DIR, FILE_TYPE_FILE, FILE_TYPE_SYMLINK,
};

/// Read chunk size for local downloads.
const READ_CHUNK: usize = 1024 * 1024;

/// Entries per `Entries` event when listing.
const LIST_BATCH: usize = 200;

/// Service commands until the operation drops its handle.
pub(crate) async fn serve_worker(mut endpoint: WorkerEndpoint) {
    while let Some(cmd) = endpoint.next_command().await {
        tracing::trace!(?cmd, "local worker command");
        let keep_going = match cmd {
            WorkerCommand::Stat { url } => serve_stat(&endpoint, url).await,
            WorkerCommand::ListDir { url } => serve_list(&endpoint, url).await,
            WorkerCommand::Mkdir { url, permissions } => {
                serve_mkdir(&endpoint, url, permissions).await
            }
            WorkerCommand::Rename {
                src,
                dst,
                overwrite,
            } => serve_rename(&endpoint, src, dst, overwrite).await,
            WorkerCommand::Chmod { url, permissions } => {
                serve_chmod(&endpoint, url, permissions).await
            }
            WorkerCommand::SetModificationTime { url, mtime } => {
                serve_set_mtime(&endpoint, url, mtime).await
            }
            WorkerCommand::Remove { url, is_file } => serve_remove(&endpoint, url, is_file).await,
            WorkerCommand::Symlink {
                target,
                dst,
                overwrite,
            } => serve_symlink(&endpoint, target, dst, overwrite).await,
            WorkerCommand::Get { url, offset } => serve_get(&endpoint, url, offset).await,
            WorkerCommand::Put {
                url,
                permissions,
                overwrite,
                resume,
            } => serve_put(&mut endpoint, url, permissions, overwrite, resume).await,
            WorkerCommand::CopyNative {
                src,
                dst,
                permissions,
                overwrite,
            } => serve_copy(&endpoint, src, dst, permissions, overwrite).await,
            WorkerCommand::Data(_) | WorkerCommand::ResumeAnswer(_) => {
                endpoint
                    .emit(WorkerEvent::Error(OpError::internal(
                        "data outside a put exchange",
                    )))
                    .await
            }
        };
        if !keep_going {
            break;
        }
    }
}

async fn fail(endpoint: &WorkerEndpoint, err: OpError) -> bool {
    endpoint.emit(WorkerEvent::Error(err)).await
}

async fn finish(endpoint: &WorkerEndpoint) -> bool {
    endpoint.emit(WorkerEvent::Finished).await
}

async fn finish_result(endpoint: &WorkerEndpoint, result: Result<(), OpError>) -> bool {
    match result {
        Ok(()) => finish(endpoint).await,
        Err(err) => fail(endpoint, err).await,
    }
}

fn local_path(url: &ResourceUrl) -> Result<PathBuf, OpError> {
    url.local_path().ok_or_else(|| OpError::unsupported(url))
}

/// Run a filesystem closure on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, OpError>
where
    F: FnOnce() -> Result<T, OpError> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|_| OpError::internal("blocking filesystem task panicked"))?
}

/// Build an entry record from `symlink_metadata` of `path`.
fn record_for(url: &ResourceUrl, path: &Path, name: &str) -> Result<EntryRecord, OpError> {
    let meta = fs::symlink_metadata(path).map_err(|e| OpError::io(url, &e))?;
    let mut rec = EntryRecord::new();
    rec.set_text(EntryField::Name, name);
    let file_type = meta.file_type();
    let type_bits = if file_type.is_symlink() {
        FILE_TYPE_SYMLINK
    } else if file_type.is_dir() {
        FILE_TYPE_DIR
    } else {
        FILE_TYPE_FILE
    };
    rec.set_number(EntryField::FileType, type_bits);
    if file_type.is_file() {
        rec.set_number(EntryField::Size, meta.len() as i64);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        rec.set_number(
            EntryField::Permissions,
            (meta.permissions().mode() & 0o7777) as i64,
        );
    }
    if let Ok(modified) = meta.modified() {
        if let Ok(elapsed) = modified.duration_since(UNIX_EPOCH) {
            rec.set_number(EntryField::ModificationTime, elapsed.as_secs() as i64);
        }
    }
    if file_type.is_symlink() {
        if let Ok(target) = fs::read_link(path) {
            rec.set_text(EntryField::LinkTarget, target.to_string_lossy());
        }
    }
    rec.set_text(EntryField::LocalPath, path.to_string_lossy());
    Ok(rec)
}

async fn serve_stat(endpoint: &WorkerEndpoint, url: ResourceUrl) -> bool {
    let record = {
        let url = url.clone();
        blocking(move || {
            let path = local_path(&url)?;
            let name = url.file_name().unwrap_or(".").to_string();
            record_for(&url, &path, &name)
        })
        .await
    };
    match record {
        Ok(rec) => {
            if !endpoint.emit(WorkerEvent::Entries(vec![rec])).await {
                return false;
            }
            finish(endpoint).await
        }
        Err(err) => fail(endpoint, err).await,
    }
}

async fn serve_list(endpoint: &WorkerEndpoint, url: ResourceUrl) -> bool {
    let entries = {
        let url = url.clone();
        blocking(move || {
            let path = local_path(&url)?;
            if !path.is_dir() {
                return Err(OpError::not_found(&url));
            }
            let mut entries = vec![record_for(&url, &path, ".")?];
            let mut names: Vec<String> = fs::read_dir(&path)
                .map_err(|e| OpError::io(&url, &e))?
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect();
            names.sort();
            for name in names {
                match record_for(&url, &path.join(&name), &name) {
                    Ok(rec) => entries.push(rec),
                    // Raced with a concurrent removal; skip the entry.
                    Err(err) if err.kind == ErrorKind::NotFound => continue,
                    Err(err) => return Err(err),
                }
            }
            Ok(entries)
        })
        .await
    };
    let entries = match entries {
        Ok(entries) => entries,
        Err(err) => return fail(endpoint, err).await,
    };
    for chunk in entries.chunks(LIST_BATCH) {
        if !endpoint.emit(WorkerEvent::Entries(chunk.to_vec())).await {
            return false;
        }
    }
    finish(endpoint).await
}

async fn serve_mkdir(endpoint: &WorkerEndpoint, url: ResourceUrl, permissions: i64) -> bool {
    let result = blocking(move || {
        let path = local_path(&url)?;
        if path.exists() {
            let kind = if path.is_dir() {
                ErrorKind::DirAlreadyExists
            } else {
                ErrorKind::FileAlreadyExists
            };
            return Err(OpError::new(kind, url.to_string()));
        }
        fs::create_dir(&path).map_err(|e| OpError::io(&url, &e))?;
        apply_permissions(&url, &path, permissions)
    })
    .await;
    finish_result(endpoint, result).await
}

async fn serve_rename(
    endpoint: &WorkerEndpoint,
    src: ResourceUrl,
    dst: ResourceUrl,
    overwrite: bool,
) -> bool {
    let result = blocking(move || {
        let src_path = local_path(&src)?;
        let dst_path = local_path(&dst)?;
        if !src_path.exists() && fs::symlink_metadata(&src_path).is_err() {
            return Err(OpError::not_found(&src));
        }
        if dst_path.exists() && src_path != dst_path {
            if !overwrite {
                let kind = if dst_path.is_dir() {
                    ErrorKind::DirAlreadyExists
                } else {
                    ErrorKind::FileAlreadyExists
                };
                return Err(OpError::new(kind, dst.to_string()));
            }
            if !dst_path.is_dir() {
                fs::remove_file(&dst_path).map_err(|e| OpError::io(&dst, &e))?;
            }
        }
        fs::rename(&src_path, &dst_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::CrossesDevices {
                // Another filesystem; the engine falls back to copy + delete.
                OpError::unsupported(&src)
            } else {
                OpError::io(&src, &e)
            }
        })
    })
    .await;
    finish_result(endpoint, result).await
}

async fn serve_chmod(endpoint: &WorkerEndpoint, url: ResourceUrl, permissions: i64) -> bool {
    let result = blocking(move || {
        let path = local_path(&url)?;
        if !path.exists() {
            return Err(OpError::not_found(&url));
        }
        apply_permissions(&url, &path, permissions)
    })
    .await;
    finish_result(endpoint, result).await
}

async fn serve_set_mtime(endpoint: &WorkerEndpoint, url: ResourceUrl, mtime: i64) -> bool {
    let result = blocking(move || {
        let path = local_path(&url)?;
        let file = File::open(&path).map_err(|e| OpError::io(&url, &e))?;
        let time = UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64);
        file.set_modified(time).map_err(|e| OpError::io(&url, &e))
    })
    .await;
    finish_result(endpoint, result).await
}

async fn serve_remove(endpoint: &WorkerEndpoint, url: ResourceUrl, is_file: bool) -> bool {
    let result = blocking(move || {
        let path = local_path(&url)?;
        if fs::symlink_metadata(&path).is_err() {
            return Err(OpError::not_found(&url));
        }
        let outcome = if is_file {
            fs::remove_file(&path)
        } else {
            // The capability registry advertises recursive deletion for the
            // local backend.
            fs::remove_dir_all(&path)
        };
        outcome.map_err(|e| OpError::io(&url, &e))
    })
    .await;
    finish_result(endpoint, result).await
}

async fn serve_symlink(
    endpoint: &WorkerEndpoint,
    target: String,
    dst: ResourceUrl,
    overwrite: bool,
) -> bool {
    let result = blocking(move || {
        let path = local_path(&dst)?;
        if fs::symlink_metadata(&path).is_ok() {
            if !overwrite {
                return Err(OpError::new(ErrorKind::FileAlreadyExists, dst.to_string()));
            }
            fs::remove_file(&path).map_err(|e| OpError::io(&dst, &e))?;
        }
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&target, &path).map_err(|e| OpError::io(&dst, &e))
        }
        #[cfg(not(unix))]
        {
            let _ = target;
            Err(OpError::unsupported(&dst))
        }
    })
    .await;
    finish_result(endpoint, result).await
}

async fn serve_get(endpoint: &WorkerEndpoint, url: ResourceUrl, offset: u64) -> bool {
    let opened = {
        let url = url.clone();
        blocking(move || {
            let path = local_path(&url)?;
            if path.is_dir() {
                return Err(OpError::new(
                    ErrorKind::AccessDenied,
                    format!("{url}: is a directory"),
                ));
            }
            let mut file = File::open(&path).map_err(|e| OpError::io(&url, &e))?;
            let total = file.metadata().map_err(|e| OpError::io(&url, &e))?.len();
            if offset > 0 {
                file.seek(SeekFrom::Start(offset))
                    .map_err(|e| OpError::io(&url, &e))?;
            }
            Ok((file, total))
        })
        .await
    };
    let (mut file, total) = match opened {
        Ok(opened) => opened,
        Err(err) => return fail(endpoint, err).await,
    };

    let meta = std::collections::HashMap::from([("total-size".to_string(), total.to_string())]);
    if !endpoint.emit(WorkerEvent::MetaData(meta)).await {
        return false;
    }
    loop {
        let url = url.clone();
        let read = blocking(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            let n = file.read(&mut buf).map_err(|e| OpError::io(&url, &e))?;
            buf.truncate(n);
            Ok((file, buf))
        })
        .await;
        let (f, chunk) = match read {
            Ok(read) => read,
            Err(err) => return fail(endpoint, err).await,
        };
        file = f;
        let done = chunk.is_empty();
        if !endpoint.emit(WorkerEvent::Data(chunk)).await {
            return false;
        }
        if done {
            break;
        }
    }
    finish(endpoint).await
}

async fn serve_put(
    endpoint: &mut WorkerEndpoint,
    url: ResourceUrl,
    permissions: i64,
    overwrite: bool,
    resume: bool,
) -> bool {
    let existing = {
        let url = url.clone();
        blocking(move || {
            let path = local_path(&url)?;
            if path.is_dir() {
                return Err(OpError::new(ErrorKind::DirAlreadyExists, url.to_string()));
            }
            Ok(fs::metadata(&path).map(|m| m.len()).unwrap_or(0))
        })
        .await
    };
    let existing = match existing {
        Ok(len) => len,
        Err(err) => return fail(endpoint, err).await,
    };
    let offset = if overwrite { 0 } else { existing };
    if !endpoint.emit(WorkerEvent::CanResume(offset)).await {
        return false;
    }

    let mut writer: Option<File> = None;
    let mut keep_existing = false;
    let mut answered = false;
    loop {
        if !answered && !endpoint.emit(WorkerEvent::DataRequested).await {
            return false;
        }
        match endpoint.next_command().await {
            Some(WorkerCommand::ResumeAnswer(keep)) => {
                keep_existing = keep && (resume || !overwrite);
                answered = true;
            }
            Some(WorkerCommand::Data(chunk)) => {
                if chunk.is_empty() {
                    break;
                }
                let url_for_write = url.clone();
                let file = writer.take();
                let append = keep_existing;
                let written = blocking(move || {
                    let mut file = match file {
                        Some(file) => file,
                        None => {
                            let path = local_path(&url_for_write)?;
                            let mut options = File::options();
                            if append {
                                options.append(true).create(true);
                            } else {
                                options.write(true).create(true).truncate(true);
                            }
                            options
                                .open(&path)
                                .map_err(|e| OpError::io(&url_for_write, &e))?
                        }
                    };
                    file.write_all(&chunk)
                        .map_err(|e| OpError::io(&url_for_write, &e))?;
                    Ok(file)
                })
                .await;
                match written {
                    Ok(file) => writer = Some(file),
                    Err(err) => return fail(endpoint, err).await,
                }
                if !endpoint.emit(WorkerEvent::DataRequested).await {
                    return false;
                }
                answered = true;
            }
            Some(other) => {
                return fail(
                    endpoint,
                    OpError::internal(format!("unexpected command during put: {other:?}")),
                )
                .await;
            }
            None => return false,
        }
    }

    // An empty upload still creates the file.
    let finalized = blocking(move || {
        let path = local_path(&url)?;
        if writer.is_none() && !keep_existing {
            File::create(&path).map_err(|e| OpError::io(&url, &e))?;
        }
        drop(writer);
        apply_permissions(&url, &path, permissions)
    })
    .await;
    finish_result(endpoint, finalized).await
}

async fn serve_copy(
    endpoint: &WorkerEndpoint,
    src: ResourceUrl,
    dst: ResourceUrl,
    permissions: i64,
    overwrite: bool,
) -> bool {
    let result = blocking(move || {
        let src_path = local_path(&src)?;
        let dst_path = local_path(&dst)?;
        if src_path.is_dir() {
            // Directory trees are the orchestrator's business.
            return Err(OpError::unsupported(&src));
        }
        if !src_path.exists() && fs::symlink_metadata(&src_path).is_err() {
            return Err(OpError::not_found(&src));
        }
        if dst_path.exists() && !overwrite {
            let kind = if dst_path.is_dir() {
                ErrorKind::DirAlreadyExists
            } else {
                ErrorKind::FileAlreadyExists
            };
            return Err(OpError::new(kind, dst.to_string()));
        }
        fs::copy(&src_path, &dst_path).map_err(|e| OpError::io(&src, &e))?;
        apply_permissions(&dst, &dst_path, permissions)
    })
    .await;
    finish_result(endpoint, result).await
}

fn apply_permissions(url: &ResourceUrl, path: &Path, permissions: i64) -> Result<(), OpError> {
    if permissions < 0 {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(permissions as u32))
            .map_err(|e| OpError::io(url, &e))
    }
    #[cfg(not(unix))]
    {
        let _ = (url, path);
        Ok(())
    }
}
