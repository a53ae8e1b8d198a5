//! Single-exchange operations: one command, one terminal event.
//!
//! Every operation here follows the same shape: assign a worker for the
//! target, send the command, collect events until `Finished` or `Error`.
//! Redirects re-assign and re-send transparently, subject to the engine's
//! cycle limit.

use wharf_core::{EntryRecord, ErrorKind, OpError, ResourceUrl, WorkerCommand, WorkerEvent};

use crate::operation::OpEnv;

/// Run one command to completion, following redirects. Returns the entry
/// batches the worker produced along the way.
pub(crate) async fn single_command(
    env: &OpEnv,
    cmd: WorkerCommand,
) -> Result<Vec<EntryRecord>, OpError> {
    let url = cmd
        .url()
        .cloned()
        .ok_or_else(|| OpError::internal("command has no target URL"))?;
    command_on(env, url, cmd).await
}

/// Like [`single_command`], but the worker is assigned for `assign_url`
/// rather than the command's own target. Used when a command names two
/// backends and the non-obvious side must run it.
pub(crate) async fn command_on(
    env: &OpEnv,
    assign_url: ResourceUrl,
    cmd: WorkerCommand,
) -> Result<Vec<EntryRecord>, OpError> {
    let mut cmd = cmd;
    let mut visited = vec![assign_url.clone()];
    let mut worker = env.dispatch.assign(&assign_url).await?;
    worker.send(cmd.clone()).await?;

    let mut entries = Vec::new();
    loop {
        match worker.recv().await? {
            WorkerEvent::Finished => return Ok(entries),
            WorkerEvent::Error(err) => return Err(err),
            WorkerEvent::Entries(batch) => entries.extend(batch),
            WorkerEvent::Redirect(next) => {
                let repeats = visited.iter().filter(|u| **u == next).count();
                if repeats > env.config.redirect_limit {
                    return Err(OpError::new(ErrorKind::CyclicRedirection, next.to_string()));
                }
                tracing::debug!(from = %visited.last().expect("visited never empty"), to = %next, "redirect");
                env.dispatch.put_on_hold(worker, next.clone()).await;
                visited.push(next.clone());
                cmd = cmd.with_url(next.clone());
                worker = env.dispatch.assign(&next).await?;
                worker.send(cmd.clone()).await?;
                entries.clear();
            }
            WorkerEvent::MetaData(_) => {}
            other => {
                return Err(OpError::internal(format!(
                    "unexpected worker event {other:?}"
                )));
            }
        }
    }
}

pub(crate) async fn stat(env: &OpEnv, url: &ResourceUrl) -> Result<EntryRecord, OpError> {
    let mut entries = single_command(env, WorkerCommand::Stat { url: url.clone() }).await?;
    entries
        .drain(..)
        .next()
        .ok_or_else(|| OpError::internal(format!("stat of {url} produced no entry")))
}

pub(crate) async fn mkdir(env: &OpEnv, url: &ResourceUrl, permissions: i64) -> Result<(), OpError> {
    single_command(
        env,
        WorkerCommand::Mkdir {
            url: url.clone(),
            permissions,
        },
    )
    .await?;
    env.notifier.files_added(url.parent().unwrap_or_else(|| url.clone()));
    Ok(())
}

pub(crate) async fn rename(
    env: &OpEnv,
    src: &ResourceUrl,
    dst: &ResourceUrl,
    overwrite: bool,
) -> Result<(), OpError> {
    // A same-backend rename runs there; with exactly one local side, the
    // other backend runs the command against the local path.
    let assign = if src.same_backend(dst) {
        src.clone()
    } else if src.is_local() {
        dst.clone()
    } else if dst.is_local() {
        src.clone()
    } else {
        return Err(OpError::unsupported(dst));
    };
    command_on(
        env,
        assign,
        WorkerCommand::Rename {
            src: src.clone(),
            dst: dst.clone(),
            overwrite,
        },
    )
    .await?;
    env.notifier.file_renamed(src.clone(), dst.clone());
    Ok(())
}

pub(crate) async fn chmod(env: &OpEnv, url: &ResourceUrl, permissions: i64) -> Result<(), OpError> {
    single_command(
        env,
        WorkerCommand::Chmod {
            url: url.clone(),
            permissions,
        },
    )
    .await?;
    Ok(())
}

pub(crate) async fn set_modification_time(
    env: &OpEnv,
    url: &ResourceUrl,
    mtime: i64,
) -> Result<(), OpError> {
    single_command(
        env,
        WorkerCommand::SetModificationTime {
            url: url.clone(),
            mtime,
        },
    )
    .await?;
    Ok(())
}

pub(crate) async fn remove(env: &OpEnv, url: &ResourceUrl, is_file: bool) -> Result<(), OpError> {
    remove_silent(env, url, is_file).await?;
    env.notifier.files_removed(vec![url.clone()]);
    Ok(())
}

/// Removal without a change notice, for orchestrators that aggregate their
/// own notification.
pub(crate) async fn remove_silent(
    env: &OpEnv,
    url: &ResourceUrl,
    is_file: bool,
) -> Result<(), OpError> {
    single_command(
        env,
        WorkerCommand::Remove {
            url: url.clone(),
            is_file,
        },
    )
    .await?;
    Ok(())
}

pub(crate) async fn symlink(
    env: &OpEnv,
    target: &str,
    dst: &ResourceUrl,
    overwrite: bool,
) -> Result<(), OpError> {
    single_command(
        env,
        WorkerCommand::Symlink {
            target: target.to_owned(),
            dst: dst.clone(),
            overwrite,
        },
    )
    .await?;
    env.notifier.files_added(dst.parent().unwrap_or_else(|| dst.clone()));
    Ok(())
}
