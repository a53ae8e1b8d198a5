//! Single-file copy with a strategy ladder.
//!
//! Three strategies, tried in order, each abandoned only on
//! `UnsupportedAction`:
//!
//! 1. native: one worker does the whole job (`Rename` for moves,
//!    `CopyNative` for copies) because source and destination share a
//!    backend,
//! 2. local-assisted: one side is a plain local file the other side's
//!    worker can touch directly,
//! 3. pump: a `Get` stream feeding a `Put` stream chunk by chunk.
//!
//! Conflicts (destination exists) are NOT resolved here; they surface as
//! errors for the caller to resolve and retry with adjusted flags.

use wharf_core::{
    ConflictKind, ConflictPrompt, ErrorKind, OpError, OverwriteDecision, ResourceUrl,
    WorkerCommand, WorkerEvent,
};

use crate::operation::OpEnv;
use crate::progress::Reporter;
use crate::simple;
use crate::transfer::{ChunkBuffer, TransferStream};

/// Knobs for a single-file copy.
#[derive(Debug, Clone)]
pub struct CopyFlags {
    /// Replace an existing destination.
    pub overwrite: bool,
    /// Append to a partial destination instead of restarting.
    pub resume: bool,
    /// Permissions for the destination, `-1` for backend default.
    pub permissions: i64,
    /// Delete the source once the destination is complete.
    pub move_source: bool,
}

impl Default for CopyFlags {
    fn default() -> Self {
        Self {
            overwrite: false,
            resume: false,
            permissions: -1,
            move_source: false,
        }
    }
}

pub(crate) async fn file_copy(
    env: &OpEnv,
    reporter: &mut Reporter,
    src: &ResourceUrl,
    dst: &ResourceUrl,
    flags: &CopyFlags,
) -> Result<(), OpError> {
    reporter.current = Some(dst.clone());

    if src.same_backend(dst) {
        let native_ok = if flags.move_source {
            env.caps.can_rename_in_place(src)
        } else {
            env.caps.can_copy_in_place(src)
        };
        if native_ok {
            match native(env, src, dst, flags).await {
                Err(err) if err.is_unsupported() => {
                    tracing::debug!(%src, %dst, "native strategy unsupported, falling back");
                }
                other => return other,
            }
        }
    } else if src.is_local() != dst.is_local() {
        if let Some(anchor) = assisted_anchor(env, src, dst, flags) {
            match assisted(env, anchor, src, dst, flags).await {
                Err(err) if err.is_unsupported() => {
                    tracing::debug!(%src, %dst, "local-assisted strategy unsupported, falling back");
                }
                other => return other,
            }
        }
    }

    pump(env, reporter, src, dst, flags).await?;
    if flags.move_source {
        simple::remove(env, src, true).await?;
    } else {
        env.notifier
            .files_added(dst.parent().unwrap_or_else(|| dst.clone()));
    }
    Ok(())
}

/// One worker runs the whole exchange on its own backend.
async fn native(
    env: &OpEnv,
    src: &ResourceUrl,
    dst: &ResourceUrl,
    flags: &CopyFlags,
) -> Result<(), OpError> {
    if flags.move_source {
        simple::single_command(
            env,
            WorkerCommand::Rename {
                src: src.clone(),
                dst: dst.clone(),
                overwrite: flags.overwrite,
            },
        )
        .await?;
        env.notifier.file_renamed(src.clone(), dst.clone());
    } else {
        simple::single_command(
            env,
            WorkerCommand::CopyNative {
                src: src.clone(),
                dst: dst.clone(),
                permissions: flags.permissions,
                overwrite: flags.overwrite,
            },
        )
        .await?;
        env.notifier
            .files_added(dst.parent().unwrap_or_else(|| dst.clone()));
    }
    Ok(())
}

/// The remote side to anchor a local-assisted exchange on, if capabilities
/// allow one.
fn assisted_anchor<'a>(
    env: &OpEnv,
    src: &'a ResourceUrl,
    dst: &'a ResourceUrl,
    flags: &CopyFlags,
) -> Option<&'a ResourceUrl> {
    if dst.is_local() {
        let ok = if flags.move_source {
            env.caps.can_rename_to_file(src)
        } else {
            env.caps.can_copy_to_file(src)
        };
        ok.then_some(src)
    } else {
        let ok = if flags.move_source {
            env.caps.can_rename_from_file(dst)
        } else {
            env.caps.can_copy_from_file(dst)
        };
        ok.then_some(dst)
    }
}

/// The remote worker touches the local file directly.
async fn assisted(
    env: &OpEnv,
    anchor: &ResourceUrl,
    src: &ResourceUrl,
    dst: &ResourceUrl,
    flags: &CopyFlags,
) -> Result<(), OpError> {
    let cmd = if flags.move_source {
        WorkerCommand::Rename {
            src: src.clone(),
            dst: dst.clone(),
            overwrite: flags.overwrite,
        }
    } else {
        WorkerCommand::CopyNative {
            src: src.clone(),
            dst: dst.clone(),
            permissions: flags.permissions,
            overwrite: flags.overwrite,
        }
    };
    simple::command_on(env, anchor.clone(), cmd).await?;
    if flags.move_source {
        env.notifier.file_renamed(src.clone(), dst.clone());
    } else {
        env.notifier
            .files_added(dst.parent().unwrap_or_else(|| dst.clone()));
    }
    Ok(())
}

/// Get/put data pump.
///
/// The put side opens first so its resumability answer can pick the get
/// offset. Data flows strictly one chunk per `DataRequested`, sliced to the
/// configured ceiling.
async fn pump(
    env: &OpEnv,
    reporter: &mut Reporter,
    src: &ResourceUrl,
    dst: &ResourceUrl,
    flags: &CopyFlags,
) -> Result<(), OpError> {
    let mut put = TransferStream::open(
        env,
        WorkerCommand::Put {
            url: dst.clone(),
            permissions: flags.permissions,
            overwrite: flags.overwrite,
            resume: flags.resume,
        },
    )
    .await?;

    // Resumability handshake before any data moves.
    let offset = loop {
        match put.next(env).await? {
            WorkerEvent::CanResume(offset) => break offset,
            WorkerEvent::Error(err) => return Err(err),
            other => {
                return Err(OpError::internal(format!(
                    "expected resumability answer, got {other:?}"
                )));
            }
        }
    };
    let resuming = if offset == 0 {
        false
    } else if flags.resume || env.caps.auto_resume() {
        true
    } else if flags.overwrite {
        false
    } else {
        // Destination exists and is resumable; let the interaction service
        // pick between appending and starting over.
        let prompt = ConflictPrompt {
            kind: ConflictKind::FileExists,
            src: src.clone(),
            dst: put.url().clone(),
            src_size: None,
            dst_size: Some(offset as i64),
            src_mtime: None,
            dst_mtime: None,
            offer_resume: true,
        };
        match env.interact.decide_overwrite(prompt).await {
            OverwriteDecision::Resume | OverwriteDecision::ResumeAll => true,
            OverwriteDecision::Overwrite | OverwriteDecision::OverwriteAll => false,
            OverwriteDecision::Cancel => return Err(OpError::cancelled()),
            _ => {
                return Err(OpError::new(
                    ErrorKind::FileAlreadyExists,
                    put.url().to_string(),
                ));
            }
        }
    };
    put.send(WorkerCommand::ResumeAnswer(resuming)).await?;
    let offset = if resuming { offset } else { 0 };

    let mut get = TransferStream::open(
        env,
        WorkerCommand::Get {
            url: src.clone(),
            offset,
        },
    )
    .await?;

    reporter.processed_bytes += offset;
    let mut chunks = ChunkBuffer::default();
    let mut source = SourceState::Flowing;
    let mut eof_sent = false;
    loop {
        match put.next(env).await? {
            WorkerEvent::DataRequested => {
                if chunks.is_empty() && source == SourceState::Flowing {
                    source = fill(env, &mut get, &mut chunks).await?;
                }
                if reporter.total_bytes == 0 {
                    if let Some(total) = get.total_size() {
                        reporter.total_bytes = total;
                    }
                }
                match chunks.take(env.config.max_chunk_size) {
                    Some(chunk) => {
                        reporter.processed_bytes += chunk.len() as u64;
                        put.send(WorkerCommand::Data(chunk)).await?;
                        reporter.emit();
                    }
                    None if !eof_sent => {
                        put.send(WorkerCommand::Data(Vec::new())).await?;
                        eof_sent = true;
                    }
                    None => {}
                }
            }
            WorkerEvent::Finished => break,
            WorkerEvent::Error(err) => return Err(err),
            other => {
                return Err(OpError::internal(format!(
                    "unexpected event during pump: {other:?}"
                )));
            }
        }
    }
    if source == SourceState::Finished {
        return Ok(());
    }
    drain(env, &mut get).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    /// More data may follow.
    Flowing,
    /// End of data seen; the terminal event is still pending.
    Eof,
    /// Terminal event consumed.
    Finished,
}

/// Pull events from the source until one chunk is buffered or the stream
/// ends.
async fn fill(
    env: &OpEnv,
    get: &mut TransferStream,
    chunks: &mut ChunkBuffer,
) -> Result<SourceState, OpError> {
    loop {
        match get.next(env).await? {
            WorkerEvent::Data(chunk) if chunk.is_empty() => return Ok(SourceState::Eof),
            WorkerEvent::Data(chunk) => {
                chunks.push(&chunk);
                return Ok(SourceState::Flowing);
            }
            WorkerEvent::Finished => return Ok(SourceState::Finished),
            WorkerEvent::Error(err) => return Err(err),
            other => {
                return Err(OpError::internal(format!(
                    "unexpected event from source: {other:?}"
                )));
            }
        }
    }
}

/// Consume the source stream's terminal event.
async fn drain(env: &OpEnv, get: &mut TransferStream) -> Result<(), OpError> {
    loop {
        match get.next(env).await? {
            WorkerEvent::Finished => return Ok(()),
            WorkerEvent::Error(err) => return Err(err),
            WorkerEvent::Data(_) => {}
            other => {
                return Err(OpError::internal(format!(
                    "unexpected event from source: {other:?}"
                )));
            }
        }
    }
}
