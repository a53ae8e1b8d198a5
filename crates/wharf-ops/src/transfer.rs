//! Streaming exchanges: get, put, and the redirect-following stream both are
//! built on.

use std::collections::HashMap;

use wharf_core::{ErrorKind, OpError, ResourceUrl, WorkerCommand, WorkerEvent, WorkerHandle};

use crate::operation::OpEnv;
use crate::progress::Reporter;

/// One streaming exchange with a worker.
///
/// Redirects are followed transparently by re-assigning a worker and
/// re-submitting the opening command; the displaced worker is parked on the
/// dispatcher's hold pool. Metadata events are absorbed into [`Self::metadata`]
/// rather than surfaced.
pub(crate) struct TransferStream {
    worker: WorkerHandle,
    cmd: WorkerCommand,
    visited: Vec<ResourceUrl>,
    metadata: HashMap<String, String>,
}

impl TransferStream {
    /// Assign a worker for the command's target and submit it.
    pub async fn open(env: &OpEnv, cmd: WorkerCommand) -> Result<Self, OpError> {
        let url = cmd
            .url()
            .cloned()
            .ok_or_else(|| OpError::internal("stream command has no target URL"))?;
        let worker = match env.dispatch.take_from_hold(&url).await {
            Some(held) => held,
            None => env.dispatch.assign(&url).await?,
        };
        worker.send(cmd.clone()).await?;
        Ok(Self {
            worker,
            cmd,
            visited: vec![url],
            metadata: HashMap::new(),
        })
    }

    /// The URL the stream currently targets.
    pub fn url(&self) -> &ResourceUrl {
        self.visited.last().expect("visited never empty")
    }

    /// Total size announced by the worker, if any.
    pub fn total_size(&self) -> Option<u64> {
        self.metadata.get("total-size")?.parse().ok()
    }

    pub async fn send(&mut self, cmd: WorkerCommand) -> Result<(), OpError> {
        self.worker.send(cmd).await
    }

    /// Next meaningful event. Redirects and metadata never surface here.
    pub async fn next(&mut self, env: &OpEnv) -> Result<WorkerEvent, OpError> {
        loop {
            match self.worker.recv().await? {
                WorkerEvent::MetaData(map) => self.metadata.extend(map),
                WorkerEvent::Redirect(next) => self.redirect(env, next).await?,
                event => return Ok(event),
            }
        }
    }

    async fn redirect(&mut self, env: &OpEnv, next: ResourceUrl) -> Result<(), OpError> {
        let repeats = self.visited.iter().filter(|u| **u == next).count();
        if repeats > env.config.redirect_limit {
            return Err(OpError::new(ErrorKind::CyclicRedirection, next.to_string()));
        }
        tracing::debug!(from = %self.url(), to = %next, "redirect");
        let replacement = match env.dispatch.take_from_hold(&next).await {
            Some(held) => held,
            None => env.dispatch.assign(&next).await?,
        };
        let displaced = std::mem::replace(&mut self.worker, replacement);
        env.dispatch.put_on_hold(displaced, next.clone()).await;
        self.cmd = self.cmd.with_url(next.clone());
        self.visited.push(next);
        self.worker.send(self.cmd.clone()).await
    }
}

/// Bounded-chunk queue for the upload side of a pump.
///
/// Incoming buffers of any size go in; what comes out is sliced to the
/// configured ceiling, with the remainder held for the next request.
#[derive(Debug, Default)]
pub(crate) struct ChunkBuffer {
    pending: Vec<u8>,
}

impl ChunkBuffer {
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Take at most `max` bytes, or None when empty.
    pub fn take(&mut self, max: usize) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }
        if self.pending.len() <= max {
            return Some(std::mem::take(&mut self.pending));
        }
        let rest = self.pending.split_off(max);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Download a whole resource into memory.
pub(crate) async fn get(
    env: &OpEnv,
    reporter: &mut Reporter,
    url: &ResourceUrl,
) -> Result<Vec<u8>, OpError> {
    let mut stream = TransferStream::open(
        env,
        WorkerCommand::Get {
            url: url.clone(),
            offset: 0,
        },
    )
    .await?;
    reporter.current = Some(url.clone());

    let mut body = Vec::new();
    loop {
        match stream.next(env).await? {
            WorkerEvent::Data(chunk) => {
                if chunk.is_empty() {
                    continue;
                }
                body.extend_from_slice(&chunk);
                reporter.processed_bytes = body.len() as u64;
                if let Some(total) = stream.total_size() {
                    reporter.total_bytes = total;
                }
                reporter.emit();
            }
            WorkerEvent::Finished => return Ok(body),
            WorkerEvent::Error(err) => return Err(err),
            other => {
                return Err(OpError::internal(format!(
                    "unexpected event during get: {other:?}"
                )));
            }
        }
    }
}

/// Upload a buffer, honoring the one-chunk-per-request discipline.
pub(crate) async fn put(
    env: &OpEnv,
    reporter: &mut Reporter,
    url: &ResourceUrl,
    data: Vec<u8>,
    permissions: i64,
    overwrite: bool,
) -> Result<(), OpError> {
    let mut stream = TransferStream::open(
        env,
        WorkerCommand::Put {
            url: url.clone(),
            permissions,
            overwrite,
            resume: false,
        },
    )
    .await?;
    reporter.current = Some(url.clone());
    reporter.total_bytes = data.len() as u64;

    let mut sent = 0usize;
    let mut done = false;
    loop {
        match stream.next(env).await? {
            WorkerEvent::CanResume(offset) => {
                if offset > 0 && !overwrite {
                    return Err(OpError::new(
                        ErrorKind::FileAlreadyExists,
                        stream.url().to_string(),
                    ));
                }
                stream.send(WorkerCommand::ResumeAnswer(false)).await?;
            }
            WorkerEvent::DataRequested => {
                if sent < data.len() {
                    let end = (sent + env.config.max_chunk_size).min(data.len());
                    stream.send(WorkerCommand::Data(data[sent..end].to_vec())).await?;
                    sent = end;
                    reporter.processed_bytes = sent as u64;
                    reporter.emit();
                } else if !done {
                    stream.send(WorkerCommand::Data(Vec::new())).await?;
                    done = true;
                }
            }
            WorkerEvent::Finished => {
                env.notifier
                    .files_added(url.parent().unwrap_or_else(|| url.clone()));
                return Ok(());
            }
            WorkerEvent::Error(err) => return Err(err),
            other => {
                return Err(OpError::internal(format!(
                    "unexpected event during put: {other:?}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_buffer_slices_at_ceiling() {
        let mut buf = ChunkBuffer::default();
        buf.push(&[1u8; 10]);
        assert_eq!(buf.take(4).unwrap().len(), 4);
        assert_eq!(buf.take(4).unwrap().len(), 4);
        assert_eq!(buf.take(4).unwrap().len(), 2);
        assert!(buf.take(4).is_none());
    }

    #[test]
    fn chunk_buffer_returns_whole_small_payloads() {
        let mut buf = ChunkBuffer::default();
        buf.push(b"abc");
        assert_eq!(buf.take(1024).unwrap(), b"abc");
        assert!(buf.is_empty());
    }
}
