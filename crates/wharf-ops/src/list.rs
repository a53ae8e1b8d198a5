//! Directory listing, flat and recursive.
//!
//! Recursive listings are driven by an explicit worklist rather than
//! recursion: every directory entry that survives the filters is queued with
//! the path prefix its children will be re-emitted under. Exactly one list
//! exchange is in flight at a time.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use wharf_core::{
    EntryRecord, ErrorKind, OpError, ResourceUrl, WorkerCommand, WorkerEvent,
};

use crate::operation::OpEnv;
use crate::progress::Reporter;

/// Filters for a listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Descend into subdirectories (symlinks are never followed).
    pub recursive: bool,
    /// Forward entries whose name starts with a dot.
    pub include_hidden: bool,
}

/// One message on a listing's update stream.
#[derive(Debug, Clone)]
pub enum ListUpdate {
    /// A batch of entries, names already rewritten under their prefix.
    Entries(Vec<EntryRecord>),
    /// The listed URL lives elsewhere; subsequent entries come from there.
    Redirect(ResourceUrl),
}

/// One list exchange, redirects followed. Returns the entries plus the chain
/// of redirect targets encountered.
async fn list_one(
    env: &OpEnv,
    url: &ResourceUrl,
) -> Result<(Vec<EntryRecord>, Vec<ResourceUrl>), OpError> {
    if !env.caps.supports_listing(url) {
        return Err(OpError::unsupported(url));
    }
    let mut cmd = WorkerCommand::ListDir { url: url.clone() };
    let mut visited = vec![url.clone()];
    let mut redirects = Vec::new();
    let mut worker = env.dispatch.assign(url).await?;
    worker.send(cmd.clone()).await?;

    let mut entries = Vec::new();
    loop {
        match worker.recv().await? {
            WorkerEvent::Finished => return Ok((entries, redirects)),
            WorkerEvent::Error(err) => return Err(err),
            WorkerEvent::Entries(batch) => entries.extend(batch),
            WorkerEvent::MetaData(_) => {}
            WorkerEvent::Redirect(next) => {
                let repeats = visited.iter().filter(|u| **u == next).count();
                if repeats > env.config.redirect_limit {
                    return Err(OpError::new(ErrorKind::CyclicRedirection, next.to_string()));
                }
                env.dispatch.put_on_hold(worker, next.clone()).await;
                visited.push(next.clone());
                redirects.push(next.clone());
                cmd = cmd.with_url(next.clone());
                worker = env.dispatch.assign(&next).await?;
                worker.send(cmd.clone()).await?;
                entries.clear();
            }
            other => {
                return Err(OpError::internal(format!(
                    "unexpected event during listing: {other:?}"
                )));
            }
        }
    }
}

fn passes_hidden_filter(entry: &EntryRecord, include_hidden: bool) -> bool {
    include_hidden || !entry.is_hidden()
}

/// Stream a listing to `updates`. Resolves with the forwarded entry count.
pub(crate) async fn run_listing(
    env: &OpEnv,
    url: ResourceUrl,
    opts: ListOptions,
    updates: &mpsc::Sender<ListUpdate>,
    mut reporter: Option<&mut Reporter>,
) -> Result<u64, OpError> {
    let mut worklist: VecDeque<(ResourceUrl, String)> = VecDeque::new();
    worklist.push_back((url, String::new()));
    let mut forwarded: u64 = 0;

    while let Some((dir, prefix)) = worklist.pop_front() {
        let top_level = prefix.is_empty();
        let (entries, redirects) = list_one(env, &dir).await?;
        if top_level {
            for target in redirects {
                let _ = updates.send(ListUpdate::Redirect(target)).await;
            }
        }

        let mut batch = Vec::new();
        for entry in entries {
            if entry.is_dot_entry() {
                // Dot entries only make sense for the directory the consumer
                // asked about.
                if !top_level || opts.recursive {
                    continue;
                }
            } else if !passes_hidden_filter(&entry, opts.include_hidden) {
                continue;
            }

            let name = entry.name().to_string();
            if opts.recursive && entry.is_dir() && !entry.is_link() && !entry.is_dot_entry() {
                worklist.push_back((dir.join(&name), format!("{prefix}{name}/")));
            }

            let mut forwarded_entry = entry;
            if !prefix.is_empty() {
                forwarded_entry.set_name(format!("{prefix}{name}"));
            }
            batch.push(forwarded_entry);
        }

        forwarded += batch.len() as u64;
        if let Some(reporter) = reporter.as_deref_mut() {
            reporter.processed_items = forwarded;
            reporter.current = Some(dir.clone());
            reporter.emit();
        }
        if !batch.is_empty() {
            let _ = updates.send(ListUpdate::Entries(batch)).await;
        }
    }
    Ok(forwarded)
}

/// Recursive, hidden-inclusive listing collected into memory, dot entries
/// dropped, names rewritten relative to `url`. The orchestrators build their
/// worklists from this.
pub(crate) async fn collect_recursive(
    env: &OpEnv,
    url: &ResourceUrl,
) -> Result<Vec<EntryRecord>, OpError> {
    let mut worklist: VecDeque<(ResourceUrl, String)> = VecDeque::new();
    worklist.push_back((url.clone(), String::new()));
    let mut collected = Vec::new();

    while let Some((dir, prefix)) = worklist.pop_front() {
        let (entries, _) = list_one(env, &dir).await?;
        for entry in entries {
            if entry.is_dot_entry() {
                continue;
            }
            let name = entry.name().to_string();
            if entry.is_dir() && !entry.is_link() {
                worklist.push_back((dir.join(&name), format!("{prefix}{name}/")));
            }
            let mut collected_entry = entry;
            collected_entry.set_name(format!("{prefix}{name}"));
            collected.push(collected_entry);
        }
    }
    Ok(collected)
}
