//! The delete orchestrator.
//!
//! Sources are stated and classified, directory trees are expanded through a
//! recursive listing when the backend cannot delete recursively on its own,
//! and deletion proceeds files first, then symlinks, then directories
//! deepest-first. Parent-directory change notices are suppressed with exactly
//! one pause/resume pair around the whole run, restored on every exit path.

use std::sync::Arc;

use serde::Serialize;

use wharf_core::{Notifier, OpError, ResourceUrl};

use crate::list;
use crate::operation::OpEnv;
use crate::progress::Reporter;
use crate::simple;

/// Outcome of a finished deletion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteSummary {
    pub files: u64,
    pub symlinks: u64,
    pub dirs: u64,
}

/// Resumes suppressed notification dirs when dropped, so cancellation and
/// error paths restore them without explicit handling.
struct SuppressGuard {
    notifier: Arc<Notifier>,
    dirs: Vec<ResourceUrl>,
}

impl SuppressGuard {
    fn new(notifier: Arc<Notifier>, dirs: Vec<ResourceUrl>) -> Self {
        notifier.pause_updates(&dirs);
        Self { notifier, dirs }
    }
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        self.notifier.resume_updates(&self.dirs);
    }
}

pub(crate) async fn run(
    env: &OpEnv,
    reporter: &mut Reporter,
    sources: Vec<ResourceUrl>,
) -> Result<DeleteSummary, OpError> {
    let mut files: Vec<ResourceUrl> = Vec::new();
    let mut symlinks: Vec<ResourceUrl> = Vec::new();
    let mut dirs: Vec<ResourceUrl> = Vec::new();
    // Directories the backend deletes recursively in one command.
    let mut recursive_dirs: Vec<ResourceUrl> = Vec::new();
    let mut planned_sources: Vec<ResourceUrl> = Vec::new();

    for url in &sources {
        if !env.caps.supports_deleting(url) {
            tracing::warn!(%url, "backend cannot delete this resource, skipping");
            continue;
        }
        planned_sources.push(url.clone());
        let entry = simple::stat(env, url).await?;
        if entry.is_link() {
            symlinks.push(url.clone());
        } else if entry.is_dir() {
            if env.caps.can_delete_recursive(url) {
                recursive_dirs.push(url.clone());
            } else {
                dirs.push(url.clone());
                let expanded = list::collect_recursive(env, url).await?;
                for child in expanded {
                    let child_url = url.join(child.name());
                    if child.is_link() {
                        symlinks.push(child_url);
                    } else if child.is_dir() {
                        dirs.push(child_url);
                    } else {
                        files.push(child_url);
                    }
                }
            }
        } else {
            files.push(url.clone());
        }
    }

    reporter.total_items =
        (files.len() + symlinks.len() + dirs.len() + recursive_dirs.len()) as u64;
    reporter.emit();

    // One suppression bracket for the whole run, keyed by every parent whose
    // listing would otherwise churn per deleted item.
    let parents = suppressed_parents(&[
        files.as_slice(),
        symlinks.as_slice(),
        dirs.as_slice(),
        recursive_dirs.as_slice(),
    ]);
    let _guard = SuppressGuard::new(env.notifier.clone(), parents);

    let mut summary = DeleteSummary::default();
    for url in &files {
        simple::remove_silent(env, url, true).await?;
        summary.files += 1;
        reporter.processed_items += 1;
        reporter.current = Some(url.clone());
        reporter.emit();
    }
    for url in &symlinks {
        simple::remove_silent(env, url, true).await?;
        summary.symlinks += 1;
        reporter.processed_items += 1;
        reporter.current = Some(url.clone());
        reporter.emit();
    }
    // Children were discovered after their parents; reverse order empties a
    // directory before its parent is removed.
    for url in dirs.iter().rev().chain(recursive_dirs.iter()) {
        simple::remove_silent(env, url, false).await?;
        summary.dirs += 1;
        reporter.processed_items += 1;
        reporter.current = Some(url.clone());
        reporter.emit();
    }

    drop(_guard);
    env.notifier.files_removed(planned_sources);
    Ok(summary)
}

/// Parent of every planned deletion, deduplicated. Nested directories
/// contribute their own parents, not just the top-level sources.
fn suppressed_parents(groups: &[&[ResourceUrl]]) -> Vec<ResourceUrl> {
    let mut parents: Vec<ResourceUrl> = groups
        .iter()
        .flat_map(|urls| urls.iter())
        .filter_map(|url| url.parent())
        .collect();
    parents.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
    parents.dedup();
    parents
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> ResourceUrl {
        s.parse().expect("test url")
    }

    #[test]
    fn suppression_covers_nested_parents() {
        let files = vec![url("mem://h/a/b/f.txt")];
        let dirs = vec![url("mem://h/a"), url("mem://h/a/b")];
        let parents = suppressed_parents(&[files.as_slice(), dirs.as_slice()]);
        assert!(parents.contains(&url("mem://h/a/b")));
        assert!(parents.contains(&url("mem://h/a")));
        let dupes = parents.iter().filter(|p| **p == url("mem://h/a/b")).count();
        assert_eq!(dupes, 1);
    }
}
