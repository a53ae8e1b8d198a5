//! The copy/move/link orchestrator.
//!
//! A multi-source transfer walks a fixed sequence of phases: stat the
//! destination and every source, try a direct rename for moves, list
//! directory sources recursively, create destination directories, transfer
//! files and symlinks, delete moved source directories deepest-first, and
//! finally restore directory modification times. One child exchange is in
//! flight at any time.
//!
//! Conflict decisions are remembered two ways: global flags (`overwrite_all`,
//! `auto_skip`, `resume_all`) and per-subtree destination prefixes, so a
//! decision made for a directory silently covers everything beneath it.

use serde::Serialize;

use wharf_core::{
    ConflictKind, ConflictPrompt, CopyNameSource, EntryRecord, ErrorKind, OpError,
    OverwriteDecision, ResourceUrl, SkipDecision,
};

use crate::file_copy::{self, CopyFlags};
use crate::list;
use crate::operation::OpEnv;
use crate::progress::Reporter;
use crate::simple;

/// What the orchestrator does with each source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Move,
    /// Create symlinks pointing at the sources. Same-backend only.
    Link,
}

/// Phases of the orchestration, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPhase {
    Stating,
    Renaming,
    Listing,
    CreatingDirs,
    CopyingFiles,
    DeletingDirs,
    SettingDirAttributes,
}

/// One item scheduled for transfer.
#[derive(Debug, Clone)]
pub struct CopyInfo {
    pub source: ResourceUrl,
    pub dest: ResourceUrl,
    /// `-1` when unknown.
    pub permissions: i64,
    /// `-1` when unknown.
    pub mtime: i64,
    /// `-1` when unknown.
    pub size: i64,
    /// Set for symlinks; the transfer creates a link instead of copying.
    pub link_target: Option<String>,
}

/// Outcome of a finished transfer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CopySummary {
    pub files: u64,
    pub symlinks: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub skipped: u64,
    /// Sources handled by a direct rename instead of copy machinery.
    pub renamed: u64,
}

struct CopyMoveOp<'a> {
    env: &'a OpEnv,
    reporter: &'a mut Reporter,
    mode: TransferMode,
    phase: CopyPhase,
    dirs: Vec<CopyInfo>,
    files: Vec<CopyInfo>,
    /// Source directories to delete after a move, discovery order.
    dirs_to_remove: Vec<ResourceUrl>,
    /// Destination directories whose mtime is restored at the end.
    dir_times: Vec<(ResourceUrl, i64)>,
    /// Destination prefixes the user chose to skip.
    skip_prefixes: Vec<ResourceUrl>,
    /// Destination prefixes the user chose to overwrite into.
    overwrite_prefixes: Vec<ResourceUrl>,
    auto_skip: bool,
    overwrite_all: bool,
    resume_all: bool,
    skip_all_failures: bool,
    summary: CopySummary,
}

pub(crate) async fn run(
    env: &OpEnv,
    reporter: &mut Reporter,
    mode: TransferMode,
    sources: Vec<ResourceUrl>,
    dest: ResourceUrl,
) -> Result<CopySummary, OpError> {
    let mut op = CopyMoveOp {
        env,
        reporter,
        mode,
        phase: CopyPhase::Stating,
        dirs: Vec::new(),
        files: Vec::new(),
        dirs_to_remove: Vec::new(),
        dir_times: Vec::new(),
        skip_prefixes: Vec::new(),
        overwrite_prefixes: Vec::new(),
        auto_skip: false,
        overwrite_all: false,
        resume_all: false,
        skip_all_failures: false,
        summary: CopySummary::default(),
    };
    op.run(sources, dest).await
}

/// A stated source, ready for the per-source pipeline.
struct StatedSource {
    url: ResourceUrl,
    dest: ResourceUrl,
    entry: EntryRecord,
}

impl CopyMoveOp<'_> {
    async fn run(
        &mut self,
        sources: Vec<ResourceUrl>,
        dest: ResourceUrl,
    ) -> Result<CopySummary, OpError> {
        if sources.is_empty() {
            return Ok(std::mem::take(&mut self.summary));
        }
        let multiple = sources.len() > 1;
        let (stated, dest_is_dir) = self.stat_phase(sources, &dest, multiple).await?;

        for source in stated {
            if self.mode == TransferMode::Link {
                self.schedule_link(&source)?;
                continue;
            }
            if self.mode == TransferMode::Move && self.try_rename(&source).await? {
                self.summary.renamed += 1;
                continue;
            }
            self.schedule(&source).await?;
        }

        self.reporter.total_items =
            (self.dirs.len() + self.files.len()) as u64 + self.summary.renamed;
        self.reporter.processed_items = self.summary.renamed;
        self.reporter.total_bytes = self
            .files
            .iter()
            .filter(|f| f.size > 0)
            .map(|f| f.size as u64)
            .sum();
        self.reporter.emit();

        self.create_dirs_phase().await?;
        self.copy_files_phase().await?;
        self.delete_dirs_phase().await;
        self.set_dir_attributes_phase().await;
        self.send_notices(Self::dest_dir_of(&dest, dest_is_dir));
        Ok(std::mem::take(&mut self.summary))
    }

    fn dest_dir_of(url: &ResourceUrl, dest_is_dir: bool) -> ResourceUrl {
        if dest_is_dir {
            url.clone()
        } else {
            url.parent().unwrap_or_else(|| url.clone())
        }
    }

    fn enter(&mut self, phase: CopyPhase) {
        tracing::debug!(?phase, "phase");
        self.phase = phase;
    }

    // --- stating --------------------------------------------------------

    async fn stat_phase(
        &mut self,
        sources: Vec<ResourceUrl>,
        dest: &ResourceUrl,
        multiple: bool,
    ) -> Result<(Vec<StatedSource>, bool), OpError> {
        self.enter(CopyPhase::Stating);
        let (dest_exists, dest_is_dir) = match simple::stat(self.env, dest).await {
            Ok(entry) => (true, entry.is_dir()),
            Err(err) if err.kind == ErrorKind::NotFound => (false, false),
            Err(err) => return Err(err),
        };
        if multiple && !dest_is_dir {
            let kind = if dest_exists {
                ErrorKind::FileAlreadyExists
            } else {
                ErrorKind::NotFound
            };
            return Err(OpError::new(kind, dest.to_string()));
        }

        let mut stated = Vec::with_capacity(sources.len());
        for url in sources {
            let entry = match simple::stat(self.env, &url).await {
                Ok(entry) => entry,
                Err(err) if !url.is_local() && err.kind != ErrorKind::UserCancelled => {
                    // Some backends cannot stat everything they can serve.
                    // Assume a plain file of unknown size and let the
                    // transfer itself fail if that was wrong.
                    tracing::warn!(%url, error = %err, "stat failed, assuming plain file");
                    EntryRecord::file(url.file_name().unwrap_or("").to_string(), -1)
                }
                Err(err) => return Err(err),
            };
            let dest = if dest_is_dir {
                let name = match self.env.caps.file_name_used_for_copying(&url) {
                    CopyNameSource::Name if !entry.name().is_empty() && !entry.is_dot_entry() => {
                        entry.name().to_string()
                    }
                    _ => url.file_name().unwrap_or_default().to_string(),
                };
                dest.join(&name)
            } else {
                dest.clone()
            };
            stated.push(StatedSource { url, dest, entry });
        }
        Ok((stated, dest_is_dir))
    }

    // --- link mode ------------------------------------------------------

    fn schedule_link(&mut self, source: &StatedSource) -> Result<(), OpError> {
        if !source.url.same_backend(&source.dest) {
            return Err(OpError::unsupported(&source.dest));
        }
        self.files.push(CopyInfo {
            source: source.url.clone(),
            dest: source.dest.clone(),
            permissions: -1,
            mtime: -1,
            size: -1,
            link_target: Some(source.url.path().to_string()),
        });
        Ok(())
    }

    // --- renaming -------------------------------------------------------

    /// Direct rename fast path for moves. Returns true when the source is
    /// fully handled; false falls through to the copy machinery.
    async fn try_rename(&mut self, source: &StatedSource) -> Result<bool, OpError> {
        self.enter(CopyPhase::Renaming);
        let direct = source.url.same_backend(&source.dest)
            && self.env.caps.can_rename_in_place(&source.url);
        // With one local side, the other backend may accept a rename that
        // reads or writes the local path directly.
        let assisted = (source.url.is_local() && self.env.caps.can_rename_from_file(&source.dest))
            || (source.dest.is_local() && self.env.caps.can_rename_to_file(&source.url));
        if !direct && !assisted {
            return Ok(false);
        }
        if source.url == source.dest {
            // Moving something onto itself is a no-op, not an error.
            return Ok(true);
        }
        match simple::rename(self.env, &source.url, &source.dest, false).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_unsupported() || err.is_conflict() => Ok(false),
            Err(err) => Err(err),
        }
    }

    // --- listing --------------------------------------------------------

    async fn schedule(&mut self, source: &StatedSource) -> Result<(), OpError> {
        if source.entry.is_link() {
            self.files.push(CopyInfo {
                source: source.url.clone(),
                dest: source.dest.clone(),
                permissions: source.entry.permissions().unwrap_or(-1),
                mtime: source.entry.mtime().unwrap_or(-1),
                size: -1,
                link_target: source.entry.link_target().map(str::to_owned),
            });
            return Ok(());
        }
        if !source.entry.is_dir() {
            self.files.push(CopyInfo {
                source: source.url.clone(),
                dest: source.dest.clone(),
                permissions: source.entry.permissions().unwrap_or(-1),
                mtime: source.entry.mtime().unwrap_or(-1),
                size: source.entry.size(),
                link_target: None,
            });
            return Ok(());
        }

        self.enter(CopyPhase::Listing);
        self.dirs.push(CopyInfo {
            source: source.url.clone(),
            dest: source.dest.clone(),
            permissions: source.entry.permissions().unwrap_or(-1),
            mtime: source.entry.mtime().unwrap_or(-1),
            size: -1,
            link_target: None,
        });
        let entries = list::collect_recursive(self.env, &source.url).await?;
        for entry in entries {
            let rel = entry.name().to_string();
            let info = CopyInfo {
                source: source.url.join(&rel),
                dest: source.dest.join(&rel),
                permissions: entry.permissions().unwrap_or(-1),
                mtime: entry.mtime().unwrap_or(-1),
                size: if entry.is_dir() { -1 } else { entry.size() },
                link_target: entry.link_target().map(str::to_owned),
            };
            if entry.is_dir() && !entry.is_link() {
                self.dirs.push(info);
            } else {
                self.files.push(info);
            }
        }
        Ok(())
    }

    // --- decision memory ------------------------------------------------

    fn skipped(&self, dest: &ResourceUrl) -> bool {
        self.skip_prefixes
            .iter()
            .any(|p| p == dest || p.is_ancestor_of(dest))
    }

    fn overwrite_granted(&self, dest: &ResourceUrl) -> bool {
        self.overwrite_all
            || self
                .overwrite_prefixes
                .iter()
                .any(|p| p == dest || p.is_ancestor_of(dest))
    }

    /// Rewrite a destination subtree after the user picked a new name.
    fn rename_dest_subtree(&mut self, old: &ResourceUrl, new: &ResourceUrl) {
        for info in self.dirs.iter_mut().chain(self.files.iter_mut()) {
            if info.dest == *old {
                info.dest = new.clone();
            } else if let Some(rel) = info.dest.relative_to(old) {
                info.dest = new.join(rel);
            }
        }
        for (dir, _) in self.dir_times.iter_mut() {
            if dir == old {
                *dir = new.clone();
            } else if let Some(rel) = dir.relative_to(old) {
                *dir = new.join(rel);
            }
        }
    }

    fn drop_skipped_file(&mut self, info: &CopyInfo) {
        tracing::debug!(phase = ?self.phase, dest = %info.dest, "item skipped");
        self.summary.skipped += 1;
        if info.size > 0 {
            self.reporter.total_bytes = self.reporter.total_bytes.saturating_sub(info.size as u64);
        }
        self.reporter.total_items = self.reporter.total_items.saturating_sub(1);
        self.reporter.emit();
    }

    async fn prompt(&mut self, prompt: ConflictPrompt) -> OverwriteDecision {
        self.reporter.mute();
        let decision = self.env.interact.decide_overwrite(prompt).await;
        self.reporter.unmute();
        decision
    }

    // --- creating directories -------------------------------------------

    async fn create_dirs_phase(&mut self) -> Result<(), OpError> {
        self.enter(CopyPhase::CreatingDirs);
        // Index loop: a Rename decision rewrites destinations of items not
        // yet reached, so each item is re-read at its turn.
        let mut idx = 0;
        while idx < self.dirs.len() {
            let info = self.dirs[idx].clone();
            idx += 1;
            if self.skipped(&info.dest) {
                continue;
            }
            let mut dest = info.dest.clone();
            loop {
                if self.overwrite_granted(&dest) || dest == info.source {
                    // An existing directory is an acceptable destination once
                    // overwriting was granted; identical source needs no mkdir.
                    break;
                }
                match simple::mkdir(self.env, &dest, info.permissions).await {
                    Ok(()) => break,
                    Err(err) if err.is_conflict() => {
                        if self.auto_skip {
                            self.skip_prefixes.push(dest.clone());
                            self.summary.skipped += 1;
                            break;
                        }
                        let kind = if dest == info.source {
                            ConflictKind::SameObject
                        } else {
                            ConflictKind::DirExists
                        };
                        let decision = self
                            .prompt(ConflictPrompt::new(
                                kind,
                                info.source.clone(),
                                dest.clone(),
                            ))
                            .await;
                        match decision {
                            OverwriteDecision::Overwrite
                            | OverwriteDecision::Resume
                            | OverwriteDecision::ResumeAll => {
                                self.overwrite_prefixes.push(dest.clone());
                            }
                            OverwriteDecision::OverwriteAll => self.overwrite_all = true,
                            OverwriteDecision::OverwriteItself => {
                                self.skip_prefixes.push(dest.clone());
                            }
                            OverwriteDecision::Skip => {
                                self.skip_prefixes.push(dest.clone());
                                self.summary.skipped += 1;
                            }
                            OverwriteDecision::AutoSkip => {
                                self.auto_skip = true;
                                self.skip_prefixes.push(dest.clone());
                                self.summary.skipped += 1;
                            }
                            OverwriteDecision::Rename(new) => {
                                self.rename_dest_subtree(&dest, &new);
                                dest = new;
                                continue;
                            }
                            OverwriteDecision::Cancel => return Err(OpError::cancelled()),
                        }
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            if !self.skipped(&dest) {
                self.summary.dirs += 1;
                if info.mtime >= 0 {
                    self.dir_times.push((dest.clone(), info.mtime));
                }
                if self.mode == TransferMode::Move && dest != info.source {
                    self.dirs_to_remove.push(info.source.clone());
                }
                self.reporter.processed_items += 1;
                self.reporter.current = Some(dest);
                self.reporter.emit();
            }
        }
        Ok(())
    }

    // --- copying files --------------------------------------------------

    async fn copy_files_phase(&mut self) -> Result<(), OpError> {
        self.enter(CopyPhase::CopyingFiles);
        let mut idx = 0;
        while idx < self.files.len() {
            let info = self.files[idx].clone();
            idx += 1;
            if self.skipped(&info.dest) {
                self.drop_skipped_file(&info);
                continue;
            }
            let multiple = idx < self.files.len();
            self.transfer_one(info, multiple).await?;
        }
        Ok(())
    }

    async fn transfer_one(&mut self, mut info: CopyInfo, multiple: bool) -> Result<(), OpError> {
        let mut flags = CopyFlags {
            overwrite: self.overwrite_granted(&info.dest),
            resume: self.resume_all,
            permissions: info.permissions,
            move_source: self.mode == TransferMode::Move,
        };
        loop {
            let result = match &info.link_target {
                Some(target) => {
                    let r = simple::symlink(self.env, target, &info.dest, flags.overwrite).await;
                    if r.is_ok() && flags.move_source {
                        simple::remove(self.env, &info.source, true).await?;
                    }
                    r
                }
                None => {
                    file_copy::file_copy(self.env, self.reporter, &info.source, &info.dest, &flags)
                        .await
                }
            };
            match result {
                Ok(()) => {
                    if info.link_target.is_some() {
                        self.summary.symlinks += 1;
                    } else {
                        self.summary.files += 1;
                        if info.size > 0 {
                            self.summary.bytes += info.size as u64;
                        }
                    }
                    self.reporter.processed_items += 1;
                    self.reporter.current = Some(info.dest.clone());
                    self.reporter.emit();
                    return Ok(());
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) if err.is_conflict() => {
                    if self.auto_skip {
                        self.drop_skipped_file(&info);
                        return Ok(());
                    }
                    match self.conflict_decision(&info, &err).await {
                        OverwriteDecision::Overwrite => flags.overwrite = true,
                        OverwriteDecision::OverwriteAll => {
                            self.overwrite_all = true;
                            flags.overwrite = true;
                        }
                        OverwriteDecision::Resume => flags.resume = true,
                        OverwriteDecision::ResumeAll => {
                            self.resume_all = true;
                            flags.resume = true;
                        }
                        OverwriteDecision::Rename(new) => {
                            self.rename_dest_subtree(&info.dest, &new);
                            info.dest = new;
                        }
                        OverwriteDecision::OverwriteItself => {
                            self.drop_skipped_file(&info);
                            return Ok(());
                        }
                        OverwriteDecision::Skip => {
                            self.drop_skipped_file(&info);
                            return Ok(());
                        }
                        OverwriteDecision::AutoSkip => {
                            self.auto_skip = true;
                            self.drop_skipped_file(&info);
                            return Ok(());
                        }
                        OverwriteDecision::Cancel => return Err(OpError::cancelled()),
                    }
                }
                Err(err) => {
                    if self.skip_all_failures {
                        self.drop_skipped_file(&info);
                        return Ok(());
                    }
                    self.reporter.mute();
                    let decision = self.env.interact.decide_skip(multiple, &err).await;
                    self.reporter.unmute();
                    match decision {
                        SkipDecision::Skip => {
                            self.drop_skipped_file(&info);
                            return Ok(());
                        }
                        SkipDecision::AutoSkip => {
                            self.skip_all_failures = true;
                            self.drop_skipped_file(&info);
                            return Ok(());
                        }
                        SkipDecision::Cancel => return Err(err),
                    }
                }
            }
        }
    }

    async fn conflict_decision(&mut self, info: &CopyInfo, err: &OpError) -> OverwriteDecision {
        let kind = if info.source == info.dest {
            ConflictKind::SameObject
        } else if err.kind == ErrorKind::DirAlreadyExists {
            ConflictKind::DirExists
        } else {
            ConflictKind::FileExists
        };
        let mut prompt = ConflictPrompt::new(kind, info.source.clone(), info.dest.clone());
        prompt.src_size = (info.size >= 0).then_some(info.size);
        prompt.src_mtime = (info.mtime >= 0).then_some(info.mtime);
        if let Ok(dst_entry) = simple::stat(self.env, &info.dest).await {
            prompt.dst_size = Some(dst_entry.size());
            prompt.dst_mtime = dst_entry.mtime();
            prompt.offer_resume = info.link_target.is_none()
                && dst_entry.size() > 0
                && info.size > dst_entry.size();
        }
        self.prompt(prompt).await
    }

    // --- trailing phases ------------------------------------------------

    async fn delete_dirs_phase(&mut self) {
        if self.mode != TransferMode::Move || self.dirs_to_remove.is_empty() {
            return;
        }
        self.enter(CopyPhase::DeletingDirs);
        // Children were discovered after their parents, so the reverse order
        // is deepest-first.
        let dirs: Vec<_> = self.dirs_to_remove.drain(..).rev().collect();
        for dir in dirs {
            if let Err(err) = simple::remove(self.env, &dir, false).await {
                // A skipped or failed file leaves the directory non-empty.
                tracing::warn!(url = %dir, error = %err, "source directory left behind");
            }
        }
    }

    async fn set_dir_attributes_phase(&mut self) {
        if self.dir_times.is_empty() {
            return;
        }
        self.enter(CopyPhase::SettingDirAttributes);
        let times = std::mem::take(&mut self.dir_times);
        for (dir, mtime) in times {
            if self.skipped(&dir) {
                continue;
            }
            if let Err(err) = simple::set_modification_time(self.env, &dir, mtime).await {
                tracing::debug!(url = %dir, error = %err, "could not restore mtime");
            }
        }
    }

    fn send_notices(&mut self, dest: ResourceUrl) {
        self.env.notifier.files_added(dest);
    }
}
