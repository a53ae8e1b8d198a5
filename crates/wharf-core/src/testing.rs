//! In-memory backend worker and dispatcher for tests.
//!
//! Gives orchestrator tests a deterministic backend: a shared in-memory tree,
//! a command log for ordering assertions, one-shot failure injection, and
//! scripted redirects.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{
    worker_channel, Capabilities, CopyNameSource, Dispatch, EntryField, EntryRecord, ErrorKind,
    OpError, ResourceUrl, WorkerCommand, WorkerEndpoint, WorkerEvent, WorkerHandle,
    FILE_TYPE_DIR, FILE_TYPE_FILE, FILE_TYPE_SYMLINK,
};

/// One node in the in-memory tree.
#[derive(Debug, Clone)]
enum Node {
    File {
        data: Vec<u8>,
        permissions: i64,
        mtime: i64,
    },
    Dir {
        permissions: i64,
        mtime: i64,
    },
    Symlink {
        target: String,
    },
}

#[derive(Debug, Default)]
struct BackendState {
    nodes: BTreeMap<String, Node>,
    log: Vec<String>,
    /// One-shot injected failures, keyed by `"verb url"`.
    fail_once: HashMap<String, Vec<ErrorKind>>,
    /// Verbs that always fail with UnsupportedAction.
    unsupported: Vec<String>,
    /// Scripted redirects, applied on stat/list/get/put submission.
    redirects: HashMap<String, ResourceUrl>,
    /// Download chunk size.
    chunk_size: usize,
    /// Listing batch size (entries per `Entries` event).
    entries_per_batch: usize,
}

fn node_key(url: &ResourceUrl) -> String {
    format!(
        "{}://{}{}",
        url.scheme(),
        url.host().unwrap_or(""),
        url.path()
    )
}

/// Shared in-memory backend; clone handles cheaply.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        {
            let mut state = backend.lock();
            state.chunk_size = 4096;
            state.entries_per_batch = usize::MAX;
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().expect("memory backend lock poisoned")
    }

    pub fn add_dir(&self, url: &ResourceUrl) {
        self.lock().nodes.insert(
            node_key(url),
            Node::Dir {
                permissions: 0o755,
                mtime: 0,
            },
        );
    }

    pub fn add_file(&self, url: &ResourceUrl, data: impl Into<Vec<u8>>) {
        self.lock().nodes.insert(
            node_key(url),
            Node::File {
                data: data.into(),
                permissions: 0o644,
                mtime: 0,
            },
        );
    }

    pub fn add_symlink(&self, url: &ResourceUrl, target: impl Into<String>) {
        self.lock().nodes.insert(
            node_key(url),
            Node::Symlink {
                target: target.into(),
            },
        );
    }

    pub fn contains(&self, url: &ResourceUrl) -> bool {
        self.lock().nodes.contains_key(&node_key(url))
    }

    pub fn file_data(&self, url: &ResourceUrl) -> Option<Vec<u8>> {
        match self.lock().nodes.get(&node_key(url)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// All node keys, sorted. Handy for whole-tree assertions.
    pub fn paths(&self) -> Vec<String> {
        self.lock().nodes.keys().cloned().collect()
    }

    /// The command log so far.
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Fail the next `verb` command on `url` with `kind`.
    pub fn fail_once(&self, verb: &str, url: &ResourceUrl, kind: ErrorKind) {
        self.lock()
            .fail_once
            .entry(format!("{verb} {url}"))
            .or_default()
            .push(kind);
    }

    /// Make every `verb` command report UnsupportedAction.
    pub fn set_unsupported(&self, verb: &str) {
        self.lock().unsupported.push(verb.to_string());
    }

    pub fn clear_unsupported(&self, verb: &str) {
        self.lock().unsupported.retain(|v| v != verb);
    }

    /// Redirect stat/list/get/put submissions for `from` to `to`.
    pub fn redirect(&self, from: &ResourceUrl, to: &ResourceUrl) {
        self.lock().redirects.insert(from.to_string(), to.clone());
    }

    pub fn set_chunk_size(&self, size: usize) {
        self.lock().chunk_size = size;
    }

    pub fn set_entries_per_batch(&self, n: usize) {
        self.lock().entries_per_batch = n.max(1);
    }

    fn push_log(&self, line: String) {
        self.lock().log.push(line);
    }

    fn take_failure(&self, verb: &str, url: &ResourceUrl) -> Option<OpError> {
        let mut state = self.lock();
        if state.unsupported.iter().any(|v| v == verb) {
            return Some(OpError::unsupported(url));
        }
        let key = format!("{verb} {url}");
        let kinds = state.fail_once.get_mut(&key)?;
        let kind = kinds.pop()?;
        if kinds.is_empty() {
            state.fail_once.remove(&key);
        }
        Some(OpError::new(kind, url.to_string()))
    }

    fn take_redirect(&self, url: &ResourceUrl) -> Option<ResourceUrl> {
        self.lock().redirects.get(&url.to_string()).cloned()
    }

    fn record_for(&self, url: &ResourceUrl, name: &str) -> Option<EntryRecord> {
        let state = self.lock();
        let node = state.nodes.get(&node_key(url))?;
        let mut rec = EntryRecord::new();
        rec.set_text(EntryField::Name, name);
        match node {
            Node::File {
                data,
                permissions,
                mtime,
            } => {
                rec.set_number(EntryField::FileType, FILE_TYPE_FILE);
                rec.set_number(EntryField::Size, data.len() as i64);
                rec.set_number(EntryField::Permissions, *permissions);
                rec.set_number(EntryField::ModificationTime, *mtime);
            }
            Node::Dir { permissions, mtime } => {
                rec.set_number(EntryField::FileType, FILE_TYPE_DIR);
                rec.set_number(EntryField::Permissions, *permissions);
                rec.set_number(EntryField::ModificationTime, *mtime);
            }
            Node::Symlink { target } => {
                rec.set_number(EntryField::FileType, FILE_TYPE_SYMLINK);
                rec.set_text(EntryField::LinkTarget, target.clone());
            }
        }
        Some(rec)
    }

    /// Child names directly under `url`, sorted.
    fn child_names(&self, url: &ResourceUrl) -> Vec<String> {
        let prefix = {
            let key = node_key(url);
            if key.ends_with('/') {
                key
            } else {
                format!("{key}/")
            }
        };
        let state = self.lock();
        state
            .nodes
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn is_dir(&self, url: &ResourceUrl) -> bool {
        matches!(
            self.lock().nodes.get(&node_key(url)),
            Some(Node::Dir { .. })
        )
    }

    fn remove_node(&self, url: &ResourceUrl) -> bool {
        self.lock().nodes.remove(&node_key(url)).is_some()
    }

    fn has_children(&self, url: &ResourceUrl) -> bool {
        !self.child_names(url).is_empty()
    }

    fn move_subtree(&self, src: &ResourceUrl, dst: &ResourceUrl) {
        let src_key = node_key(src);
        let dst_key = node_key(dst);
        let mut state = self.lock();
        let keys: Vec<String> = state
            .nodes
            .keys()
            .filter(|key| *key == &src_key || key.starts_with(&format!("{src_key}/")))
            .cloned()
            .collect();
        for key in keys {
            if let Some(node) = state.nodes.remove(&key) {
                let new_key = format!("{dst_key}{}", &key[src_key.len()..]);
                state.nodes.insert(new_key, node);
            }
        }
    }

    fn copy_subtree(&self, src: &ResourceUrl, dst: &ResourceUrl) {
        let src_key = node_key(src);
        let dst_key = node_key(dst);
        let mut state = self.lock();
        let copied: Vec<(String, Node)> = state
            .nodes
            .iter()
            .filter(|(key, _)| *key == &src_key || key.starts_with(&format!("{src_key}/")))
            .map(|(key, node)| {
                (
                    format!("{dst_key}{}", &key[src_key.len()..]),
                    node.clone(),
                )
            })
            .collect();
        for (key, node) in copied {
            state.nodes.insert(key, node);
        }
    }
}

/// Dispatcher serving [`MemoryBackend`] workers, with a hold pool.
#[derive(Debug)]
pub struct MemoryDispatch {
    backend: MemoryBackend,
    held: Mutex<HashMap<String, Vec<WorkerHandle>>>,
}

impl MemoryDispatch {
    pub fn new(backend: MemoryBackend) -> Self {
        Self {
            backend,
            held: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Dispatch for MemoryDispatch {
    async fn assign(&self, url: &ResourceUrl) -> Result<WorkerHandle, OpError> {
        if let Some(held) = self.take_from_hold(url).await {
            return Ok(held);
        }
        let (handle, endpoint) = worker_channel();
        let backend = self.backend.clone();
        tokio::spawn(serve_worker(backend, endpoint));
        Ok(handle)
    }

    async fn put_on_hold(&self, worker: WorkerHandle, url: ResourceUrl) {
        self.held
            .lock()
            .expect("hold pool lock poisoned")
            .entry(url.to_string())
            .or_default()
            .push(worker);
    }

    async fn take_from_hold(&self, url: &ResourceUrl) -> Option<WorkerHandle> {
        self.held
            .lock()
            .expect("hold pool lock poisoned")
            .get_mut(&url.to_string())?
            .pop()
    }
}

/// Worker task: service commands until the operation drops its handle.
async fn serve_worker(backend: MemoryBackend, mut endpoint: WorkerEndpoint) {
    while let Some(cmd) = endpoint.next_command().await {
        let keep_going = match cmd {
            WorkerCommand::Stat { url } => serve_stat(&backend, &endpoint, url).await,
            WorkerCommand::ListDir { url } => serve_list(&backend, &endpoint, url).await,
            WorkerCommand::Mkdir { url, permissions } => {
                serve_mkdir(&backend, &endpoint, url, permissions).await
            }
            WorkerCommand::Rename { src, dst, overwrite } => {
                serve_rename(&backend, &endpoint, src, dst, overwrite).await
            }
            WorkerCommand::Chmod { url, permissions } => {
                backend.push_log(format!("chmod {url} {permissions:o}"));
                let ok = {
                    let mut state = backend.lock();
                    match state.nodes.get_mut(&node_key(&url)) {
                        Some(Node::File { permissions: p, .. } | Node::Dir { permissions: p, .. }) => {
                            *p = permissions;
                            true
                        }
                        _ => false,
                    }
                };
                finish_or_not_found(&endpoint, ok, &url).await
            }
            WorkerCommand::SetModificationTime { url, mtime } => {
                backend.push_log(format!("mtime {url} {mtime}"));
                let ok = {
                    let mut state = backend.lock();
                    match state.nodes.get_mut(&node_key(&url)) {
                        Some(Node::File { mtime: m, .. } | Node::Dir { mtime: m, .. }) => {
                            *m = mtime;
                            true
                        }
                        _ => false,
                    }
                };
                finish_or_not_found(&endpoint, ok, &url).await
            }
            WorkerCommand::Remove { url, is_file } => {
                serve_remove(&backend, &endpoint, url, is_file).await
            }
            WorkerCommand::Symlink {
                target,
                dst,
                overwrite,
            } => serve_symlink(&backend, &endpoint, target, dst, overwrite).await,
            WorkerCommand::Get { url, offset } => {
                serve_get(&backend, &endpoint, url, offset).await
            }
            WorkerCommand::Put {
                url,
                permissions,
                overwrite,
                resume,
            } => serve_put(&backend, &mut endpoint, url, permissions, overwrite, resume).await,
            WorkerCommand::CopyNative {
                src,
                dst,
                permissions: _,
                overwrite,
            } => serve_copy(&backend, &endpoint, src, dst, overwrite).await,
            WorkerCommand::Data(_) | WorkerCommand::ResumeAnswer(_) => {
                // Only meaningful inside a put exchange.
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

async fn finish_or_not_found(endpoint: &WorkerEndpoint, ok: bool, url: &ResourceUrl) -> bool {
    if ok {
        finish(endpoint).await
    } else {
        fail(endpoint, OpError::not_found(url)).await
    }
}

async fn serve_stat(backend: &MemoryBackend, endpoint: &WorkerEndpoint, url: ResourceUrl) -> bool {
    backend.push_log(format!("stat {url}"));
    if let Some(err) = backend.take_failure("stat", &url) {
        return fail(endpoint, err).await;
    }
    if let Some(target) = backend.take_redirect(&url) {
        return endpoint.emit(WorkerEvent::Redirect(target)).await;
    }
    let name = url.file_name().unwrap_or(".").to_string();
    match backend.record_for(&url, &name) {
        Some(rec) => {
            if !endpoint.emit(WorkerEvent::Entries(vec![rec])).await {
                return false;
            }
            finish(endpoint).await
        }
        None => fail(endpoint, OpError::not_found(&url)).await,
    }
}

async fn serve_list(backend: &MemoryBackend, endpoint: &WorkerEndpoint, url: ResourceUrl) -> bool {
    backend.push_log(format!("list {url}"));
    if let Some(err) = backend.take_failure("list", &url) {
        return fail(endpoint, err).await;
    }
    if let Some(target) = backend.take_redirect(&url) {
        return endpoint.emit(WorkerEvent::Redirect(target)).await;
    }
    if !backend.is_dir(&url) {
        return fail(endpoint, OpError::not_found(&url)).await;
    }
    let mut entries = vec![backend
        .record_for(&url, ".")
        .unwrap_or_else(|| EntryRecord::directory("."))];
    for name in backend.child_names(&url) {
        if let Some(rec) = backend.record_for(&url.join(&name), &name) {
            entries.push(rec);
        }
    }
    let batch = backend.lock().entries_per_batch;
    for chunk in entries.chunks(batch.max(1)) {
        if !endpoint.emit(WorkerEvent::Entries(chunk.to_vec())).await {
            return false;
        }
    }
    finish(endpoint).await
}

async fn serve_mkdir(
    backend: &MemoryBackend,
    endpoint: &WorkerEndpoint,
    url: ResourceUrl,
    permissions: i64,
) -> bool {
    backend.push_log(format!("mkdir {url}"));
    if let Some(err) = backend.take_failure("mkdir", &url) {
        return fail(endpoint, err).await;
    }
    if backend.contains(&url) {
        let kind = if backend.is_dir(&url) {
            ErrorKind::DirAlreadyExists
        } else {
            ErrorKind::FileAlreadyExists
        };
        return fail(endpoint, OpError::new(kind, url.to_string())).await;
    }
    if let Some(parent) = url.parent() {
        if parent.path() != "/" && !backend.is_dir(&parent) {
            return fail(endpoint, OpError::not_found(&parent)).await;
        }
    }
    backend.lock().nodes.insert(
        node_key(&url),
        Node::Dir {
            permissions: if permissions < 0 { 0o755 } else { permissions },
            mtime: 0,
        },
    );
    finish(endpoint).await
}

async fn serve_rename(
    backend: &MemoryBackend,
    endpoint: &WorkerEndpoint,
    src: ResourceUrl,
    dst: ResourceUrl,
    overwrite: bool,
) -> bool {
    backend.push_log(format!("rename {src} -> {dst}"));
    if let Some(err) = backend.take_failure("rename", &src) {
        return fail(endpoint, err).await;
    }
    if !src.same_backend(&dst) && !src.is_local() && !dst.is_local() {
        return fail(endpoint, OpError::unsupported(&src)).await;
    }
    if !backend.contains(&src) {
        return fail(endpoint, OpError::not_found(&src)).await;
    }
    if backend.contains(&dst) && !overwrite {
        let kind = if backend.is_dir(&dst) {
            ErrorKind::DirAlreadyExists
        } else {
            ErrorKind::FileAlreadyExists
        };
        return fail(endpoint, OpError::new(kind, dst.to_string())).await;
    }
    if backend.contains(&dst) {
        backend.remove_node(&dst);
    }
    backend.move_subtree(&src, &dst);
    finish(endpoint).await
}

async fn serve_remove(
    backend: &MemoryBackend,
    endpoint: &WorkerEndpoint,
    url: ResourceUrl,
    is_file: bool,
) -> bool {
    let what = if is_file { "file" } else { "dir" };
    backend.push_log(format!("remove {what} {url}"));
    if let Some(err) = backend.take_failure("remove", &url) {
        return fail(endpoint, err).await;
    }
    if !backend.contains(&url) {
        return fail(endpoint, OpError::not_found(&url)).await;
    }
    if !is_file && backend.has_children(&url) {
        // Plain rmdir semantics; recursive deletion is the orchestrator's
        // business unless the capability registry says otherwise, in which
        // case tests pre-clear children or use remove_subtree directly.
        return fail(
            endpoint,
            OpError::new(ErrorKind::AccessDenied, format!("{url}: directory not empty")),
        )
        .await;
    }
    backend.remove_node(&url);
    finish(endpoint).await
}

async fn serve_symlink(
    backend: &MemoryBackend,
    endpoint: &WorkerEndpoint,
    target: String,
    dst: ResourceUrl,
    overwrite: bool,
) -> bool {
    backend.push_log(format!("symlink {target} -> {dst}"));
    if let Some(err) = backend.take_failure("symlink", &dst) {
        return fail(endpoint, err).await;
    }
    if backend.contains(&dst) && !overwrite {
        return fail(
            endpoint,
            OpError::new(ErrorKind::FileAlreadyExists, dst.to_string()),
        )
        .await;
    }
    backend.add_symlink(&dst, target);
    finish(endpoint).await
}

async fn serve_get(
    backend: &MemoryBackend,
    endpoint: &WorkerEndpoint,
    url: ResourceUrl,
    offset: u64,
) -> bool {
    backend.push_log(format!("get {url} @{offset}"));
    if let Some(err) = backend.take_failure("get", &url) {
        return fail(endpoint, err).await;
    }
    if let Some(target) = backend.take_redirect(&url) {
        return endpoint.emit(WorkerEvent::Redirect(target)).await;
    }
    let Some(data) = backend.file_data(&url) else {
        return fail(endpoint, OpError::not_found(&url)).await;
    };
    let meta = HashMap::from([("total-size".to_string(), data.len().to_string())]);
    if !endpoint.emit(WorkerEvent::MetaData(meta)).await {
        return false;
    }
    let chunk_size = backend.lock().chunk_size;
    let body = &data[(offset as usize).min(data.len())..];
    for chunk in body.chunks(chunk_size) {
        if !endpoint.emit(WorkerEvent::Data(chunk.to_vec())).await {
            return false;
        }
    }
    if !endpoint.emit(WorkerEvent::Data(Vec::new())).await {
        return false;
    }
    finish(endpoint).await
}

async fn serve_put(
    backend: &MemoryBackend,
    endpoint: &mut WorkerEndpoint,
    url: ResourceUrl,
    permissions: i64,
    overwrite: bool,
    resume: bool,
) -> bool {
    backend.push_log(format!("put {url}"));
    if let Some(err) = backend.take_failure("put", &url) {
        return fail(endpoint, err).await;
    }
    if let Some(target) = backend.take_redirect(&url) {
        return endpoint.emit(WorkerEvent::Redirect(target)).await;
    }
    if backend.is_dir(&url) {
        return fail(
            endpoint,
            OpError::new(ErrorKind::DirAlreadyExists, url.to_string()),
        )
        .await;
    }
    let existing = backend.file_data(&url).unwrap_or_default();
    let offset = if overwrite { 0 } else { existing.len() as u64 };
    backend.push_log(format!("canresume {offset}"));
    if !endpoint.emit(WorkerEvent::CanResume(offset)).await {
        return false;
    }

    let mut buffer: Vec<u8> = Vec::new();
    let mut answered = false;
    loop {
        if !answered && !endpoint.emit(WorkerEvent::DataRequested).await {
            return false;
        }
        match endpoint.next_command().await {
            Some(WorkerCommand::ResumeAnswer(keep)) => {
                backend.push_log(format!("resume-answer {keep}"));
                if keep && (resume || !overwrite) {
                    buffer = existing.clone();
                }
                answered = true;
                continue;
            }
            Some(WorkerCommand::Data(chunk)) => {
                backend.push_log(format!("data {}", chunk.len()));
                if chunk.is_empty() {
                    break;
                }
                buffer.extend_from_slice(&chunk);
                if !endpoint.emit(WorkerEvent::DataRequested).await {
                    return false;
                }
                answered = true;
                continue;
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

    backend.lock().nodes.insert(
        node_key(&url),
        Node::File {
            data: buffer,
            permissions: if permissions < 0 { 0o644 } else { permissions },
            mtime: 0,
        },
    );
    finish(endpoint).await
}

async fn serve_copy(
    backend: &MemoryBackend,
    endpoint: &WorkerEndpoint,
    src: ResourceUrl,
    dst: ResourceUrl,
    overwrite: bool,
) -> bool {
    backend.push_log(format!("copy {src} -> {dst}"));
    if let Some(err) = backend.take_failure("copy", &src) {
        return fail(endpoint, err).await;
    }
    if !backend.contains(&src) {
        return fail(endpoint, OpError::not_found(&src)).await;
    }
    if backend.contains(&dst) && !overwrite {
        let kind = if backend.is_dir(&dst) {
            ErrorKind::DirAlreadyExists
        } else {
            ErrorKind::FileAlreadyExists
        };
        return fail(endpoint, OpError::new(kind, dst.to_string())).await;
    }
    backend.copy_subtree(&src, &dst);
    finish(endpoint).await
}

/// Configurable capability answers for tests.
#[derive(Debug, Clone)]
pub struct MemoryCapabilities {
    pub rename_in_place: bool,
    pub copy_in_place: bool,
    pub rename_with_local: bool,
    pub copy_with_local: bool,
    pub deleting: bool,
    pub delete_recursive: bool,
    pub listing: bool,
    pub auto_resume: bool,
    pub name_source: CopyNameSource,
}

impl Default for MemoryCapabilities {
    fn default() -> Self {
        Self {
            rename_in_place: true,
            copy_in_place: true,
            rename_with_local: false,
            copy_with_local: false,
            deleting: true,
            delete_recursive: false,
            listing: true,
            auto_resume: false,
            name_source: CopyNameSource::FromUrl,
        }
    }
}

impl Capabilities for MemoryCapabilities {
    fn can_rename_in_place(&self, _url: &ResourceUrl) -> bool {
        self.rename_in_place
    }

    fn can_copy_in_place(&self, _url: &ResourceUrl) -> bool {
        self.copy_in_place
    }

    fn can_rename_from_file(&self, _url: &ResourceUrl) -> bool {
        self.rename_with_local
    }

    fn can_rename_to_file(&self, _url: &ResourceUrl) -> bool {
        self.rename_with_local
    }

    fn can_copy_from_file(&self, _url: &ResourceUrl) -> bool {
        self.copy_with_local
    }

    fn can_copy_to_file(&self, _url: &ResourceUrl) -> bool {
        self.copy_with_local
    }

    fn supports_deleting(&self, _url: &ResourceUrl) -> bool {
        self.deleting
    }

    fn can_delete_recursive(&self, _url: &ResourceUrl) -> bool {
        self.delete_recursive
    }

    fn supports_listing(&self, _url: &ResourceUrl) -> bool {
        self.listing
    }

    fn file_name_used_for_copying(&self, _url: &ResourceUrl) -> CopyNameSource {
        self.name_source
    }

    fn auto_resume(&self) -> bool {
        self.auto_resume
    }
}
