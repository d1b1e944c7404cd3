//! `results.json` ownership: read current state, and serialized atomic updates.
//!
//! # Update protocol
//! 1. take the per-path in-process mutex, then the `results.json.lock` file
//! 2. read the current document (empty default when absent)
//! 3. apply the caller's mutator
//! 4. write the full document to a temp file in the same directory, fsync it
//! 5. rename the temp file over `results.json`, then fsync the directory
//!
//! Readers therefore see either the previous complete document or the new
//! one. A document that fails to parse is reported as
//! [`ManifestError::Corrupt`] and never overwritten.

mod lock;

use chrono::Utc;
use conductor_schemas::Manifest;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use lock::{process_lock, LockFile};

/// File name of the manifest inside the request root.
pub const MANIFEST_FILE: &str = "results.json";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_STALE_LOCK_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ManifestError {
    /// Write, rename or read failure. Not retried.
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The existing document does not parse as a manifest.
    #[error("manifest {} is corrupt; refusing to overwrite it: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("timed out after {waited:?} waiting for manifest lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },
}

/// Called with the synced temp file path just before it is renamed into place.
#[cfg(any(test, feature = "testkit"))]
pub type CommitHook = Arc<dyn Fn(&Path) -> io::Result<()> + Send + Sync>;

/// Handle on one request's `results.json`.
///
/// Cheap to clone; clones (and independently opened stores on the same
/// path) serialize their updates against each other.
#[derive(Clone)]
pub struct ManifestStore {
    path: PathBuf,
    lock_path: PathBuf,
    request_id: String,
    process_lock: Arc<Mutex<()>>,
    lock_timeout: Duration,
    stale_lock_after: Duration,
    #[cfg(any(test, feature = "testkit"))]
    commit_hook: Option<CommitHook>,
}

impl fmt::Debug for ManifestStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestStore")
            .field("path", &self.path)
            .field("request_id", &self.request_id)
            .field("lock_timeout", &self.lock_timeout)
            .field("stale_lock_after", &self.stale_lock_after)
            .finish()
    }
}

impl ManifestStore {
    /// Store for `<request_root>/results.json`.
    pub fn for_request(request_root: impl AsRef<Path>, request_id: impl Into<String>) -> Self {
        Self::new(request_root.as_ref().join(MANIFEST_FILE), request_id)
    }

    /// Store for an explicit manifest path. `request_id` stamps a newly
    /// created document.
    pub fn new(path: impl Into<PathBuf>, request_id: impl Into<String>) -> Self {
        let path = normalize(path.into());
        let mut lock_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| MANIFEST_FILE.into());
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);

        Self {
            process_lock: process_lock(&path),
            path,
            lock_path,
            request_id: request_id.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_lock_after: DEFAULT_STALE_LOCK_AFTER,
            #[cfg(any(test, feature = "testkit"))]
            commit_hook: None,
        }
    }

    /// How long `update` waits for another process's lock file.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Lock files older than this are assumed abandoned and removed.
    pub fn with_stale_lock_after(mut self, age: Duration) -> Self {
        self.stale_lock_after = age;
        self
    }

    /// **Test-only**: run `hook` between temp-file sync and rename. An `Err`
    /// aborts the commit exactly like a failed rename would.
    #[cfg(any(test, feature = "testkit"))]
    pub fn with_commit_hook(mut self, hook: CommitHook) -> Self {
        self.commit_hook = Some(hook);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Current on-disk document, or an empty one if none exists yet.
    ///
    /// Takes no lock: the rename-based commit means this never observes a
    /// partial write.
    pub fn load(&self) -> Result<Manifest, ManifestError> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| ManifestError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Manifest::empty(&self.request_id)),
            Err(source) => Err(ManifestError::Io {
                op: "read manifest",
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Serialized read-modify-write. Returns the document as persisted.
    ///
    /// If the mutator panics nothing is written and both locks are released.
    pub fn update<F>(&self, mutator: F) -> Result<Manifest, ManifestError>
    where
        F: FnOnce(Manifest) -> Manifest,
    {
        self.try_update(|current| Ok(mutator(current)))
    }

    /// [`update`](Self::update) with a mutator that may refuse the change.
    /// An `Err` from the mutator is returned as-is and nothing is written.
    pub fn try_update<F, E>(&self, mutator: F) -> Result<Manifest, E>
    where
        F: FnOnce(Manifest) -> Result<Manifest, E>,
        E: From<ManifestError>,
    {
        let dir = self.dir();
        fs::create_dir_all(dir).map_err(|source| ManifestError::Io {
            op: "create manifest directory",
            path: dir.to_path_buf(),
            source,
        })?;

        let _in_process = self.process_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock_file = LockFile::acquire(&self.lock_path, self.lock_timeout, self.stale_lock_after)?;

        let current = self.load()?;
        let mut next = mutator(current)?;
        next.request.updated_at = Some(Utc::now());
        self.commit(&next)?;

        debug!(
            manifest = %self.path.display(),
            artifacts = next.len(),
            "manifest committed"
        );
        Ok(next)
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    fn commit(&self, doc: &Manifest) -> Result<(), ManifestError> {
        let dir = self.dir();
        let mut bytes = serde_json::to_vec_pretty(doc).map_err(ManifestError::Serialize)?;
        bytes.push(b'\n');

        let prefix = format!(
            ".{}.",
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| MANIFEST_FILE.to_string())
        );
        let io_err = |op: &'static str, path: &Path| {
            let path = path.to_path_buf();
            move |source| ManifestError::Io { op, path, source }
        };

        // Dropping `tmp` on any early return deletes the temp file.
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(io_err("create temp manifest", dir))?;
        tmp.write_all(&bytes)
            .map_err(io_err("write temp manifest", tmp.path()))?;
        tmp.flush().map_err(io_err("flush temp manifest", tmp.path()))?;
        tmp.as_file()
            .sync_all()
            .map_err(io_err("sync temp manifest", tmp.path()))?;

        #[cfg(any(test, feature = "testkit"))]
        if let Some(hook) = &self.commit_hook {
            hook(tmp.path()).map_err(io_err("commit", &self.path))?;
        }

        tmp.persist(&self.path).map_err(|err| ManifestError::Io {
            op: "rename temp manifest",
            path: self.path.clone(),
            source: err.error,
        })?;

        sync_dir(dir);
        Ok(())
    }
}

/// Best-effort directory fsync so the rename itself is durable.
fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}

/// Canonicalize the parent directory when it exists so `a/results.json` and
/// `/abs/a/results.json` share one in-process lock.
fn normalize(path: PathBuf) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path;
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    match parent.canonicalize() {
        Ok(abs) => abs.join(name),
        Err(_) => path,
    }
}
