//! Mutual exclusion for manifest read-modify-write cycles.
//!
//! Two layers, always taken in this order:
//! 1. a per-path in-process mutex (threads of this process),
//! 2. an exclusive `results.json.lock` file (other processes, best-effort).

use chrono::Utc;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::warn;

use crate::ManifestError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

static PATH_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

/// The in-process mutex for `manifest_path`. Every store opened on the same
/// path shares one mutex.
pub(crate) fn process_lock(manifest_path: &Path) -> Arc<Mutex<()>> {
    let table = PATH_LOCKS.get_or_init(Default::default);
    let mut locks = table.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(manifest_path.to_path_buf()).or_default())
}

/// Held lock file; removed on drop.
#[derive(Debug)]
pub(crate) struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub(crate) fn acquire(
        path: &Path,
        timeout: Duration,
        stale_after: Duration,
    ) -> Result<Self, ManifestError> {
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let stamp = serde_json::json!({
                        "pid": std::process::id(),
                        "acquired_at": Utc::now().to_rfc3339(),
                    });
                    // Contents are diagnostic only; the file's existence is the lock.
                    let _ = writeln!(file, "{stamp}");
                    let _ = file.sync_all();
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if let Some(age) = lock_age(path) {
                        if age > stale_after {
                            warn!(
                                lock = %path.display(),
                                age_ms = age.as_millis() as u64,
                                "breaking stale manifest lock"
                            );
                            let _ = fs::remove_file(path);
                            continue;
                        }
                    }
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(ManifestError::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(source) => {
                    return Err(ManifestError::Io {
                        op: "create lock file",
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Age of an existing lock file, `None` if it vanished or has no mtime.
fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    SystemTime::now().duration_since(modified).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn same_path_shares_one_mutex() {
        let a = process_lock(Path::new("/tmp/x/results.json"));
        let b = process_lock(Path::new("/tmp/x/results.json"));
        let c = process_lock(Path::new("/tmp/y/results.json"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn lock_file_is_exclusive_and_released_on_drop() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("results.json.lock");

        let held = LockFile::acquire(&path, Duration::from_secs(1), Duration::from_secs(3600)).unwrap();
        assert!(path.exists());

        let second = LockFile::acquire(&path, Duration::from_millis(50), Duration::from_secs(3600));
        assert!(matches!(second, Err(ManifestError::LockTimeout { .. })));

        drop(held);
        assert!(!path.exists());
        LockFile::acquire(&path, Duration::from_millis(50), Duration::from_secs(3600)).unwrap();
    }

    #[test]
    fn lock_file_holds_json_stamp() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("results.json.lock");
        let _held = LockFile::acquire(&path, Duration::from_secs(1), Duration::from_secs(3600)).unwrap();

        let stamp: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(stamp["pid"], std::process::id());
        assert!(stamp["acquired_at"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[test]
    fn stale_lock_is_broken() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("results.json.lock");
        fs::write(&path, b"{\"pid\":1}").unwrap();
        thread::sleep(Duration::from_millis(20));

        let got = LockFile::acquire(&path, Duration::from_millis(50), Duration::from_millis(5));
        assert!(got.is_ok());
    }
}
