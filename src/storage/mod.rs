//! Persistence layer.
//!
//! Local JSON files: the ledger, the alert cooldown map, and the heartbeat
//! timestamps. Every write goes to a temp file in the target directory,
//! is fsynced, and is then renamed over the target, so a crash mid-write
//! leaves either the old file or the new one, never a truncated mix.
//!
//! Read-modify-write sequences are serialised across processes with an
//! exclusive advisory lock on a sidecar `.lock` file.

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

/// Poll interval while waiting for a contended lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialise state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt state file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Timed out after {waited:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Load a JSON value from `path`.
/// Returns `None` if the file doesn't exist (fresh start).
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    if !path.exists() {
        debug!(path = %path.display(), "No saved state found");
        return Ok(None);
    }

    let json = fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
    let value = serde_json::from_str(&json).map_err(|e| StorageError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(Some(value))
}

/// Atomically replace `path` with the JSON encoding of `value`.
pub fn save_json_atomic<T: Serialize>(value: &T, path: &Path) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(value)?;
    let dir = parent_dir(path);
    fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| StorageError::io(&dir, e))?;
    tmp.write_all(&json).map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;

    // Make the rename itself durable.
    if let Ok(d) = File::open(&dir) {
        let _ = d.sync_all();
    }

    debug!(path = %path.display(), bytes = json.len(), "State saved");
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

// ---------------------------------------------------------------------------
// Exclusive lock
// ---------------------------------------------------------------------------

/// Held exclusive lock on a sidecar file. Released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Acquire the lock, polling until `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, StorageError> {
        let dir = parent_dir(path);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StorageError::io(path, e))?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if started.elapsed() >= timeout {
                        return Err(StorageError::LockTimeout {
                            path: path.to_path_buf(),
                            waited: started.elapsed(),
                        });
                    }
                    pause(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(StorageError::io(path, e)),
            }
        }
    }

}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Sleep between lock polls. On a multi-thread runtime the worker hands its
/// other tasks off first; elsewhere this is a plain thread sleep.
fn pause(interval: Duration) {
    match Handle::try_current() {
        Ok(h) if h.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| std::thread::sleep(interval))
        }
        _ => std::thread::sleep(interval),
    }
}

/// Sidecar lock path for a state file: `ledger.json` -> `ledger.json.lock`.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
