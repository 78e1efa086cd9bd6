//! The local metadata store: where the client persists the most recently trusted copy of each
//! top-level role's metadata between updates.
//!
//! `root.json` is always kept; `timestamp.json`/`snapshot.json`/`targets.json` are written after
//! each successful verification and deleted outright when the fast-forward recovery rule
//! requires re-fetching them from scratch. Writes are atomic (via a temp file renamed into
//! place) so a crash mid-write can never leave a torn file behind for the next run to trust.

use crate::error::{self, Result};
use chrono::{DateTime, Utc};
use log::debug;
use snafu::{ensure, ResultExt};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tempfile::{Builder as TempFileBuilder, TempDir};

const LATEST_KNOWN_TIME_FILE: &str = "latest_known_time.json";

/// Where the client persists trusted role metadata between updates.
///
/// Every method here is safe to call from multiple threads, but (per the engine's single-
/// threaded-per-`Client` concurrency model) is only ever exercised from one at a time in
/// practice.
pub trait LocalStore: std::fmt::Debug + Send + Sync {
    /// Returns the bytes of `file`, or `None` if it isn't present.
    fn get(&self, file: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically writes `bytes` as the contents of `file`, replacing whatever was there before.
    fn set(&self, file: &str, bytes: &[u8]) -> Result<()>;

    /// Removes `file` if present. Removing a file that doesn't exist is not an error.
    fn remove(&self, file: &str) -> Result<()>;

    /// Returns the latest system time this store has observed, guarding against a client clock
    /// that has stepped backward since the last call (see the root chain walk's monotonic-time
    /// requirement). The first call on a fresh store simply records the current time.
    fn system_time(&self) -> Result<DateTime<Utc>> {
        let recorded = self
            .get(LATEST_KNOWN_TIME_FILE)?
            .and_then(|bytes| serde_json::from_slice::<DateTime<Utc>>(&bytes).ok());

        let now = Utc::now();
        if let Some(latest_known_time) = recorded {
            ensure!(
                now >= latest_known_time,
                error::SystemTimeSteppedBackward {
                    sys_time: now,
                    latest_known_time,
                }
            );
        }
        let serialized = serde_json::to_vec(&now).context(error::DatastoreSerialize {
            what: LATEST_KNOWN_TIME_FILE.to_string(),
            path: PathBuf::from(LATEST_KNOWN_TIME_FILE),
        })?;
        self.set(LATEST_KNOWN_TIME_FILE, &serialized)?;
        Ok(now)
    }
}

/// A [`LocalStore`] backed by a directory on disk (or, if no path is given, a process-lifetime
/// temporary directory).
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    path_lock: Arc<RwLock<DatastorePath>>,
    time_lock: Arc<RwLock<()>>,
}

impl FilesystemStore {
    /// Creates a store rooted at `path`, or a fresh temporary directory if `path` is `None`.
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            path_lock: Arc::new(RwLock::new(match path {
                None => DatastorePath::TempDir(TempDir::new().context(error::DatastoreInit)?),
                Some(p) => DatastorePath::Path(p),
            })),
            time_lock: Arc::new(RwLock::new(())),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, DatastorePath> {
        self.path_lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DatastorePath> {
        self.path_lock.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocalStore for FilesystemStore {
    fn get(&self, file: &str) -> Result<Option<Vec<u8>>> {
        let path = self.read().path().join(file);
        match File::open(&path) {
            Ok(mut f) => {
                let mut buf = Vec::new();
                f.read_to_end(&mut buf)
                    .context(error::DatastoreOpen { path: &path })?;
                Ok(Some(buf))
            }
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(None),
                _ => Err(err).context(error::DatastoreOpen { path: &path }),
            },
        }
    }

    fn set(&self, file: &str, bytes: &[u8]) -> Result<()> {
        let dir = self.write().path().to_path_buf();
        let path = dir.join(file);
        let mut tmp = TempFileBuilder::new()
            .prefix(&format!(".{file}."))
            .tempfile_in(&dir)
            .context(error::DatastoreCreate { path: &path })?;
        tmp.write_all(bytes)
            .and_then(|()| tmp.flush())
            .context(error::DatastoreCreate { path: &path })?;
        // Renaming a file that's already fully written and flushed is atomic on the same
        // filesystem: readers always see either the old contents or the new, never a partial
        // write.
        tmp.persist(&path)
            .map_err(|e| e.error)
            .context(error::DatastoreCreate { path: &path })?;
        Ok(())
    }

    fn remove(&self, file: &str) -> Result<()> {
        let path = self.write().path().join(file);
        debug!("removing '{}'", path.display());
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(()),
                _ => Err(err).context(error::DatastoreRemove { path: &path }),
            },
        }
    }
}

/// Because `TempDir` is an RAII object, we need to hold on to it. This private enum allows us to
/// hold either a `TempDir` or a `PathBuf` depending on whether or not the caller wants to manage
/// the directory.
#[derive(Debug)]
enum DatastorePath {
    /// Path to a caller-managed directory.
    Path(PathBuf),
    /// A `TempDir` we created on the caller's behalf.
    TempDir(TempDir),
}

impl DatastorePath {
    fn path(&self) -> &Path {
        match self {
            DatastorePath::Path(p) => p,
            DatastorePath::TempDir(t) => t.path(),
        }
    }
}

/// A [`LocalStore`] that never touches disk, keeping everything in an in-memory map.
///
/// Useful for tests, and for callers who want to manage persistence themselves (or not persist
/// at all, re-running the root chain walk from an embedded trusted root on every process start).
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, file: &str) -> Result<Option<Vec<u8>>> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(files.get(file).cloned())
    }

    fn set(&self, file: &str, bytes: &[u8]) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.insert(file.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, file: &str) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.remove(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_store_round_trips_bytes() {
        let store = FilesystemStore::new(None).unwrap();
        assert!(store.get("root.json").unwrap().is_none());
        store.set("root.json", b"{}").unwrap();
        assert_eq!(store.get("root.json").unwrap().unwrap(), b"{}");
        store.remove("root.json").unwrap();
        assert!(store.get("root.json").unwrap().is_none());
    }

    #[test]
    fn removing_a_missing_file_is_not_an_error() {
        let store = FilesystemStore::new(None).unwrap();
        store.remove("does-not-exist.json").unwrap();
    }

    #[test]
    fn memory_store_round_trips_bytes() {
        let store = MemoryStore::new();
        store.set("timestamp.json", b"hello").unwrap();
        assert_eq!(store.get("timestamp.json").unwrap().unwrap(), b"hello");
        store.remove("timestamp.json").unwrap();
        assert!(store.get("timestamp.json").unwrap().is_none());
    }

    #[test]
    fn system_time_rejects_a_clock_moving_backward() {
        let store = MemoryStore::new();
        let future = Utc::now() + chrono::Duration::days(1);
        store
            .set(
                LATEST_KNOWN_TIME_FILE,
                &serde_json::to_vec(&future).unwrap(),
            )
            .unwrap();
        assert!(store.system_time().is_err());
    }
}
