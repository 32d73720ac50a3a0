//! Time-bounded cache persisting payloads to disk
//!
//! Each key maps to one `<sha256(key)>.entry` file under the cache root. A
//! record is a single-line JSON header (original key and write timestamp)
//! followed by a newline and the raw payload bytes. Records are written to a
//! temporary file in the same directory and renamed into place, so a reader
//! sees either the previous record or the new one in full.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::io::{self, Write};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::Builder;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use crate::error::{Error, Result};

/// Default time-to-live for cache entries (one day)
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// File extension of cache records
const ENTRY_EXTENSION: &str = "entry";

/// File name prefix and suffix of records still being written
const PARTIAL_PREFIX: &str = ".write-";
const PARTIAL_SUFFIX: &str = ".partial";

/// Number of lock stripes shared by all keys of a cache
const LOCK_STRIPES: usize = 64;

/// Header line stored in front of every payload
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    /// The key the entry was written under
    key: String,
    /// When the entry was written
    stored_at: DateTime<Utc>,
}

/// Striped locks serializing writes and evictions of the same record
///
/// A record always maps to the same stripe, so the table stays the same size
/// however many keys the cache sees.
#[derive(Debug)]
struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }
}

impl KeyLocks {
    fn for_path(&self, path: &Path) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        &self.stripes[hasher.finish() as usize % self.stripes.len()]
    }
}

/// Key/value cache on local disk with a fixed time-to-live
///
/// Entries older than the TTL are never returned: a read that finds one
/// removes it and reports a miss. Cloning is cheap and clones share the same
/// per-key locks.
#[derive(Debug, Clone)]
pub struct TimedCache {
    /// Directory where cache records are stored
    root: PathBuf,
    ttl: Duration,
    max_age: chrono::Duration,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyLocks>,
}

impl TimedCache {
    /// Creates a cache storing records under `root` that expire after `ttl`
    ///
    /// The directory is created on first write. Fails with a configuration
    /// error if `ttl` is zero or too large to represent as a timestamp offset.
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        if ttl.is_zero() {
            return Err(Error::Configuration(
                "cache ttl must be greater than zero".to_string(),
            ));
        }
        let max_age = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Configuration(format!("cache ttl {ttl:?} is out of range: {e}")))?;

        Ok(Self {
            root: root.into(),
            ttl,
            max_age,
            clock: Arc::new(SystemClock),
            locks: Arc::default(),
        })
    }

    /// Replaces the time source used for stamping and expiry
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the path of the record for the given key
    pub(crate) fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root
            .join(format!("{}.{}", hex::encode(digest), ENTRY_EXTENSION))
    }

    fn is_fresh(&self, stored_at: DateTime<Utc>) -> bool {
        self.clock.now() - stored_at < self.max_age
    }

    /// Reads the payload stored under `key`
    ///
    /// # Returns
    /// * `Ok(Some(payload))` if a fresh entry exists
    /// * `Ok(None)` if there is no entry, or the entry has expired (it is removed)
    /// * `Err(Error::Storage)` if the record cannot be read or is corrupted
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let _guard = self
            .locks
            .for_path(&path)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(key, "cache miss");
                return Ok(None);
            }
            Err(e) => return Err(Error::storage(&path, e)),
        };

        let (header, payload) = decode_record(&bytes).map_err(|e| Error::storage(&path, e))?;
        if header.key != key {
            return Err(Error::storage(
                &path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("record belongs to key '{}'", header.key),
                ),
            ));
        }

        if !self.is_fresh(header.stored_at) {
            remove_record(&path)?;
            debug!(key, stored_at = %header.stored_at, "cache entry expired, evicted");
            return Ok(None);
        }

        debug!(key, bytes = payload.len(), "cache hit");
        Ok(Some(payload.to_vec()))
    }

    /// Stores `payload` under `key`, replacing any earlier entry
    ///
    /// The record is written to a temporary file and renamed into place; on
    /// failure the previous entry (if any) is left untouched.
    pub fn put(&self, key: &str, payload: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::storage(&self.root, e))?;

        let header = EntryHeader {
            key: key.to_string(),
            stored_at: self.clock.now(),
        };
        let header_line = serde_json::to_vec(&header)
            .map_err(|e| Error::storage(&self.root, io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let mut tmp = Builder::new()
            .prefix(PARTIAL_PREFIX)
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(&self.root)
            .map_err(|e| Error::storage(&self.root, e))?;
        tmp.write_all(&header_line)
            .and_then(|_| tmp.write_all(b"\n"))
            .and_then(|_| tmp.write_all(payload))
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| Error::storage(tmp.path(), e))?;

        let path = self.entry_path(key);
        let _guard = self
            .locks
            .for_path(&path)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tmp.persist(&path).map_err(|e| Error::storage(&path, e.error))?;

        debug!(key, bytes = payload.len(), "cache write");
        Ok(())
    }

    /// Like [`TimedCache::get`], but gives up after `timeout`
    pub fn get_within(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.bounded("cache read", timeout, move |cache| cache.get(&key))
    }

    /// Like [`TimedCache::put`], but gives up after `timeout`
    ///
    /// A write that times out may still complete in the background; it is
    /// atomic either way.
    pub fn put_within(&self, key: &str, payload: &[u8], timeout: Duration) -> Result<()> {
        let key = key.to_string();
        let payload = payload.to_vec();
        self.bounded("cache write", timeout, move |cache| cache.put(&key, &payload))
    }

    /// Runs `op` on a worker thread, waiting at most `timeout` for the result
    fn bounded<T, F>(&self, operation: &str, timeout: Duration, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(TimedCache) -> Result<T> + Send + 'static,
    {
        let cache = self.clone();
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name("cache-io".to_string())
            .spawn(move || {
                let _ = tx.send(op(cache));
            })
            .map_err(|e| Error::storage(&self.root, e))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::CacheTimeout {
                operation: operation.to_string(),
                after: timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(Error::storage(
                &self.root,
                io::Error::other(format!("{operation} worker exited without a result")),
            )),
        }
    }

    /// Removes every expired record and returns how many were removed
    ///
    /// Unreadable records are logged and left in place.
    pub fn sweep(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.record_paths()? {
            let _guard = self
                .locks
                .for_path(&path)
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::storage(&path, e)),
            };
            match decode_record(&bytes) {
                Ok((header, _)) if !self.is_fresh(header.stored_at) => {
                    remove_record(&path)?;
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable cache record"),
            }
        }

        // Writes in progress are younger than the TTL, so only abandoned ones go.
        let mut abandoned = 0;
        for path in self.partial_paths()? {
            let modified = match fs::metadata(&path).and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::storage(&path, e)),
            };
            if !self.is_fresh(DateTime::<Utc>::from(modified)) && remove_record(&path)? {
                abandoned += 1;
            }
        }
        debug!(removed, abandoned, "cache sweep finished");
        Ok(removed)
    }

    /// Removes every record and returns how many were removed
    ///
    /// Leftovers of unfinished writes are removed too; a write racing with
    /// `clear` may fail with a storage error.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.record_paths()? {
            let _guard = self
                .locks
                .for_path(&path)
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if remove_record(&path)? {
                removed += 1;
            }
        }
        for path in self.partial_paths()? {
            remove_record(&path)?;
        }
        debug!(removed, "cache cleared");
        Ok(removed)
    }

    /// Lists the record files currently under the cache root
    fn record_paths(&self) -> Result<Vec<PathBuf>> {
        self.list_files(|path| path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION))
    }

    /// Lists temporary files of writes that have not been renamed into place
    fn partial_paths(&self) -> Result<Vec<PathBuf>> {
        self.list_files(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(PARTIAL_PREFIX) && name.ends_with(PARTIAL_SUFFIX))
        })
    }

    fn list_files(&self, include: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(&self.root, e)),
        };

        let mut paths = Vec::new();
        for entry in dir {
            let path = entry.map_err(|e| Error::storage(&self.root, e))?.path();
            if include(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

/// Splits a record into its header and payload
fn decode_record(bytes: &[u8]) -> io::Result<(EntryHeader, &[u8])> {
    let split = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing record header"))?;
    let header: EntryHeader = serde_json::from_slice(&bytes[..split])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok((header, &bytes[split + 1..]))
}

/// Deletes a record, returning whether it existed
fn remove_record(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::storage(path, e)),
    }
}
