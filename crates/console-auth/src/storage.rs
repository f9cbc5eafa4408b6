//! Best-effort key-value blob storage
//!
//! The credential store writes through to a `BlobStore` on every mutation.
//! Persistence is advisory: the in-memory credential stays authoritative for
//! the life of the process, so no method here can fail to the caller. I/O and
//! parse problems are logged and swallowed.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

/// String key-value store backing the credential blob.
pub trait BlobStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;

    fn set_string(&self, key: &str, value: &str);

    fn remove(&self, key: &str);
}

/// Read a JSON value stored under `key`. Missing keys and unparsable values
/// both read as `None`.
pub fn read_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Option<T> {
    let raw = store.get_string(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "discarding unparsable stored value");
            None
        }
    }
}

/// Serialize `value` as JSON under `key`.
pub fn write_json<T: Serialize>(store: &dyn BlobStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(raw) => store.set_string(key, &raw),
        Err(e) => warn!(key, error = %e, "failed to serialize value for storage"),
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get_string(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set_string(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}

/// Single JSON object file mapping keys to string values.
///
/// Every mutation rewrites the whole file with temp-file + rename, so a crash
/// mid-write leaves either the old or the new blob. The file holds tokens and
/// is created with 0600 permissions on unix.
#[derive(Debug)]
pub struct FileBlobStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileBlobStore {
    /// Open the blob at `path`. A missing or corrupt file opens as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<HashMap<String, String>>(&contents) {
                Ok(entries) => {
                    info!(path = %path.display(), keys = entries.len(), "loaded credential blob");
                    entries
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "credential blob is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "credential blob not found, starting empty");
                HashMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "credential blob unreadable, starting empty");
                HashMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) {
        if let Err(e) = write_atomic(&self.path, entries) {
            warn!(path = %self.path.display(), error = %e, "failed to persist credential blob");
        }
    }
}

impl BlobStore for FileBlobStore {
    fn get_string(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set_string(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        self.persist(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }
}

fn write_atomic(path: &Path, entries: &HashMap<String, String>) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(entries)?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));
    // A leftover temp file keeps its old mode and links, so start fresh
    match std::fs::remove_file(&tmp_path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp_path, path)?;
    debug!(path = %path.display(), "persisted credential blob");
    Ok(())
}
