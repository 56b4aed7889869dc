//! Registry persistence with file locking.
//!
//! The registry is committed as one JSON document. A commit writes a temp
//! file in the same directory, syncs it, and renames it over the previous
//! state, so readers observe either the old or the new registry in full.

use crate::{Error, Registry, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Transactional store for the registry
pub trait StateStore: Send + Sync {
    /// Load the last committed registry, or None if nothing was committed yet
    fn load(&self) -> Result<Option<Registry>>;

    /// Replace the committed registry
    fn commit(&self, registry: &Registry) -> Result<()>;
}

/// JSON file store guarded by an advisory lock file
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn open_lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.lock_path())?;
        Ok(file)
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> Result<Option<Registry>> {
        if !self.path.exists() {
            tracing::info!("No registry found at {:?}, starting empty", self.path);
            return Ok(None);
        }

        let lock = self.open_lock()?;
        lock.lock_shared()?;

        let mut contents = String::new();
        let read = File::open(&self.path).and_then(|f| {
            let mut reader = std::io::BufReader::new(f);
            reader.read_to_string(&mut contents)
        });
        lock.unlock()?;
        read?;

        let registry: Registry = serde_json::from_str(&contents)?;
        tracing::debug!(
            "Loaded registry from {:?}: {} catechumens, {} enrollments",
            self.path,
            registry.catechumens.len(),
            registry.enrollments.len()
        );
        Ok(Some(registry))
    }

    fn commit(&self, registry: &Registry) -> Result<()> {
        let lock = self.open_lock()?;
        lock.lock_exclusive()?;

        let result = (|| -> Result<()> {
            let parent = self.path.parent().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "registry path missing parent")
            })?;
            let temp = NamedTempFile::new_in(parent)?;
            {
                let mut writer = std::io::BufWriter::new(temp.as_file());
                let contents = serde_json::to_string(registry)?;
                writer.write_all(contents.as_bytes())?;
                writer.flush()?;
            }
            temp.as_file().sync_all()?;
            temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
            Ok(())
        })();

        lock.unlock()?;
        result?;

        tracing::debug!("Committed registry to {:?}", self.path);
        Ok(())
    }
}

/// Exclusive claim on a data directory, held for the lifetime of an office
///
/// The registry is loaded once and then mutated in memory, so two processes
/// over the same directory must not overlap.
pub struct DataDirLock {
    file: File,
}

impl DataDirLock {
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(data_dir.join("office.lock"))?;
        file.lock_exclusive()?;
        tracing::debug!("Acquired data directory lock in {:?}", data_dir);
        Ok(Self { file })
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// In-process store, for tests and embedding
#[derive(Default)]
pub struct MemoryStore {
    committed: Mutex<Option<Registry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<Registry>> {
        let guard = self
            .committed
            .lock()
            .map_err(|_| Error::Config("memory store lock poisoned".into()))?;
        Ok(guard.clone())
    }

    fn commit(&self, registry: &Registry) -> Result<()> {
        let mut guard = self
            .committed
            .lock()
            .map_err(|_| Error::Config("memory store lock poisoned".into()))?;
        *guard = Some(registry.clone());
        Ok(())
    }
}

/// Bounded retry for transient persistence failures
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Commit, retrying transient failures up to the policy's attempt limit
///
/// Exhausted retries surface as `PersistenceUnavailable`; non-transient
/// errors are returned on the first occurrence.
pub fn commit_with_retry(
    store: &dyn StateStore,
    registry: &Registry,
    policy: RetryPolicy,
) -> Result<()> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match store.commit(registry) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    "Commit attempt {}/{} failed: {}",
                    attempt,
                    attempts,
                    e
                );
                last_error = Some(e);
                if attempt < attempts {
                    std::thread::sleep(policy.backoff);
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::PersistenceUnavailable {
        attempts,
        reason: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".into()),
    })
}
