//! One JSON file per client key, guarded by an exclusive advisory lock.
//!
//! Gives cross-process correctness on a single host without a shared cache.
//! Each check costs one open, lock, read and (usually) write.

use super::{advance, BackendError, BackendKind, RateBackend, RateWindow};
use crate::rate_limiter::{Decision, DEFAULT_BACKEND_TIMEOUT};
use async_trait::async_trait;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

const WINDOW_FILE_EXTENSION: &str = "json";
const LOCK_RETRY: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl FileBackend {
    /// Use `dir` for window files, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock_timeout: DEFAULT_BACKEND_TIMEOUT,
        })
    }

    /// How long a check waits for another holder of the window lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names are a digest of the key, so arbitrary keys map to safe,
    /// fixed-length names.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir
            .join(format!("{}.{}", hex::encode(digest), WINDOW_FILE_EXTENSION))
    }
}

/// Read whatever window the file holds. Empty or unparsable contents count
/// as no window at all.
fn read_window(file: &mut File) -> Result<Option<RateWindow>, BackendError> {
    let mut raw = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut raw)?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str(&raw) {
        Ok(window) => Ok(Some(window)),
        Err(e) => {
            debug!(error = %e, "discarding unreadable rate window");
            Ok(None)
        }
    }
}

fn write_window(file: &mut File, window: &RateWindow) -> Result<(), BackendError> {
    let encoded = serde_json::to_vec(window)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&encoded)?;
    file.flush()?;
    Ok(())
}

/// Poll for the exclusive lock until `deadline`.
fn lock_until(file: &File, deadline: Instant, budget: Duration) -> Result<(), BackendError> {
    let contended = fs2::lock_contended_error().raw_os_error();
    loop {
        match FileExt::try_lock_exclusive(file) {
            Ok(()) => return Ok(()),
            Err(e) if e.raw_os_error() == contended => {
                if Instant::now() >= deadline {
                    return Err(BackendError::Timeout(budget.as_millis()));
                }
                std::thread::sleep(LOCK_RETRY);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Whether `file` is still the one linked at `path`.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> io::Result<bool> {
    Ok(path.exists())
}

/// Open and lock the window file at `path`. Purge may unlink the file
/// between our open and our lock, so reopen until the locked file is the
/// one linked at `path`.
fn open_locked(path: &Path, lock_timeout: Duration) -> Result<File, BackendError> {
    let deadline = Instant::now() + lock_timeout;
    loop {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        lock_until(&file, deadline, lock_timeout)?;
        if still_linked(&file, path)? {
            return Ok(file);
        }
        let _ = FileExt::unlock(&file);
        debug!("window file was purged while waiting for its lock, reopening");
    }
}

fn check_locked(
    path: &Path,
    limit: u32,
    window_secs: u64,
    now: u64,
    lock_timeout: Duration,
) -> Result<Decision, BackendError> {
    let mut file = open_locked(path, lock_timeout)?;
    let outcome = read_window(&mut file).and_then(|stored| {
        let transition = advance(stored, limit, window_secs, now);
        if let Some(window) = transition.to_store() {
            write_window(&mut file, &window)?;
        }
        Ok(transition.decision(limit, now, window_secs))
    });
    // Unlock before reporting any error from the cycle above.
    let unlocked = FileExt::unlock(&file);

    let decision = outcome?;
    unlocked?;
    Ok(decision)
}

fn purge_dir(dir: &Path, now: u64, window_secs: u64) -> Result<usize, BackendError> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(WINDOW_FILE_EXTENSION) {
            continue;
        }

        let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(_) => continue,
        };
        // Skip files another request is working on right now.
        if FileExt::try_lock_exclusive(&file).is_err() {
            continue;
        }

        let expired = match read_window(&mut file) {
            Ok(Some(window)) => window.is_expired(now, window_secs),
            Ok(None) => true,
            Err(_) => false,
        };
        if expired && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
        let _ = FileExt::unlock(&file);
    }
    Ok(removed)
}

#[async_trait]
impl RateBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    async fn check_and_consume(
        &self,
        key: &str,
        limit: u32,
        window_secs: u64,
        now: u64,
    ) -> Result<Decision, BackendError> {
        let path = self.path_for(key);
        let lock_timeout = self.lock_timeout;
        tokio::task::spawn_blocking(move || {
            check_locked(&path, limit, window_secs, now, lock_timeout)
        })
        .await?
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let metadata = tokio::fs::metadata(&self.dir).await?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(BackendError::Protocol(format!(
                "{} is not a directory",
                self.dir.display()
            )))
        }
    }

    async fn purge_expired(&self, now: u64, window_secs: u64) -> Result<usize, BackendError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || purge_dir(&dir, now, window_secs)).await?
    }
}
