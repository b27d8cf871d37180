//! Advisory file locking for the multi-writer stores (`sessions.json` and
//! the chunk database), using the `flock(2)` syscall directly.
//!
//! Calling `flock(2)` via libc instead of an RAII wrapper crate means the
//! guard only has to own the `File` (which owns the fd). `Drop` calls
//! `flock(fd, LOCK_UN)` for deterministic release; closing the fd moments
//! later would release it anyway.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Diagnostic payload written into the lock file by the holder.
#[derive(Debug, Serialize, Deserialize)]
struct LockDiagnostic {
    pid: u32,
    owner: String,
    acquired_at: DateTime<Utc>,
}

/// Exclusive lock guard over a store file.
///
/// The lock file lives next to the store as `<store>.lock`; the store file
/// itself is never locked so readers can keep scanning it.
pub struct StoreLock {
    file: File,
    lock_path: PathBuf,
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `self.file`. LOCK_UN
        // releases the advisory lock; a failure here is harmless because
        // the fd is closed immediately after.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

impl StoreLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    name.push_str(".lock");
    store_path.with_file_name(name)
}

fn try_acquire(store_path: &Path, owner: &str) -> Result<Option<StoreLock>> {
    if let Some(parent) = store_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create store directory: {}", parent.display()))?;
    }

    let lock_path = lock_path_for(store_path);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("failed to open lock file: {}", lock_path.display()))?;

    let fd = file.as_raw_fd();
    // SAFETY: `fd` is a valid descriptor from the `File` just opened.
    // LOCK_EX | LOCK_NB requests an exclusive non-blocking lock.
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if ret != 0 {
        return Ok(None);
    }

    let mut lock = StoreLock { file, lock_path };
    let diagnostic = LockDiagnostic {
        pid: std::process::id(),
        owner: owner.to_string(),
        acquired_at: Utc::now(),
    };
    let json = serde_json::to_string(&diagnostic).context("failed to serialize lock diagnostic")?;
    lock.file.set_len(0).context("failed to truncate lock file")?;
    lock.file
        .write_all(json.as_bytes())
        .context("failed to write lock diagnostic")?;
    lock.file.flush().context("failed to flush lock file")?;

    Ok(Some(lock))
}

fn holder_message(store_path: &Path) -> String {
    let lock_path = lock_path_for(store_path);
    let mut contents = String::new();
    if File::open(&lock_path)
        .and_then(|mut f| f.read_to_string(&mut contents))
        .is_ok()
        && let Ok(diag) = serde_json::from_str::<LockDiagnostic>(&contents)
    {
        return format!(
            "Store locked by PID {} (owner: {}, acquired: {})",
            diag.pid, diag.owner, diag.acquired_at
        );
    }
    "Store is locked (unable to read diagnostic info)".to_string()
}

/// Acquire a non-blocking exclusive lock on `store_path`.
///
/// Returns a guard that releases on drop. When another process holds the
/// lock, the error names the holding PID and owner when readable.
pub fn acquire(store_path: &Path, owner: &str) -> Result<StoreLock> {
    match try_acquire(store_path, owner)? {
        Some(lock) => Ok(lock),
        None => Err(anyhow::anyhow!(holder_message(store_path))),
    }
}

/// Acquire with bounded retries, sleeping `retry_delay` between attempts.
/// The read-modify-write critical sections guarded here are short, so a
/// small number of retries rides out concurrent writers.
pub fn acquire_with_retry(
    store_path: &Path,
    owner: &str,
    attempts: u32,
    retry_delay: Duration,
) -> Result<StoreLock> {
    let attempts = attempts.max(1);
    for _ in 0..attempts - 1 {
        if let Some(lock) = try_acquire(store_path, owner)? {
            return Ok(lock);
        }
        std::thread::sleep(retry_delay);
    }
    acquire(store_path, owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_succeeds() {
        let temp = tempdir().expect("Failed to create temp dir");
        let store = temp.path().join("sessions.json");

        let lock = acquire(&store, "test-owner");
        assert!(lock.is_ok(), "Lock acquisition should succeed");
        assert!(lock.unwrap().lock_path().exists());
    }

    #[test]
    fn test_lock_file_lives_next_to_store() {
        let temp = tempdir().expect("Failed to create temp dir");
        let store = temp.path().join("sessions.json");

        let lock = acquire(&store, "test-owner").expect("Failed to acquire lock");
        assert_eq!(lock.lock_path(), temp.path().join("sessions.json.lock"));
    }

    #[test]
    fn test_diagnostic_written() {
        let temp = tempdir().expect("Failed to create temp dir");
        let store = temp.path().join("sessions.json");

        let _lock = acquire(&store, "writer-a").expect("Failed to acquire lock");

        let contents = fs::read_to_string(temp.path().join("sessions.json.lock")).unwrap();
        let diag: LockDiagnostic = serde_json::from_str(&contents).unwrap();
        assert_eq!(diag.pid, std::process::id());
        assert_eq!(diag.owner, "writer-a");
    }

    #[test]
    fn test_parent_dirs_created() {
        let temp = tempdir().expect("Failed to create temp dir");
        let store = temp.path().join("agents/main/sessions/sessions.json");

        let lock = acquire(&store, "test-owner");
        assert!(lock.is_ok(), "Should create intermediate dirs");
    }

    #[test]
    fn test_different_stores_independent() {
        let temp = tempdir().expect("Failed to create temp dir");
        let lock_a = acquire(&temp.path().join("a.json"), "x").unwrap();
        let lock_b = acquire(&temp.path().join("b.json"), "x").unwrap();
        assert_ne!(lock_a.lock_path(), lock_b.lock_path());
    }

    #[test]
    fn test_invalid_store_path_fails() {
        // /dev/null is a file, so creating a lock under it as a dir fails
        let result = acquire(Path::new("/dev/null/sessions.json"), "x");
        assert!(result.is_err());
    }

    // flock locks are per open-file-description, so a second acquire within
    // this process would succeed; cross-process exclusion is exercised by the
    // session store tests that shell out. Here we only document the path.
    #[test]
    fn test_debug_format() {
        let temp = tempdir().expect("Failed to create temp dir");
        let lock = acquire(&temp.path().join("s.json"), "x").unwrap();
        let debug = format!("{lock:?}");
        assert!(debug.contains("StoreLock"));
        assert!(debug.contains("lock_path"));
    }
}
