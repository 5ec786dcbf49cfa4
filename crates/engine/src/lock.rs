//! Host-scoped run lock.
//!
//! At most one run (audit, harden or rollback) may be active per host. The
//! lock is an exclusive advisory lock on a well-known file, so a second
//! process or a second caller in the same process is rejected with
//! `RunInProgress` instead of being queued. The kernel drops the lock when
//! the holder exits, so a crashed run never blocks the next one.
//!
//! The file itself stays on disk. It only carries the holder's details for
//! error messages; removing it would let two callers lock different inodes.

use fd_lock::RwLock;
use hardkit_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Contents of the lock file while it is held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub run_id: String,
    pub acquired_at: chrono::DateTime<chrono::Utc>,
}

/// RAII guard for the host lock.
pub struct HostLock {
    path: PathBuf,
    file: Option<RwLock<File>>,
}

impl std::fmt::Debug for HostLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLock").field("path", &self.path).finish()
    }
}

impl HostLock {
    /// Acquire the lock or fail with `RunInProgress`.
    pub fn acquire(path: &Path, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let mut lock = RwLock::new(file);

        let mut guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Err(run_in_progress(path, read_holder(path).as_ref()));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let holder = LockHolder {
            pid: std::process::id(),
            run_id: run_id.to_string(),
            acquired_at: chrono::Utc::now(),
        };
        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;
        guard.write_all(serde_json::to_string(&holder)?.as_bytes())?;
        guard.flush()?;

        // The lock stays held until the file handle closes in `drop`.
        std::mem::forget(guard);
        debug!("Acquired host lock {:?} for run {}", path, run_id);

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(lock),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for HostLock {
    fn drop(&mut self) {
        if let Some(lock) = self.file.take() {
            let file = lock.into_inner();
            if let Err(e) = file.set_len(0) {
                warn!("Failed to clear host lock {:?}: {}", self.path, e);
            }
            drop(file);
            debug!("Released host lock {:?}", self.path);
        }
    }
}

fn run_in_progress(path: &Path, holder: Option<&LockHolder>) -> Error {
    Error::RunInProgress {
        lock_path: path.to_path_buf(),
        holder: holder
            .map(|h| format!("run {} by pid {} since {}", h.run_id, h.pid, h.acquired_at))
            .unwrap_or_else(|| "unknown holder".to_string()),
    }
}

fn read_holder(path: &Path) -> Option<LockHolder> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}
