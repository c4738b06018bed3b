//! PID lock for the data directory
//!
//! sled holds an exclusive lock on its files, and two sentinels against the
//! same controller would race each other's reloads. One instance per data
//! directory.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const LOCK_FILE_NAME: &str = ".hass-sentinel.lock";

/// Lock file holding the owning process ID. Removed on drop.
#[derive(Debug)]
pub struct ProcessLock {
    lock_path: PathBuf,
    owned: bool,
}

impl ProcessLock {
    /// Acquire the lock for `data_dir`, creating the directory if needed.
    ///
    /// Stale locks (owner no longer running) are replaced.
    pub fn acquire<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let lock_path = data_dir.join(LOCK_FILE_NAME);
        if lock_path.exists() {
            match read_owner(&lock_path) {
                Ok(pid) if pid != std::process::id() && is_sentinel_running(pid) => {
                    bail!(
                        "Another hass-sentinel instance is already running (PID: {pid}). \
                         Stop it, or remove the stale lock file: {}",
                        lock_path.display()
                    );
                }
                Ok(pid) => {
                    tracing::info!(pid, "Removing stale lock file");
                    fs::remove_file(&lock_path).context("Failed to remove stale lock file")?;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable lock file, replacing it");
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let pid = std::process::id();
        fs::write(&lock_path, format!("{pid}\n"))
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;
        tracing::debug!(pid, path = %lock_path.display(), "Acquired process lock");

        Ok(Self { lock_path, owned: true })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Release the lock (also done on drop)
    pub fn release(&mut self) {
        if !self.owned {
            return;
        }
        match fs::remove_file(&self.lock_path) {
            Ok(()) => tracing::debug!(path = %self.lock_path.display(), "Released process lock"),
            Err(e) => tracing::warn!(error = %e, "Failed to remove lock file"),
        }
        self.owned = false;
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_owner(lock_path: &Path) -> Result<u32> {
    let contents = fs::read_to_string(lock_path).context("Failed to read lock file")?;
    contents.trim().parse().context("Failed to parse PID from lock file")
}

#[cfg(unix)]
fn is_sentinel_running(pid: u32) -> bool {
    fs::read_to_string(format!("/proc/{pid}/cmdline"))
        .map(|cmdline| cmdline.contains("hass-sentinel") || cmdline.contains("hass_sentinel"))
        .unwrap_or(false)
}

// Without /proc the owner cannot be checked, so assume it is alive.
#[cfg(not(unix))]
fn is_sentinel_running(_pid: u32) -> bool {
    true
}
