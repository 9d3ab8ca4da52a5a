//! Data directory lock
//!
//! Two service instances writing session files into the same directory would
//! clobber each other's sessions. The lock file holds the owner's PID.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct DataDirLock {
    path: PathBuf,
    owned: bool,
}

impl DataDirLock {
    const FILE_NAME: &'static str = ".icodaq.lock";

    /// Take the lock on `data_dir`, creating the directory if needed.
    ///
    /// A lock left behind by a process that no longer exists is replaced.
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let path = data_dir.join(Self::FILE_NAME);

        if path.exists() {
            match read_owner(&path) {
                Some(pid) if pid == std::process::id() => {
                    bail!("Data directory {} is already locked by this process", data_dir.display())
                }
                Some(pid) if process_alive(pid) => bail!(
                    "Another icodaq instance (PID {pid}) is using {}\n\
                     Stop it, or remove {} if it is no longer running",
                    data_dir.display(),
                    path.display()
                ),
                Some(pid) => info!(pid, "Replacing stale data directory lock"),
                None => warn!(path = %path.display(), "Unreadable lock file, replacing"),
            }
        }

        fs::write(&path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to write lock file {}", path.display()))?;
        debug!(path = %path.display(), "Data directory locked");
        Ok(Self { path, owned: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&mut self) {
        if !self.owned {
            return;
        }
        self.owned = false;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Data directory unlocked"),
            Err(e) => warn!("Failed to remove lock file: {}", e),
        }
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // signal 0 only checks for existence; EPERM means it exists under another user
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
