// PID file guarding one daemon per data directory

use crate::error::{WardenError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Manages the daemon PID file
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write the current process PID to the file
    pub fn write(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, std::process::id().to_string())
            .map_err(|e| WardenError::StateSaveError(format!("Failed to write PID file: {}", e)))
    }

    /// Read the PID from the file
    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| WardenError::StateLoadError(format!("Failed to read PID file: {}", e)))?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| WardenError::StateCorruption(format!("Invalid PID in file: {}", e)))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_file(&self.path).map_err(|e| {
                WardenError::StateSaveError(format!("Failed to remove PID file: {}", e))
            })?;
        }
        Ok(())
    }

    /// PID of the live daemon recorded in the file, if any
    pub fn running_pid(&self) -> Option<u32> {
        if !self.exists() {
            return None;
        }
        self.read().ok().filter(|pid| is_process_alive(*pid))
    }

    pub fn is_daemon_running(&self) -> bool {
        self.running_pid().is_some()
    }

    /// Claim the file for this process. Fails when another live daemon owns
    /// it; a stale file left by a dead daemon is replaced.
    pub fn acquire(path: impl AsRef<Path>) -> Result<PidGuard> {
        let pid_file = Self::with_path(path);
        if let Some(pid) = pid_file.running_pid() {
            if pid != std::process::id() {
                return Err(WardenError::DaemonAlreadyRunning(pid));
            }
        }
        if pid_file.exists() {
            tracing::debug!(path = %pid_file.path.display(), "removing stale PID file");
            pid_file.remove()?;
        }
        pid_file.write()?;
        Ok(PidGuard { pid_file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Removes the PID file when dropped
pub struct PidGuard {
    pid_file: PidFile,
}

impl PidGuard {
    pub fn path(&self) -> &Path {
        self.pid_file.path()
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        if let Err(e) = self.pid_file.remove() {
            tracing::warn!(error = %e, "failed to remove PID file");
        }
    }
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // signal 0 only checks for existence
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_pid() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::with_path(dir.path().join("nested").join("gw.pid"));

        pid_file.write().unwrap();
        assert_eq!(pid_file.read().unwrap(), std::process::id());
        assert!(pid_file.is_daemon_running());

        pid_file.remove().unwrap();
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_guard_removes_file_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gw.pid");

        let guard = PidFile::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(guard.path(), path.as_path());
        drop(guard);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_pid_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gw.pid");
        // PIDs this large are never handed out
        fs::write(&path, "4194303").unwrap();

        let _guard = PidFile::acquire(&path).unwrap();
        assert_eq!(
            PidFile::with_path(&path).read().unwrap(),
            std::process::id()
        );
    }

    #[test]
    fn test_garbage_pid_file_is_not_running() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gw.pid");
        fs::write(&path, "not-a-pid").unwrap();

        let pid_file = PidFile::with_path(&path);
        assert!(matches!(pid_file.read(), Err(WardenError::StateCorruption(_))));
        assert!(!pid_file.is_daemon_running());
    }

    #[cfg(unix)]
    #[test]
    fn test_live_foreign_daemon_blocks_acquire() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gw.pid");
        let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        fs::write(&path, child.id().to_string()).unwrap();

        let result = PidFile::acquire(&path);
        assert!(matches!(result, Err(WardenError::DaemonAlreadyRunning(pid)) if pid == child.id()));

        child.kill().unwrap();
        child.wait().unwrap();
    }
}
