//! PID file management.
//!
//! The running agent writes its PID to `~/.cobot/cobot.pid` and holds an
//! `fs2` exclusive lock on it; a second instance fails at startup. The
//! lock is released (and the file removed) on shutdown.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Default PID file location: `~/.cobot/cobot.pid`.
pub fn pid_file_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cobot")
        .join("cobot.pid")
}

/// Write the current PID to `path` and acquire an exclusive lock.
///
/// The returned [`File`] must stay alive for the process lifetime so the
/// advisory lock is held.
pub fn write_pid_file(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .read(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("opening PID file {}: {e}", path.display()))?;

    file.try_lock_exclusive().map_err(|_| {
        anyhow::anyhow!(
            "another cobot instance is running (PID file {} is locked)",
            path.display()
        )
    })?;

    let pid = std::process::id();
    {
        let mut f = &file;
        writeln!(f, "{pid}")?;
        f.flush()?;
    }

    tracing::info!(path = %path.display(), pid, "PID file written");
    Ok(file)
}

/// Remove the PID file. The lock itself is released when `_handle`
/// drops; removing the stale file keeps `status` honest.
pub fn remove_pid_file(path: &Path, _handle: File) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    }
}

/// Read the recorded PID, returning `None` when the file is missing,
/// unparseable, or the process no longer exists.
pub fn read_pid(path: &Path) -> Option<u32> {
    let pid: u32 = fs::read_to_string(path).ok()?.trim().parse().ok()?;
    Path::new(&format!("/proc/{pid}"))
        .exists()
        .then_some(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pid");

        let handle = write_pid_file(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));

        // A second locker fails while we hold the lock.
        assert!(write_pid_file(&path).is_err());

        remove_pid_file(&path, handle);
        assert!(!path.exists());
        assert_eq!(read_pid(&path), None);
    }

    #[test]
    fn stale_pid_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.pid");
        // PID 0 never belongs to a userspace process.
        std::fs::write(&path, "0\n").unwrap();
        assert_eq!(read_pid(&path), None);
    }
}
