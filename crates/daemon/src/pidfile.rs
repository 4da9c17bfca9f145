//! Exclusive PID file.
//!
//! The daemon holds `flock(LOCK_EX)` on `daemon.pid` for its whole life.
//! A file left behind by a crashed daemon is detected with `kill(pid, 0)`.

use crate::error::{DaemonError, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Held PID lock; released and removed on drop.
pub struct PidLock {
    file: File,
    path: PathBuf,
}

impl PidLock {
    /// Lock `path` and write our PID into it.
    ///
    /// A PID file naming a dead process, together with `stale_companions`,
    /// is removed first. A live holder yields [`DaemonError::AlreadyRunning`].
    pub fn acquire(path: &Path, stale_companions: &[PathBuf]) -> Result<Self> {
        if let Some(pid) = read_pid(path) {
            if !process_alive(pid) {
                log::warn!("Removing stale PID file {} (pid {pid})", path.display());
                remove_if_exists(path)?;
                for companion in stale_companions {
                    remove_if_exists(companion)?;
                }
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = open_locked(path)?;

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    /// Unlinks while still holding the lock, and only if the path still
    /// names the locked file.
    fn drop(&mut self) {
        if same_file(&self.file, &self.path) {
            let _ = std::fs::remove_file(&self.path);
        }
        unlock(&self.file);
    }
}

/// Open and lock `path`, retrying when a departing holder unlinked the
/// file between our open and our lock.
fn open_locked(path: &Path) -> Result<File> {
    const ATTEMPTS: usize = 3;
    for _ in 0..ATTEMPTS {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if let Err(err) = try_lock_exclusive(&file) {
            if err.kind() == io::ErrorKind::WouldBlock {
                let mut contents = String::new();
                let _ = file.read_to_string(&mut contents);
                return Err(DaemonError::AlreadyRunning {
                    path: path.to_path_buf(),
                    pid: contents.trim().parse().ok(),
                });
            }
            return Err(err.into());
        }
        if same_file(&file, path) {
            return Ok(file);
        }
        unlock(&file);
    }
    Err(DaemonError::Io(io::Error::other(format!(
        "PID file {} keeps being replaced",
        path.display()
    ))))
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}

/// PID recorded in `path`, if readable.
#[must_use]
pub fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// `kill(pid, 0)`: anything but `ESRCH` counts as alive.
#[cfg(unix)]
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
#[must_use]
pub fn process_alive(_pid: u32) -> bool {
    true
}

/// Send `SIGTERM` to `pid`.
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "signals are not available on this platform",
    ))
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if result != 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock
            || err.raw_os_error() == Some(libc::EWOULDBLOCK)
            || err.raw_os_error() == Some(libc::EAGAIN)
        {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "PID file is locked by another daemon",
            ));
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn unlock(file: &File) {
    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}
