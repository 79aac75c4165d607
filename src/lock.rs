//! One importer per data directory.
//!
//! `import` holds an advisory `flock` on `<data dir>/import.lock` for the
//! whole run. A second import fails fast instead of racing the first one for
//! the progress marker and the partial output.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

const LOCK_FILE_NAME: &str = "import.lock";

/// Exclusive ownership of a data directory's import files.
/// The lock is released when the guard is dropped or the process exits.
#[derive(Debug)]
pub struct ImportLock {
    file: File,
    path: PathBuf,
}

impl ImportLock {
    /// Take the lock without waiting. Another live import yields an error of
    /// kind `WouldBlock`.
    pub fn try_acquire(base_path: &Path) -> io::Result<Self> {
        let path = base_path.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        lock_nonblocking(&file).map_err(|err| {
            if err.kind() == io::ErrorKind::WouldBlock {
                io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("another import is already running ({})", path.display()),
                )
            } else {
                err
            }
        })?;

        log::debug!("acquired {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ImportLock {
    fn drop(&mut self) {
        unlock(&self.file);
        log::debug!("released {}", self.path.display());
    }
}

#[cfg(unix)]
fn lock_nonblocking(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => {
            Err(io::ErrorKind::WouldBlock.into())
        }
        _ => Err(err),
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    // closing the descriptor releases it anyway
    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
}

// No advisory locking elsewhere; imports must not overlap.
#[cfg(not(unix))]
fn lock_nonblocking(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_file_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ImportLock::try_acquire(dir.path()).unwrap();
        assert_eq!(lock.path(), dir.path().join("import.lock"));
        assert!(lock.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_second_import_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let first = ImportLock::try_acquire(dir.path()).unwrap();

        let err = ImportLock::try_acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(err.to_string().contains("another import is already running"));

        drop(first);
        assert!(ImportLock::try_acquire(dir.path()).is_ok());
    }
}
