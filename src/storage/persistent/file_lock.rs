//! Advisory file locking for group containers.
//!
//! Several processes share one group container, so each store operation
//! takes an exclusive lock on the container's lock file for its duration.
//!
//! # Safety
//! - Lock is released when `FileLock` is dropped
//! - Lock file is created if it doesn't exist

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};

/// Exclusive lock on a group container.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

/// Name of the lock file inside a group container.
pub const LOCK_FILE_NAME: &str = ".lock";

impl FileLock {
    /// Acquire the container lock, waiting for other holders to release it.
    ///
    /// # Errors
    /// - `ErrorKind::PermissionDenied` if we don't have write access
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let (file, path) = Self::open(dir)?;
        Self::lock(&file, true)?;
        Ok(Self { _file: file, path })
    }

    /// Acquire the container lock without waiting.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another holder has the lock
    pub fn try_acquire(dir: &Path) -> IoResult<Self> {
        let (file, path) = Self::open(dir)?;
        Self::lock(&file, false)?;
        Ok(Self { _file: file, path })
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(dir: &Path) -> IoResult<(File, PathBuf)> {
        let lock_path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        Ok((file, lock_path))
    }

    #[cfg(unix)]
    fn lock(file: &File, wait: bool) -> IoResult<()> {
        use std::os::unix::io::AsRawFd;

        let fd = file.as_raw_fd();
        let flags = if wait {
            libc::LOCK_EX
        } else {
            libc::LOCK_EX | libc::LOCK_NB
        };

        loop {
            let result = unsafe { libc::flock(fd, flags) };
            if result == 0 {
                return Ok(());
            }

            let errno = std::io::Error::last_os_error();
            match errno.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EWOULDBLOCK) => {
                    return Err(IoError::new(
                        ErrorKind::WouldBlock,
                        "group container is locked by another holder",
                    ));
                }
                _ => return Err(errno),
            }
        }
    }

    #[cfg(windows)]
    fn lock(file: &File, wait: bool) -> IoResult<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let flags = if wait {
            LOCKFILE_EXCLUSIVE_LOCK
        } else {
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY
        };
        let result = unsafe {
            let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
            LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
        };

        if result == 0 {
            let err = std::io::Error::last_os_error();
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("group container is locked by another holder: {err}"),
            ));
        }

        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn lock(_file: &File, _wait: bool) -> IoResult<()> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "file locking not supported on this platform",
        ))
    }
}
