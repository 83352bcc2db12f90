//! Robust file operations: open/create/remove/rename with a single retry for
//! transient errors, atomic replacement, and I/O error classification.

use crate::error::EngineError;
use std::fs;
use std::fs::File;
use std::io;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

/// One retry after a short pause, per the engine's transient-error policy.
pub const IO_TRIES: usize = 2;
pub const IO_RETRY_DELAY_MS: u64 = 50;

/// Return true for transient/retriable I/O errors often seen on Windows when
/// filter drivers (AV/backup), USB/NAS volumes, or sharing violations occur.
pub fn is_retriable_io_error(e: &io::Error) -> bool {
    match e.raw_os_error() {
        // Common Windows transient codes:
        //   5   = Access is denied (often AV/share)
        //   32  = Sharing violation
        //   33  = Lock violation
        //   225 = AV/PUA blocked file
        //   433 = A device which does not exist was specified
        //   1006= Volume externally altered; handle invalid
        //   1117= I/O device error
        //   1224= The requested operation cannot be performed on a file with a user-mapped section open
        //   21  = Device not ready
        Some(5)   | Some(32)  | Some(33)  | Some(225) |
        Some(433) | Some(1006)| Some(1117)| Some(1224)|
        Some(21) => true,
        _ => false,
    }
}

/// True when the error indicates the filesystem ran out of space.
pub fn is_out_of_disk(e: &io::Error) -> bool {
    // 28 = ENOSPC (unix), 112 = ERROR_DISK_FULL (windows)
    matches!(e.raw_os_error(), Some(28) | Some(112))
}

/// True when a rename failed because source and destination live on
/// different filesystems.
pub fn is_cross_device(e: &io::Error) -> bool {
    // 18 = EXDEV (unix), 17 = ERROR_NOT_SAME_DEVICE (windows)
    matches!(e.raw_os_error(), Some(18) | Some(17))
}

/// Map an `io::Error` onto the engine taxonomy after retries are exhausted.
pub fn classify_io(e: io::Error) -> EngineError {
    if is_out_of_disk(&e) {
        EngineError::OutOfDisk
    } else if is_retriable_io_error(&e) {
        EngineError::IoTransient(e)
    } else {
        EngineError::IoFatal(e)
    }
}

/// Open a file, retrying once on transient errors.
pub fn open_with_retry(path: &Path) -> io::Result<File> {
    let mut last_err: Option<io::Error> = None;
    for i in 0..IO_TRIES {
        match File::open(path) {
            Ok(f) => return Ok(f),
            Err(e) if is_retriable_io_error(&e) => {
                last_err = Some(e);
                sleep(Duration::from_millis(IO_RETRY_DELAY_MS * (i + 1) as u64));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "open failed")))
}

/// Create (truncate) a file, retrying once on transient errors.
pub fn create_with_retry(path: &Path) -> io::Result<File> {
    let mut last_err: Option<io::Error> = None;
    for i in 0..IO_TRIES {
        match File::create(path) {
            Ok(f) => return Ok(f),
            Err(e) if is_retriable_io_error(&e) => {
                last_err = Some(e);
                sleep(Duration::from_millis(IO_RETRY_DELAY_MS * (i + 1) as u64));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "create failed")))
}

/// Remove a file, retrying once on transient errors.
/// Succeeds if the file doesn't exist.
pub fn remove_with_retry(path: &Path) -> io::Result<()> {
    let mut last_err: Option<io::Error> = None;
    for i in 0..IO_TRIES {
        match fs::remove_file(path) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) if is_retriable_io_error(&e) => {
                last_err = Some(e);
                sleep(Duration::from_millis(IO_RETRY_DELAY_MS * (i + 1) as u64));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "remove failed")))
}

/// Rename a file, retrying once on transient errors. Cross-device failures
/// are surfaced immediately so the caller can classify them.
pub fn rename_with_retry(src: &Path, dest: &Path) -> io::Result<()> {
    let mut last_err: Option<io::Error> = None;
    for i in 0..IO_TRIES {
        match fs::rename(src, dest) {
            Ok(_) => return Ok(()),
            Err(e) if is_cross_device(&e) => return Err(e),
            Err(e) if is_retriable_io_error(&e) => {
                last_err = Some(e);
                sleep(Duration::from_millis(IO_RETRY_DELAY_MS * (i + 1) as u64));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "rename failed")))
}

/// Atomically replace `dest` with `src`. Both must be on the same filesystem;
/// a cross-device rename is an error here, never a silent copy.
pub fn replace_file_atomic(src: &Path, dest: &Path) -> io::Result<()> {
    if dest.exists() {
        remove_with_retry(dest)?;
    }
    rename_with_retry(src, dest)
}

/// Remove a directory tree, retrying once on transient errors.
/// Succeeds if the directory doesn't exist.
pub fn remove_dir_with_retry(path: &Path) -> io::Result<()> {
    let mut last_err: Option<io::Error> = None;
    for i in 0..IO_TRIES {
        match fs::remove_dir_all(path) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) if is_retriable_io_error(&e) => {
                last_err = Some(e);
                sleep(Duration::from_millis(IO_RETRY_DELAY_MS * (i + 1) as u64));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "remove dir failed")))
}
