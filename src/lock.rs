//! Advisory output lock: a `<output>.lock` sibling file holding the owner
//! pid and acquisition time. A second job targeting the same output fails
//! fast instead of interleaving writes. Orphaned locks from dead processes
//! are stolen after a configurable age.

use crate::error::{EngineError, Result};
use crate::util::{classify_io, remove_with_retry};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Pid, PidExt, System, SystemExt};
use time::OffsetDateTime;

pub struct OutputLock {
    lock_path: PathBuf,
}

impl OutputLock {
    /// Acquire the lock for `output`, stealing a stale one if its owner
    /// process no longer exists and it is older than `stale_age`.
    pub fn acquire(output: &Path, stale_age: Duration) -> Result<Self> {
        let lock_path = sibling_lock_path(output);
        for attempt in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut f) => {
                    let pid = std::process::id();
                    let now = OffsetDateTime::now_utc().unix_timestamp();
                    write!(f, "pid: {pid}\nacquired: {now}\n").map_err(classify_io)?;
                    return Ok(Self { lock_path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let owner = read_owner(&lock_path);
                    if attempt == 0 && is_stale(&lock_path, owner, stale_age) {
                        tracing::warn!(
                            lock = %lock_path.display(),
                            "stealing stale output lock from dead process"
                        );
                        remove_with_retry(&lock_path).map_err(classify_io)?;
                        continue;
                    }
                    return Err(EngineError::OutputLocked {
                        pid: owner.map(|(pid, _)| pid).unwrap_or(0),
                    });
                }
                Err(e) => return Err(classify_io(e)),
            }
        }
        Err(EngineError::OutputLocked { pid: 0 })
    }

}

impl Drop for OutputLock {
    fn drop(&mut self) {
        if let Err(e) = remove_with_retry(&self.lock_path) {
            tracing::warn!(lock = %self.lock_path.display(), error = %e, "failed to release output lock");
        }
    }
}

fn sibling_lock_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    output.with_file_name(name)
}

/// Parse `(pid, acquired_unix_secs)` out of a lock file, if readable.
fn read_owner(lock_path: &Path) -> Option<(u32, i64)> {
    let mut contents = String::new();
    std::fs::File::open(lock_path)
        .ok()?
        .read_to_string(&mut contents)
        .ok()?;
    let mut pid = None;
    let mut acquired = None;
    for line in contents.lines() {
        if let Some((k, v)) = line.split_once(':') {
            match k.trim() {
                "pid" => pid = v.trim().parse::<u32>().ok(),
                "acquired" => acquired = v.trim().parse::<i64>().ok(),
                _ => {}
            }
        }
    }
    Some((pid?, acquired?))
}

fn is_stale(lock_path: &Path, owner: Option<(u32, i64)>, stale_age: Duration) -> bool {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let age_secs = match owner {
        Some((_, acquired)) => now.saturating_sub(acquired),
        // Unreadable lock: judge age by mtime alone.
        None => lock_path
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0),
    };
    if age_secs < stale_age.as_secs() as i64 {
        return false;
    }
    match owner {
        Some((pid, _)) => !pid_alive(pid),
        None => true,
    }
}

fn pid_alive(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_process(Pid::from_u32(pid));
    sys.process(Pid::from_u32(pid)).is_some()
}
