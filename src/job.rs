//! Per-job scoped state. A `JobContext` owns the output lock and the temp
//! directory, accumulates run statistics, and is the single authority for
//! cancellation and deadline checks. Temp artifacts never outlive the job:
//! the directory is removed on every exit path when the context drops.

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::filters::DropTally;
use crate::lock::OutputLock;
use crate::paths::{validate_path, PathRole};
use crate::progress::{ProgressEvent, ProgressFn, ProgressSink};
use crate::util::{classify_io, remove_dir_with_retry};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

const TEMP_PREFIX: &str = ".lmdetl_tmp_";
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// Row accounting for one job. The conservation identity
/// `rows_read == rows_written + drops.total() + rows_failed_canonicalization`
/// holds for every completed cleaning run.
#[derive(Clone, Copy, Debug, Default)]
pub struct JobStats {
    pub rows_read: u64,
    pub rows_written: u64,
    pub drops: DropTally,
    /// Rows whose dedup key column held no usable value.
    pub rows_failed_canonicalization: u64,
    /// Memory-to-disk dedup transitions observed (0 or 1).
    pub dedup_spills: u32,
    pub files_processed: u64,
}

impl JobStats {
    pub fn rows_dropped(&self) -> u64 {
        self.drops.total() + self.rows_failed_canonicalization
    }
}

pub struct JobContext {
    pub cfg: EngineConfig,
    pub output: PathBuf,
    pub stats: JobStats,
    pub cancel: CancelToken,
    sink: ProgressSink,
    temp_dir: PathBuf,
    correlation_id: String,
    started: Instant,
    // Held for the whole job; released on drop.
    _lock: OutputLock,
}

impl JobContext {
    pub fn create(
        cfg: EngineConfig,
        output: &Path,
        cancel: CancelToken,
        progress: Option<Box<ProgressFn>>,
    ) -> Result<Self> {
        let output = validate_path(output, PathRole::Output, &cfg)?;
        let lock = OutputLock::acquire(&output, cfg.stale_lock_age)?;

        let correlation_id = new_correlation_id();
        // The temp dir sits next to the output so the final rename never
        // crosses a filesystem boundary.
        let parent = output
            .parent()
            .ok_or_else(|| EngineError::InvalidInput("output path has no parent".into()))?
            .to_path_buf();
        sweep_stale_temp_dirs(&parent);
        let temp_dir = parent.join(format!("{TEMP_PREFIX}{correlation_id}"));
        fs::create_dir_all(&temp_dir).map_err(classify_io)?;

        Ok(Self {
            cfg,
            output,
            stats: JobStats::default(),
            cancel,
            sink: ProgressSink::new(progress),
            temp_dir,
            correlation_id,
            started: Instant::now(),
            _lock: lock,
        })
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn temp_path(&self, name: &str) -> PathBuf {
        self.temp_dir.join(name)
    }

    /// Cancellation and deadline are observed here, at chunk and file
    /// boundaries only; mid-chunk work always completes.
    pub fn check_interrupted(&self) -> Result<()> {
        if self.cancel.is_set() {
            return Err(EngineError::Cancelled);
        }
        if self.started.elapsed() > self.cfg.deadline {
            return Err(EngineError::TimedOut);
        }
        Ok(())
    }

    pub fn emit(&mut self, event: ProgressEvent) {
        self.sink.emit(event);
    }

    pub fn callback_failed(&self) -> bool {
        self.sink.callback_failed()
    }
}

impl Drop for JobContext {
    fn drop(&mut self) {
        if let Err(e) = remove_dir_with_retry(&self.temp_dir) {
            tracing::warn!(dir = %self.temp_dir.display(), error = %e, "failed to remove job temp directory");
        }
    }
}

pub(crate) fn new_correlation_id() -> String {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    format!(
        "{:012x}{:04x}",
        (nanos as u64) & 0xffff_ffff_ffff,
        std::process::id() as u16
    )
}

/// Remove leftover temp dirs from crashed runs next to the output. Only
/// dirs carrying our prefix and older than an hour are touched.
fn sweep_stale_temp_dirs(parent: &Path) {
    let Ok(entries) = fs::read_dir(parent) else { return };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(TEMP_PREFIX) {
            continue;
        }
        let path = entry.path();
        let old_enough = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.elapsed().ok())
            .map_or(false, |age| age > STALE_TEMP_AGE);
        if old_enough {
            tracing::warn!(dir = %path.display(), "removing stale temp directory from a previous run");
            let _ = remove_dir_with_retry(&path);
        }
    }
}
