//! Public engine facade. `TelemetryEtl` is a builder over `EngineConfig`;
//! each operation runs on a dedicated worker thread, owns a `JobContext`
//! for its whole lifetime, and surfaces either a `JobReport` or a
//! `JobFailure` carrying the error kind, component, stats snapshot, and
//! correlation id. This is the only place that performs
//! cleanup-and-surface; components below just return errors.

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::job::{new_correlation_id, JobContext, JobStats};
use crate::progress::{ProgressEvent, ProgressFn};
use crate::{join, merge, process};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of a successful job.
#[derive(Clone, Debug)]
pub struct JobReport {
    pub output: PathBuf,
    pub stats: JobStats,
    pub correlation_id: String,
}

/// Outcome of a failed job. Display gives one short sentence plus the
/// correlation id; the detailed story is in the structured log.
#[derive(Debug)]
pub struct JobFailure {
    pub error: EngineError,
    pub component: &'static str,
    pub stats: JobStats,
    pub correlation_id: String,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (correlation id {})", self.error, self.correlation_id)
    }
}

impl std::error::Error for JobFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Builder-style entry point for the engine.
///
/// ```no_run
/// use lmdetl::TelemetryEtl;
///
/// let report = TelemetryEtl::new()
///     .chunk_size(25_000)
///     .max_backups(3)
///     .clean_file("combined_lmd.csv", "combined_lmd_clean.csv")?;
/// println!("kept {} rows", report.stats.rows_written);
/// # Ok::<(), lmdetl::JobFailure>(())
/// ```
pub struct TelemetryEtl {
    cfg: EngineConfig,
    progress: Option<Box<ProgressFn>>,
    cancel: CancelToken,
}

impl Default for TelemetryEtl {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryEtl {
    pub fn new() -> Self {
        Self {
            cfg: EngineConfig::default(),
            progress: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            progress: None,
            cancel: CancelToken::new(),
        }
    }

    // -------- Builder methods --------
    pub fn chunk_size(mut self, rows: usize) -> Self { self.cfg = self.cfg.with_chunk_size(rows); self }
    pub fn chunk_bounds(mut self, min_rows: usize, max_rows: usize) -> Self { self.cfg = self.cfg.with_chunk_bounds(min_rows, max_rows); self }
    pub fn max_mem_keys(mut self, keys: usize) -> Self { self.cfg = self.cfg.with_max_mem_keys(keys); self }
    pub fn max_file_bytes(mut self, bytes: u64) -> Self { self.cfg = self.cfg.with_max_file_bytes(bytes); self }
    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self where I: IntoIterator<Item = S>, S: AsRef<str> { self.cfg = self.cfg.with_allowed_extensions(exts); self }
    pub fn max_backups(mut self, count: usize) -> Self { self.cfg = self.cfg.with_max_backups(count); self }
    pub fn deadline(mut self, deadline: Duration) -> Self { self.cfg = self.cfg.with_deadline(deadline); self }
    pub fn memory_thresholds(mut self, low: f64, high: f64, hard_cap: f64) -> Self { self.cfg = self.cfg.with_memory_thresholds(low, high, hard_cap); self }
    pub fn index_run_bytes(mut self, bytes: usize) -> Self { self.cfg = self.cfg.with_index_run_bytes(bytes); self }
    pub fn stale_lock_age(mut self, age: Duration) -> Self { self.cfg = self.cfg.with_stale_lock_age(age); self }
    pub fn io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self { self.cfg = self.cfg.with_io_buffers(read_bytes, write_bytes); self }
    pub fn parallel_filters(mut self, yes: bool) -> Self { self.cfg = self.cfg.with_parallel_filters(yes); self }

    /// Structured progress events, delivered on the worker thread.
    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ProgressEvent) + Send + 'static,
    {
        self.progress = Some(Box::new(f));
        self
    }

    /// Handle for cooperative cancellation from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // -------- Operations --------

    /// Clean one telemetry file: filter, dedup on the timestamp column,
    /// write to `output` with backup and verification.
    pub fn clean_file(
        self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<JobReport, JobFailure> {
        let input = input.as_ref().to_path_buf();
        self.run_job(output.as_ref().to_path_buf(), move |ctx| {
            process::run_clean(ctx, &input)
        })
    }

    /// Clean every CSV in `dir` into one output with cross-file dedup.
    pub fn merge_folder(
        self,
        dir: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<JobReport, JobFailure> {
        let dir = dir.as_ref().to_path_buf();
        self.run_job(output.as_ref().to_path_buf(), move |ctx| {
            merge::run_merge(ctx, &dir)
        })
    }

    /// Enrich `details` with `carry_columns` looked up from `lmd` by
    /// canonical timestamp (left outer join).
    pub fn add_columns<I, S>(
        self,
        lmd: impl AsRef<Path>,
        details: impl AsRef<Path>,
        carry_columns: I,
        output: impl AsRef<Path>,
    ) -> Result<JobReport, JobFailure>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lmd = lmd.as_ref().to_path_buf();
        let details = details.as_ref().to_path_buf();
        let carry: Vec<String> = carry_columns.into_iter().map(Into::into).collect();
        self.run_job(output.as_ref().to_path_buf(), move |ctx| {
            join::run_add_columns(ctx, &lmd, &details, &carry)
        })
    }

    fn run_job<F>(self, output: PathBuf, op: F) -> Result<JobReport, JobFailure>
    where
        F: FnOnce(&mut JobContext) -> crate::error::Result<()> + Send + 'static,
    {
        let TelemetryEtl {
            cfg,
            progress,
            cancel,
        } = self;

        let worker = std::thread::Builder::new()
            .name("lmdetl-worker".to_string())
            .spawn(move || -> Result<JobReport, JobFailure> {
                let mut ctx = match JobContext::create(cfg, &output, cancel, progress) {
                    Ok(ctx) => ctx,
                    Err(error) => {
                        return Err(JobFailure {
                            component: error.component(),
                            stats: JobStats::default(),
                            correlation_id: new_correlation_id(),
                            error,
                        })
                    }
                };
                match op(&mut ctx) {
                    Ok(()) => {
                        ctx.emit(ProgressEvent::Done {
                            rows_written: ctx.stats.rows_written,
                        });
                        if ctx.callback_failed() {
                            tracing::warn!(
                                correlation_id = %ctx.correlation_id(),
                                "{}",
                                EngineError::CallbackFailed
                            );
                        }
                        let report = JobReport {
                            output: ctx.output.clone(),
                            stats: ctx.stats,
                            correlation_id: ctx.correlation_id().to_string(),
                        };
                        tracing::info!(
                            correlation_id = %report.correlation_id,
                            rows_read = report.stats.rows_read,
                            rows_written = report.stats.rows_written,
                            rows_dropped = report.stats.rows_dropped(),
                            "job complete"
                        );
                        Ok(report)
                    }
                    Err(error) => {
                        ctx.emit(ProgressEvent::Error {
                            message: error.to_string(),
                        });
                        tracing::error!(
                            correlation_id = %ctx.correlation_id(),
                            component = error.component(),
                            error = %error,
                            "job failed"
                        );
                        Err(JobFailure {
                            component: error.component(),
                            stats: ctx.stats,
                            correlation_id: ctx.correlation_id().to_string(),
                            error,
                        })
                    }
                }
            })
            .map_err(|e| JobFailure {
                error: EngineError::Internal(format!("spawn worker: {e}")),
                component: "engine",
                stats: JobStats::default(),
                correlation_id: new_correlation_id(),
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => Err(JobFailure {
                error: EngineError::Internal("worker thread panicked".into()),
                component: "engine",
                stats: JobStats::default(),
                correlation_id: new_correlation_id(),
            }),
        }
    }
}
