//! Engine error taxonomy. Every failure path maps onto one of these kinds;
//! the job orchestrator is the only place that performs cleanup-and-surface.
//!
//! Display strings never contain absolute paths; where a file must be named,
//! only its final component is used.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    // -------- input validation --------
    #[error("no readable header line was found in the input")]
    HeaderUnreadable,

    #[error("column layout of '{file}' diverges from the first file: {divergent:?}")]
    SchemaMismatch { file: String, divergent: Vec<String> },

    #[error("input contains no data")]
    EmptyInput,

    #[error("input rejected: {0}")]
    InvalidInput(String),

    // -------- internal invariant breach --------
    #[error("dedup spill to disk failed: {0}")]
    DedupSpillFailed(String),

    #[error("output verification failed: {0}")]
    OutputVerificationFailed(String),

    #[error("staging directory and output are on different filesystems")]
    CrossFilesystemStaging,

    #[error("index build failed: {0}")]
    IndexBuildFailed(String),

    // -------- resource / policy --------
    #[error("output file is locked by another job (pid {pid})")]
    OutputLocked { pid: u32 },

    #[error("disk space exhausted while writing")]
    OutOfDisk,

    #[error("memory budget exceeded even at minimum chunk size")]
    OutOfMemoryBudget,

    #[error("job deadline expired")]
    TimedOut,

    #[error("job cancelled")]
    Cancelled,

    // -------- I/O classification --------
    #[error("transient I/O error persisted after retry: {0}")]
    IoTransient(#[source] io::Error),

    #[error("I/O error: {0}")]
    IoFatal(#[source] io::Error),

    // -------- misc --------
    #[error("progress callback panicked and was disabled")]
    CallbackFailed,

    #[error("internal engine fault: {0}")]
    Internal(String),
}

impl EngineError {
    /// The component an error kind originates from, used to tag surfaced
    /// failures without threading a component label through every call.
    pub fn component(&self) -> &'static str {
        match self {
            EngineError::HeaderUnreadable => "header-probe",
            EngineError::SchemaMismatch { .. } => "folder-merger",
            EngineError::EmptyInput | EngineError::InvalidInput(_) => "path-validator",
            EngineError::DedupSpillFailed(_) => "dedup-set",
            EngineError::OutputVerificationFailed(_)
            | EngineError::CrossFilesystemStaging
            | EngineError::OutOfDisk => "chunk-writer",
            EngineError::IndexBuildFailed(_) => "index-builder",
            EngineError::OutputLocked { .. } => "output-lock",
            EngineError::OutOfMemoryBudget => "memory-monitor",
            EngineError::TimedOut | EngineError::Cancelled => "job",
            EngineError::IoTransient(_) | EngineError::IoFatal(_) => "io",
            EngineError::CallbackFailed => "progress",
            EngineError::Internal(_) => "engine",
        }
    }
}

impl From<csv::Error> for EngineError {
    fn from(e: csv::Error) -> Self {
        if e.is_io_error() {
            match e.into_kind() {
                csv::ErrorKind::Io(io_err) => crate::util::classify_io(io_err),
                other => EngineError::Internal(format!("csv: {other:?}")),
            }
        } else {
            EngineError::InvalidInput(format!("malformed CSV record: {e}"))
        }
    }
}
