mod cancel;
mod config;
mod dedup;
mod error;
mod filters;
mod frame;
mod header;
mod index;
mod job;
mod join;
mod lock;
mod mem;
mod merge;
mod paths;
mod pipeline;
mod process;
mod progress;
mod util;
mod writer;

pub use crate::cancel::CancelToken;
pub use crate::config::EngineConfig;
pub use crate::error::{EngineError, Result};
pub use crate::pipeline::{JobFailure, JobReport, TelemetryEtl};

// Expose the header probe so callers can sniff a file before queueing work.
pub use crate::header::{detect_file_kind, probe_header, ColumnSet, FileKind, HeaderProbe, InputEncoding, TIMESTAMP_COLUMN};

// Expose progress/event types for callback implementations.
pub use crate::progress::{bytes_bar, ProgressEvent};

// Expose stats and drop accounting so callers can audit a run.
pub use crate::filters::{DropReason, DropTally};
pub use crate::job::JobStats;

// Expose key canonicalization; useful when preparing fixtures or audits.
pub use crate::dedup::canonical_key;

// Expose memory utilization for adaptive callers (mirrors the engine's own monitor).
pub use crate::mem::utilization as memory_utilization;
