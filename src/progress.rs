//! Progress reporting: structured events delivered to a user-supplied
//! callback, plus `indicatif` bar helpers for the CLI binary.
//!
//! Callbacks run on the worker thread. A callback that panics is caught,
//! logged, and disabled for the rest of the job; the job itself continues.

use indicatif::{ProgressBar, ProgressStyle};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Structured progress event. `fraction` fields are byte-based, not
/// row-based, so they stay meaningful for skewed row sizes.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    Start {
        input: String,
        total_bytes: u64,
    },
    Chunk {
        rows_read: u64,
        rows_written: u64,
        fraction: f64,
    },
    Stage {
        name: String,
    },
    Done {
        rows_written: u64,
    },
    Error {
        message: String,
    },
}

pub type ProgressFn = dyn FnMut(&ProgressEvent) + Send;

/// Wraps the user callback and enforces the "must not raise" contract.
pub struct ProgressSink {
    cb: Option<Box<ProgressFn>>,
    failed: bool,
}

impl ProgressSink {
    pub fn new(cb: Option<Box<ProgressFn>>) -> Self {
        Self { cb, failed: false }
    }

    /// True once a callback panic has been observed and the sink disabled.
    pub fn callback_failed(&self) -> bool {
        self.failed
    }

    pub fn emit(&mut self, event: ProgressEvent) {
        let Some(cb) = self.cb.as_mut() else { return };
        let outcome = catch_unwind(AssertUnwindSafe(|| cb(&event)));
        if outcome.is_err() {
            tracing::warn!("progress callback panicked; disabling it for this job");
            self.cb = None;
            self.failed = true;
        }
    }
}

/// Byte-based progress bar for the CLI.
pub fn bytes_bar(label: &str, total_bytes: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_bytes);
    let style = ProgressStyle::with_template(
        "{spinner:.green} {msg} {bytes:>10}/{total_bytes:<10} [{bar:.cyan/blue}] {percent:>3}%  \
         {bytes_per_sec}  elapsed: {elapsed_precise}  eta: {eta_precise}",
    )
    .unwrap()
    .progress_chars("█▉▊▋▌▍▎▏  ");
    pb.set_style(style);
    pb.set_message(label.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
