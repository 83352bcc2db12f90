use std::time::Duration;

/// Engine-level options with sensible defaults and builder chaining.
/// Every knob that affects processing lives here; the engine holds no
/// hidden configuration state.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Initial streaming chunk size, in rows.
    pub chunk_size: usize,
    /// Floor of the adaptive chunk policy.
    pub min_chunk_size: usize,
    /// Ceiling of the adaptive chunk policy.
    pub max_chunk_size: usize,

    /// Dedup set memory-to-spill threshold (distinct keys held in RAM).
    pub max_mem_keys: usize,

    /// Inputs larger than this are rejected before processing starts.
    pub max_file_bytes: u64,
    /// Lowercased extension whitelist for input files.
    pub allowed_extensions: Vec<String>,

    /// Retention count for timestamped output backups.
    pub max_backups: usize,

    /// Per-job wall-clock limit.
    pub deadline: Duration,

    /// Memory monitor thresholds (fractions of total RAM in use).
    pub high_watermark: f64,
    pub low_watermark: f64,
    pub hard_cap: f64,

    /// Memory budget for one in-memory sort run while building a join index.
    pub index_run_bytes: usize,

    /// Age beyond which an orphaned output lock may be stolen.
    pub stale_lock_age: Duration,

    // IO tuning
    pub read_buffer_bytes: usize,
    pub write_buffer_bytes: usize,

    /// Evaluate filter predicates across CPU cores for large chunks.
    pub parallel_filters: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50_000,
            min_chunk_size: 5_000,
            max_chunk_size: 200_000,
            max_mem_keys: 5_000_000,
            max_file_bytes: 64 * 1024 * 1024 * 1024,
            allowed_extensions: vec!["csv".to_string()],
            max_backups: 5,
            deadline: Duration::from_secs(2 * 60 * 60),
            high_watermark: 0.75,
            low_watermark: 0.40,
            hard_cap: 0.90,
            index_run_bytes: 256 * 1024 * 1024,
            stale_lock_age: Duration::from_secs(60 * 60),
            read_buffer_bytes: 256 * 1024,
            write_buffer_bytes: 256 * 1024,
            parallel_filters: true,
        }
    }
}

impl EngineConfig {
    pub fn with_chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = rows.max(1);
        self
    }
    pub fn with_chunk_bounds(mut self, min_rows: usize, max_rows: usize) -> Self {
        self.min_chunk_size = min_rows.max(1);
        self.max_chunk_size = max_rows.max(self.min_chunk_size);
        self
    }
    pub fn with_max_mem_keys(mut self, keys: usize) -> Self {
        self.max_mem_keys = keys.max(1);
        self
    }
    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }
    pub fn with_allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = exts
            .into_iter()
            .map(|s| s.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }
    pub fn with_max_backups(mut self, count: usize) -> Self {
        self.max_backups = count;
        self
    }
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
    pub fn with_memory_thresholds(mut self, low: f64, high: f64, hard_cap: f64) -> Self {
        self.low_watermark = low.clamp(0.0, 1.0);
        self.high_watermark = high.clamp(self.low_watermark, 1.0);
        self.hard_cap = hard_cap.clamp(self.high_watermark, 1.0);
        self
    }
    pub fn with_index_run_bytes(mut self, bytes: usize) -> Self {
        self.index_run_bytes = bytes.max(64 * 1024);
        self
    }
    pub fn with_stale_lock_age(mut self, age: Duration) -> Self {
        self.stale_lock_age = age;
        self
    }
    pub fn with_io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self {
        self.read_buffer_bytes = read_bytes.max(8 * 1024);
        self.write_buffer_bytes = write_bytes.max(8 * 1024);
        self
    }
    pub fn with_parallel_filters(mut self, yes: bool) -> Self {
        self.parallel_filters = yes;
        self
    }
}
