//! Single-file streaming pipeline: probe → chunked read → filter → dedup →
//! write → finalize, with memory-adaptive chunk sizing.

use crate::dedup::{canonical_key, DedupSet};
use crate::error::{EngineError, Result};
use crate::filters::{DropReason, FilterSet};
use crate::frame::normalize_arity;
use crate::header::{probe_header, HeaderProbe, TIMESTAMP_COLUMN};
use crate::job::{JobContext, JobStats};
use crate::mem;
use crate::paths::{display_name, validate_path, PathRole};
use crate::progress::ProgressEvent;
use crate::util::{classify_io, open_with_retry};
use crate::writer::{ensure_same_filesystem, finalize_staging, ChunkWriter};
use csv::StringRecord;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Chunk sizes halve under memory pressure and double again after three
/// consecutive comfortable chunks. The size never changes mid-chunk, and a
/// hard cap breach at the floor fails the job before another chunk is read.
pub(crate) struct ChunkPolicy {
    size: usize,
    min: usize,
    max: usize,
    low_watermark: f64,
    high_watermark: f64,
    hard_cap: f64,
    low_streak: u32,
}

impl ChunkPolicy {
    pub(crate) fn new(cfg: &crate::config::EngineConfig) -> Self {
        Self {
            size: cfg.chunk_size.clamp(cfg.min_chunk_size, cfg.max_chunk_size),
            min: cfg.min_chunk_size,
            max: cfg.max_chunk_size,
            low_watermark: cfg.low_watermark,
            high_watermark: cfg.high_watermark,
            hard_cap: cfg.hard_cap,
            low_streak: 0,
        }
    }

    /// Row budget for the next chunk, re-evaluated between chunks only.
    pub(crate) fn next_chunk_rows(&mut self) -> Result<usize> {
        let util = mem::utilization();
        if util > self.hard_cap && self.size <= self.min {
            return Err(EngineError::OutOfMemoryBudget);
        }
        if util > self.high_watermark {
            self.size = (self.size / 2).max(self.min);
            self.low_streak = 0;
        } else if util < self.low_watermark {
            self.low_streak += 1;
            if self.low_streak >= 3 {
                self.size = (self.size * 2).min(self.max);
                self.low_streak = 0;
            }
        } else {
            self.low_streak = 0;
        }
        Ok(self.size)
    }
}

/// CSV reader positioned after the header, BOM skipped, dialect applied.
pub(crate) fn open_reader(
    path: &Path,
    probe: &HeaderProbe,
    read_buf: usize,
) -> Result<csv::Reader<BufReader<File>>> {
    let mut file = open_with_retry(path).map_err(classify_io)?;
    let mut bom = [0u8; 3];
    let n = file.read(&mut bom).map_err(classify_io)?;
    if n < 3 || bom != [0xEF, 0xBB, 0xBF] {
        file.seek(SeekFrom::Start(0)).map_err(classify_io)?;
    }
    Ok(csv::ReaderBuilder::new()
        .delimiter(probe.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::with_capacity(read_buf, file)))
}

/// Read up to `max_rows` records, normalized to the column arity.
/// Blank lines are skipped. Returns an empty vec at EOF.
pub(crate) fn read_chunk(
    rdr: &mut csv::Reader<BufReader<File>>,
    arity: usize,
    max_rows: usize,
    scratch: &mut StringRecord,
) -> Result<Vec<StringRecord>> {
    let mut rows = Vec::with_capacity(max_rows.min(4096));
    while rows.len() < max_rows {
        if !rdr.read_record(scratch)? {
            break;
        }
        if scratch.len() == 1 && scratch.get(0) == Some("") {
            continue;
        }
        rows.push(normalize_arity(scratch, arity));
    }
    Ok(rows)
}

/// Run one file through filter + dedup into `writer`. Used directly by the
/// single-file cleaner and per-file by the folder merger (which passes a
/// shared dedup set).
pub(crate) fn process_file(
    ctx: &mut JobContext,
    input: &Path,
    probe: &HeaderProbe,
    filters: &FilterSet,
    mut dedup: Option<&mut DedupSet>,
    writer: &mut ChunkWriter,
) -> Result<()> {
    let file_bytes = input.metadata().map_err(classify_io)?.len().max(1);
    let ts_idx = probe.columns.index_of(TIMESTAMP_COLUMN);
    let arity = probe.columns.len();

    let mut rdr = open_reader(input, probe, ctx.cfg.read_buffer_bytes)?;
    let mut policy = ChunkPolicy::new(&ctx.cfg);
    let mut scratch = StringRecord::new();

    loop {
        ctx.check_interrupted()?;
        let target = policy.next_chunk_rows()?;
        let rows = read_chunk(&mut rdr, arity, target, &mut scratch)?;
        if rows.is_empty() {
            break;
        }
        ctx.stats.rows_read += rows.len() as u64;

        let kept = filters.apply(rows, &mut ctx.stats.drops);

        let survivors = match (ts_idx, dedup.as_deref_mut()) {
            (Some(idx), Some(set)) => {
                let before = set.spill_transitions();
                let out = dedup_rows(kept, idx, set, &mut ctx.stats)?;
                if set.spill_transitions() > before {
                    ctx.stats.dedup_spills = set.spill_transitions();
                    ctx.emit(ProgressEvent::Stage {
                        name: "dedup-spill".to_string(),
                    });
                }
                out
            }
            _ => kept,
        };

        writer.append(&survivors)?;
        ctx.stats.rows_written += survivors.len() as u64;

        let bytes_read = rdr.position().byte();
        ctx.emit(ProgressEvent::Chunk {
            rows_read: ctx.stats.rows_read,
            rows_written: ctx.stats.rows_written,
            fraction: (bytes_read as f64 / file_bytes as f64).min(1.0),
        });
    }
    Ok(())
}

/// Membership-filter a chunk against the dedup set. Rows whose key cell is
/// empty cannot be canonicalized and are counted separately from predicate
/// drops and duplicates.
fn dedup_rows(
    rows: Vec<StringRecord>,
    key_idx: usize,
    set: &mut DedupSet,
    stats: &mut JobStats,
) -> Result<Vec<StringRecord>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        match canonical_key(row.get(key_idx).unwrap_or("")) {
            None => stats.rows_failed_canonicalization += 1,
            Some(key) => {
                if set.contains_or_insert(&key)? {
                    stats.drops.record(DropReason::Duplicate);
                } else {
                    out.push(row);
                }
            }
        }
    }
    Ok(out)
}

/// Clean one file into the job's output path.
pub(crate) fn run_clean(ctx: &mut JobContext, input: &Path) -> Result<()> {
    let input = validate_path(input, PathRole::Input, &ctx.cfg)?;
    let probe = probe_header(&input)?;
    let total_bytes = input.metadata().map_err(classify_io)?.len();
    ctx.emit(ProgressEvent::Start {
        input: display_name(&input),
        total_bytes,
    });

    ensure_same_filesystem(ctx.temp_dir(), &ctx.output)?;

    let filters = FilterSet::from_columns(&probe.columns)
        .with_parallelism(ctx.cfg.parallel_filters);
    let mut dedup = probe
        .columns
        .index_of(TIMESTAMP_COLUMN)
        .map(|_| DedupSet::new(ctx.cfg.max_mem_keys, ctx.temp_path("dedup_spill.db")));

    let mut writer = ChunkWriter::create(
        ctx.temp_path("staging_output.csv"),
        &probe.columns,
        ctx.cfg.write_buffer_bytes,
    )?;

    process_file(ctx, &input, &probe, &filters, dedup.as_mut(), &mut writer)?;

    let staging = writer.finish()?;
    ctx.emit(ProgressEvent::Stage {
        name: "finalize".to_string(),
    });
    finalize_staging(
        &staging,
        &ctx.output,
        probe.columns.len(),
        ctx.cfg.max_backups,
    )?;
    ctx.stats.files_processed = 1;
    Ok(())
}
