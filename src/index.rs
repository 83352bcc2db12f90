//! Join index for column-add: an external sort of
//! `(canonical key, source row, carry values)` tuples into one sorted run
//! file, plus a sparse in-memory block index for cheap probing.
//!
//! Phase 1 streams the LMD file into memory-bounded sorted runs; phase 2
//! k-way merges the runs, keeping the first occurrence of each key. All
//! artifacts live in the job temp directory.

use crate::dedup::canonical_key;
use crate::error::{EngineError, Result};
use crate::header::{HeaderProbe, TIMESTAMP_COLUMN};
use crate::job::JobContext;
use crate::paths::display_name;
use crate::process::open_reader;
use crate::progress::ProgressEvent;
use crate::util::{classify_io, create_with_retry, open_with_retry, remove_with_retry};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Records per sparse-index block. One block is the unit of linear scan
/// during a probe, so it bounds per-lookup work.
const BLOCK_ROWS: usize = 4096;

/// Rows between cancellation checks while scanning the source.
const CANCEL_EVERY: u64 = 8192;

#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    k: String,
    r: u64,
    c: Vec<String>,
}

/// A finished, sorted index: one NDJSON file ordered by key with unique
/// keys, and one in-memory entry per block holding (first key, offset).
pub(crate) struct SortedIndex {
    path: PathBuf,
    blocks: Vec<(String, u64)>,
    entries: u64,
}

impl SortedIndex {
    pub(crate) fn entries(&self) -> u64 {
        self.entries
    }
}

/// Build the index over `lmd_path` for the requested carry columns.
pub(crate) fn build_index(
    ctx: &mut JobContext,
    lmd_path: &Path,
    probe: &HeaderProbe,
    carry_columns: &[String],
) -> Result<SortedIndex> {
    let ts_idx = probe.columns.index_of(TIMESTAMP_COLUMN).ok_or_else(|| {
        EngineError::InvalidInput(format!(
            "'{}' has no {TIMESTAMP_COLUMN} column to index on",
            display_name(lmd_path)
        ))
    })?;
    let carry_idx: Vec<usize> = carry_columns
        .iter()
        .map(|name| {
            probe.columns.index_of(name).ok_or_else(|| {
                EngineError::InvalidInput(format!(
                    "carry column '{name}' not present in '{}'",
                    display_name(lmd_path)
                ))
            })
        })
        .collect::<Result<_>>()?;

    let runs = build_runs(ctx, lmd_path, probe, ts_idx, &carry_idx)?;
    merge_runs(ctx, &runs)
}

/// Phase 1: memory-bounded sorted runs.
fn build_runs(
    ctx: &mut JobContext,
    lmd_path: &Path,
    probe: &HeaderProbe,
    ts_idx: usize,
    carry_idx: &[usize],
) -> Result<Vec<PathBuf>> {
    let mut rdr = open_reader(lmd_path, probe, ctx.cfg.read_buffer_bytes)?;
    let mut record = csv::StringRecord::new();

    let mut buffer: Vec<IndexRecord> = Vec::with_capacity(64_000);
    let mut buffered_bytes: usize = 0;
    let mut runs: Vec<PathBuf> = Vec::new();
    let mut row: u64 = 0;

    loop {
        if row % CANCEL_EVERY == 0 {
            ctx.check_interrupted()?;
        }
        if !rdr.read_record(&mut record)? {
            break;
        }
        row += 1;
        let Some(key) = canonical_key(record.get(ts_idx).unwrap_or("")) else {
            continue;
        };
        let carry: Vec<String> = carry_idx
            .iter()
            .map(|&i| record.get(i).unwrap_or("").to_string())
            .collect();
        buffered_bytes += key.len() + carry.iter().map(|c| c.len() + 8).sum::<usize>() + 32;
        buffer.push(IndexRecord { k: key, r: row, c: carry });

        if buffered_bytes >= ctx.cfg.index_run_bytes {
            flush_run(ctx, &mut buffer, &mut runs)?;
            buffered_bytes = 0;
        }
    }
    if !buffer.is_empty() {
        flush_run(ctx, &mut buffer, &mut runs)?;
    }
    tracing::debug!(runs = runs.len(), rows = row, "index runs built");
    Ok(runs)
}

fn flush_run(
    ctx: &mut JobContext,
    buffer: &mut Vec<IndexRecord>,
    runs: &mut Vec<PathBuf>,
) -> Result<()> {
    buffer.sort_by(|a, b| a.k.cmp(&b.k).then(a.r.cmp(&b.r)));
    let path = ctx.temp_path(&format!("index_run_{:04}.ndjson", runs.len() + 1));
    let file = create_with_retry(&path).map_err(classify_io)?;
    let mut w = BufWriter::with_capacity(ctx.cfg.write_buffer_bytes, file);
    for rec in buffer.drain(..) {
        let line = serde_json::to_string(&rec)
            .map_err(|e| EngineError::IndexBuildFailed(format!("encode run record: {e}")))?;
        w.write_all(line.as_bytes()).map_err(classify_io)?;
        w.write_all(b"\n").map_err(classify_io)?;
    }
    w.flush().map_err(classify_io)?;
    runs.push(path);
    ctx.emit(ProgressEvent::Stage {
        name: format!("index run {}", runs.len()),
    });
    Ok(())
}

struct HeapItem {
    key: String,
    row: u64,
    run_idx: usize,
    line: String,
}
impl Eq for HeapItem {}
impl PartialEq for HeapItem {
    fn eq(&self, o: &Self) -> bool {
        self.key == o.key && self.run_idx == o.run_idx
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; run order is row order, so the tie-break
        // keeps the globally-first occurrence of a key in front.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.run_idx.cmp(&self.run_idx))
            .then_with(|| other.row.cmp(&self.row))
    }
}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, o: &Self) -> Option<Ordering> {
        Some(self.cmp(o))
    }
}

/// Phase 2: k-way merge into the final sorted file, first occurrence wins,
/// block index recorded as it goes.
fn merge_runs(ctx: &mut JobContext, runs: &[PathBuf]) -> Result<SortedIndex> {
    let out_path = ctx.temp_path("index_sorted.ndjson");
    let file = create_with_retry(&out_path).map_err(classify_io)?;
    let mut out = BufWriter::with_capacity(ctx.cfg.write_buffer_bytes, file);

    let mut readers: Vec<BufReader<File>> = Vec::with_capacity(runs.len());
    for p in runs {
        readers.push(BufReader::with_capacity(
            ctx.cfg.read_buffer_bytes,
            open_with_retry(p).map_err(classify_io)?,
        ));
    }

    let mut heap: BinaryHeap<HeapItem> = BinaryHeap::new();
    for i in 0..readers.len() {
        if let Some(item) = next_item(&mut readers[i], i)? {
            heap.push(item);
        }
    }

    let mut blocks: Vec<(String, u64)> = Vec::new();
    let mut entries: u64 = 0;
    let mut offset: u64 = 0;
    let mut last_key: Option<String> = None;

    while let Some(top) = heap.pop() {
        if entries % CANCEL_EVERY == 0 {
            ctx.check_interrupted()?;
        }
        let run_idx = top.run_idx;
        // Duplicate keys across or within runs: only the first survives.
        if last_key.as_deref() != Some(top.key.as_str()) {
            if entries % BLOCK_ROWS as u64 == 0 {
                blocks.push((top.key.clone(), offset));
            }
            out.write_all(top.line.as_bytes()).map_err(classify_io)?;
            out.write_all(b"\n").map_err(classify_io)?;
            offset += top.line.len() as u64 + 1;
            entries += 1;
            last_key = Some(top.key);
        }
        if let Some(item) = next_item(&mut readers[run_idx], run_idx)? {
            heap.push(item);
        }
    }
    out.flush().map_err(classify_io)?;

    // Runs are merged; reclaim their disk space before the join starts.
    for p in runs {
        let _ = remove_with_retry(p);
    }

    tracing::debug!(entries, blocks = blocks.len(), "join index ready");
    Ok(SortedIndex {
        path: out_path,
        blocks,
        entries,
    })
}

fn next_item(rdr: &mut BufReader<File>, run_idx: usize) -> Result<Option<HeapItem>> {
    let mut line = String::new();
    let n = rdr.read_line(&mut line).map_err(classify_io)?;
    if n == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    if line.is_empty() {
        return next_item(rdr, run_idx);
    }
    let rec: IndexRecord = serde_json::from_str(&line)
        .map_err(|e| EngineError::IndexBuildFailed(format!("decode run record: {e}")))?;
    Ok(Some(HeapItem {
        key: rec.k,
        row: rec.r,
        run_idx,
        line,
    }))
}

/// Streaming probe handle over a `SortedIndex`: binary search the block
/// index, then linearly scan at most one block.
pub(crate) struct IndexProber<'a> {
    index: &'a SortedIndex,
    rdr: BufReader<File>,
}

impl<'a> IndexProber<'a> {
    pub(crate) fn open(index: &'a SortedIndex, read_buf: usize) -> Result<Self> {
        let file = open_with_retry(&index.path).map_err(classify_io)?;
        Ok(Self {
            index,
            rdr: BufReader::with_capacity(read_buf, file),
        })
    }

    /// Carry values for `key`, or `None` when the LMD side has no match.
    pub(crate) fn get(&mut self, key: &str) -> Result<Option<Vec<String>>> {
        let pos = self
            .index
            .blocks
            .partition_point(|(first, _)| first.as_str() <= key);
        if pos == 0 {
            return Ok(None);
        }
        let (_, block_offset) = &self.index.blocks[pos - 1];
        self.rdr
            .seek(SeekFrom::Start(*block_offset))
            .map_err(classify_io)?;

        let mut line = String::new();
        for _ in 0..BLOCK_ROWS {
            line.clear();
            let n = self.rdr.read_line(&mut line).map_err(classify_io)?;
            if n == 0 {
                break;
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            let rec: IndexRecord = serde_json::from_str(trimmed)
                .map_err(|e| EngineError::IndexBuildFailed(format!("decode index record: {e}")))?;
            match rec.k.as_str().cmp(key) {
                Ordering::Equal => return Ok(Some(rec.c)),
                Ordering::Greater => return Ok(None),
                Ordering::Less => {}
            }
        }
        Ok(None)
    }
}
