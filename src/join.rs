//! Column-add: enrich a Details file with columns looked up from an LMD
//! file by canonical timestamp. Left outer join — every Details row is
//! emitted exactly once, in input order, with empty carry cells when the
//! LMD side has no match.

use crate::dedup::canonical_key;
use crate::error::{EngineError, Result};
use crate::header::{probe_header, ColumnSet, TIMESTAMP_COLUMN};
use crate::index::{build_index, IndexProber};
use crate::job::JobContext;
use crate::paths::{display_name, validate_path, PathRole};
use crate::process::{open_reader, read_chunk, ChunkPolicy};
use crate::progress::ProgressEvent;
use crate::util::classify_io;
use crate::writer::{ensure_same_filesystem, finalize_staging, ChunkWriter};
use csv::StringRecord;
use std::path::Path;

pub(crate) fn run_add_columns(
    ctx: &mut JobContext,
    lmd_path: &Path,
    details_path: &Path,
    carry_columns: &[String],
) -> Result<()> {
    if carry_columns.is_empty() {
        return Err(EngineError::InvalidInput(
            "no carry columns were requested".into(),
        ));
    }
    let lmd_path = validate_path(lmd_path, PathRole::Input, &ctx.cfg)?;
    let details_path = validate_path(details_path, PathRole::Input, &ctx.cfg)?;

    let lmd_probe = probe_header(&lmd_path)?;
    let details_probe = probe_header(&details_path)?;
    let details_ts = details_probe
        .columns
        .index_of(TIMESTAMP_COLUMN)
        .ok_or_else(|| {
            EngineError::InvalidInput(format!(
                "'{}' has no {TIMESTAMP_COLUMN} column to join on",
                display_name(&details_path)
            ))
        })?;
    for name in carry_columns {
        if details_probe.columns.contains(name) {
            return Err(EngineError::InvalidInput(format!(
                "carry column '{name}' already exists in the Details file"
            )));
        }
    }

    let total_bytes = details_path.metadata().map_err(classify_io)?.len();
    ctx.emit(ProgressEvent::Start {
        input: display_name(&details_path),
        total_bytes,
    });

    ensure_same_filesystem(ctx.temp_dir(), &ctx.output)?;

    ctx.emit(ProgressEvent::Stage {
        name: "build index".to_string(),
    });
    let index = build_index(ctx, &lmd_path, &lmd_probe, carry_columns)?;
    tracing::info!(
        entries = index.entries(),
        "index built; streaming the Details file"
    );

    // Output schema: Details columns, then carry columns in request order.
    let out_columns = ColumnSet::from_names(
        details_probe
            .columns
            .names()
            .iter()
            .map(String::as_str)
            .chain(carry_columns.iter().map(String::as_str)),
    );

    let mut writer = ChunkWriter::create(
        ctx.temp_path("staging_output.csv"),
        &out_columns,
        ctx.cfg.write_buffer_bytes,
    )?;
    let mut prober = IndexProber::open(&index, ctx.cfg.read_buffer_bytes)?;

    let mut rdr = open_reader(&details_path, &details_probe, ctx.cfg.read_buffer_bytes)?;
    let mut policy = ChunkPolicy::new(&ctx.cfg);
    let mut scratch = StringRecord::new();
    let details_arity = details_probe.columns.len();
    let file_bytes = total_bytes.max(1);

    loop {
        ctx.check_interrupted()?;
        let target = policy.next_chunk_rows()?;
        let rows = read_chunk(&mut rdr, details_arity, target, &mut scratch)?;
        if rows.is_empty() {
            break;
        }
        ctx.stats.rows_read += rows.len() as u64;

        let mut enriched = Vec::with_capacity(rows.len());
        for row in rows {
            let carry = match canonical_key(row.get(details_ts).unwrap_or("")) {
                Some(key) => prober.get(&key)?,
                None => None,
            };
            enriched.push(extend_row(row, carry, carry_columns.len()));
        }

        writer.append(&enriched)?;
        ctx.stats.rows_written += enriched.len() as u64;

        let bytes_read = rdr.position().byte();
        ctx.emit(ProgressEvent::Chunk {
            rows_read: ctx.stats.rows_read,
            rows_written: ctx.stats.rows_written,
            fraction: (bytes_read as f64 / file_bytes as f64).min(1.0),
        });
    }

    let staging = writer.finish()?;
    ctx.emit(ProgressEvent::Stage {
        name: "finalize".to_string(),
    });
    finalize_staging(&staging, &ctx.output, out_columns.len(), ctx.cfg.max_backups)?;
    ctx.stats.files_processed = 2;
    Ok(())
}

/// Append carry values (or empty cells for an unmatched row) to a Details
/// row, in the caller-requested column order.
fn extend_row(row: StringRecord, carry: Option<Vec<String>>, carry_len: usize) -> StringRecord {
    let mut out = row;
    match carry {
        Some(values) => {
            for v in values {
                out.push_field(&v);
            }
        }
        None => {
            for _ in 0..carry_len {
                out.push_field("");
            }
        }
    }
    out
}
