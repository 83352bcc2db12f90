//! Folder merge: clean every CSV in a directory into one output with
//! cross-file deduplication. Files are processed in lexicographic order
//! and must all share the first file's column layout.

use crate::dedup::DedupSet;
use crate::error::{EngineError, Result};
use crate::filters::FilterSet;
use crate::header::{probe_header, HeaderProbe, TIMESTAMP_COLUMN};
use crate::job::JobContext;
use crate::paths::{display_name, enumerate_inputs, validate_path, PathRole};
use crate::process::process_file;
use crate::progress::ProgressEvent;
use crate::util::{classify_io, create_with_retry, open_with_retry};
use crate::writer::{ensure_same_filesystem, finalize_staging, ChunkWriter};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub(crate) fn run_merge(ctx: &mut JobContext, dir: &Path) -> Result<()> {
    let dir = validate_path(dir, PathRole::InputDir, &ctx.cfg)?;
    let files = enumerate_inputs(&dir, &ctx.cfg)?;

    let total_bytes: u64 = files
        .iter()
        .map(|f| f.metadata().map(|m| m.len()).unwrap_or(0))
        .sum();
    ctx.emit(ProgressEvent::Start {
        input: display_name(&dir),
        total_bytes,
    });

    ensure_same_filesystem(ctx.temp_dir(), &ctx.output)?;

    // The first file defines the schema; every other file must match it
    // column-for-column or the whole merge is rejected.
    let first_probe = probe_header(&files[0])?;
    let mut probes: Vec<HeaderProbe> = Vec::with_capacity(files.len());
    probes.push(first_probe.clone());
    for file in &files[1..] {
        let probe = probe_header(file)?;
        if !probe.columns.same_as(&first_probe.columns) {
            return Err(EngineError::SchemaMismatch {
                file: display_name(file),
                divergent: first_probe.columns.divergence(&probe.columns),
            });
        }
        probes.push(probe);
    }

    let filters = FilterSet::from_columns(&first_probe.columns)
        .with_parallelism(ctx.cfg.parallel_filters);
    // One shared set across all files, so cross-file duplicates are
    // dropped as they occur.
    let mut dedup = first_probe
        .columns
        .index_of(TIMESTAMP_COLUMN)
        .map(|_| DedupSet::new(ctx.cfg.max_mem_keys, ctx.temp_path("dedup_spill.db")));

    let mut parts: Vec<PathBuf> = Vec::with_capacity(files.len());
    for (i, (file, probe)) in files.iter().zip(&probes).enumerate() {
        ctx.check_interrupted()?;
        ctx.emit(ProgressEvent::Stage {
            name: format!("file {}/{}: {}", i + 1, files.len(), display_name(file)),
        });
        let mut part = ChunkWriter::create_part(
            ctx.temp_path(&format!("part_{i:04}.csv")),
            ctx.cfg.write_buffer_bytes,
        )?;
        process_file(ctx, file, probe, &filters, dedup.as_mut(), &mut part)?;
        parts.push(part.finish()?);
        ctx.stats.files_processed += 1;
    }

    ctx.emit(ProgressEvent::Stage {
        name: "concatenate".to_string(),
    });
    let staging = ctx.temp_path("staging_output.csv");
    concat_parts(&staging, &first_probe.columns, &parts, ctx.cfg.write_buffer_bytes)?;

    ctx.emit(ProgressEvent::Stage {
        name: "finalize".to_string(),
    });
    finalize_staging(
        &staging,
        &ctx.output,
        first_probe.columns.len(),
        ctx.cfg.max_backups,
    )?;
    Ok(())
}

/// Write the header once, then byte-copy the headerless part bodies in
/// enumeration order.
fn concat_parts(
    staging: &Path,
    columns: &crate::header::ColumnSet,
    parts: &[PathBuf],
    write_buf: usize,
) -> Result<()> {
    let file = create_with_retry(staging).map_err(classify_io)?;
    let buf = BufWriter::with_capacity(write_buf, file);
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(buf);
    wtr.write_record(columns.names())?;
    let mut out = wtr
        .into_inner()
        .map_err(|e| EngineError::Internal(format!("flush merge header: {e}")))?;

    for part in parts {
        let mut rdr = BufReader::new(open_with_retry(part).map_err(classify_io)?);
        io::copy(&mut rdr, &mut out).map_err(classify_io)?;
    }
    out.flush().map_err(classify_io)?;
    Ok(())
}
