//! Staged CSV output: chunks are appended to a staging file inside the job
//! temp directory, then promoted to the final path with backup rotation,
//! an atomic same-filesystem rename, and a post-rename verification pass.

use crate::error::{EngineError, Result};
use crate::header::ColumnSet;
use crate::util::{
    classify_io, create_with_retry, is_cross_device, open_with_retry, remove_with_retry,
    rename_with_retry, replace_file_atomic,
};
use csv::StringRecord;
use std::fs;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const BACKUP_TS: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]");

/// Append-only writer over one staging file. Output is always UTF-8,
/// comma-delimited, `\n`-terminated, regardless of the input dialect.
pub struct ChunkWriter {
    staging: PathBuf,
    wtr: Option<csv::Writer<BufWriter<File>>>,
}

impl ChunkWriter {
    /// Staging writer that begins with the header row.
    pub fn create(staging: PathBuf, columns: &ColumnSet, write_buf: usize) -> Result<Self> {
        let mut w = Self::open(staging, write_buf)?;
        if let Some(wtr) = w.wtr.as_mut() {
            wtr.write_record(columns.names())?;
        }
        Ok(w)
    }

    /// Headerless staging writer, used for folder-merge parts that are
    /// later concatenated under a single header.
    pub fn create_part(staging: PathBuf, write_buf: usize) -> Result<Self> {
        Self::open(staging, write_buf)
    }

    fn open(staging: PathBuf, write_buf: usize) -> Result<Self> {
        let file = create_with_retry(&staging).map_err(classify_io)?;
        let wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::with_capacity(write_buf, file));
        Ok(Self {
            staging,
            wtr: Some(wtr),
        })
    }

    /// Append rows in order; append order is exactly output order.
    pub fn append(&mut self, rows: &[StringRecord]) -> Result<()> {
        let wtr = self
            .wtr
            .as_mut()
            .ok_or_else(|| EngineError::Internal("append after finish".into()))?;
        for row in rows {
            wtr.write_record(row)?;
        }
        Ok(())
    }

    /// Flush and close the staging file, returning its path.
    pub fn finish(mut self) -> Result<PathBuf> {
        if let Some(wtr) = self.wtr.take() {
            let mut inner = wtr
                .into_inner()
                .map_err(|e| EngineError::Internal(format!("flush staging: {e}")))?;
            inner.flush().map_err(classify_io)?;
        }
        Ok(self.staging.clone())
    }
}

/// Verify that staging and output live on the same filesystem by renaming a
/// marker file across the boundary. Called once at job setup, before any
/// data is written.
pub fn ensure_same_filesystem(staging_dir: &Path, output: &Path) -> Result<()> {
    let Some(out_dir) = output.parent() else {
        return Err(EngineError::InvalidInput("output path has no parent".into()));
    };
    let marker = staging_dir.join(".fsprobe");
    let target = out_dir.join(format!(".lmdetl_fsprobe_{}", std::process::id()));
    create_with_retry(&marker).map_err(classify_io)?;
    let moved = fs::rename(&marker, &target);
    match moved {
        Ok(()) => {
            remove_with_retry(&target).map_err(classify_io)?;
            Ok(())
        }
        Err(e) => {
            let _ = remove_with_retry(&marker);
            if is_cross_device(&e) {
                Err(EngineError::CrossFilesystemStaging)
            } else {
                Err(classify_io(e))
            }
        }
    }
}

/// Promote a finished staging file to the output path:
/// 1. move any pre-existing output to a timestamped backup,
/// 2. atomically rename the staging file into place,
/// 3. re-open the result and verify the header arity, restoring the
///    backup on mismatch.
///
/// Returns the backup path, if one was made.
pub fn finalize_staging(
    staging: &Path,
    output: &Path,
    expected_arity: usize,
    max_backups: usize,
) -> Result<Option<PathBuf>> {
    let backup = if output.exists() {
        Some(rotate_backup(output, max_backups)?)
    } else {
        None
    };

    if let Err(e) = replace_file_atomic(staging, output) {
        let err = if is_cross_device(&e) {
            EngineError::CrossFilesystemStaging
        } else {
            classify_io(e)
        };
        restore_backup(backup.as_deref(), output);
        return Err(err);
    }

    if let Err(e) = verify_output(output, expected_arity) {
        restore_backup(backup.as_deref(), output);
        return Err(e);
    }
    Ok(backup)
}

/// Rename the current output aside as `<stem>_backup_<YYYYMMDDThhmmss>.<ext>`
/// and prune the oldest backups beyond the retention count.
fn rotate_backup(output: &Path, max_backups: usize) -> Result<PathBuf> {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = output
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = output.parent().unwrap_or_else(|| Path::new("."));

    let ts = OffsetDateTime::now_utc()
        .format(BACKUP_TS)
        .map_err(|e| EngineError::Internal(format!("format backup timestamp: {e}")))?;

    // Rapid successive overwrites land in the same second; uniquify.
    let mut candidate = dir.join(backup_name(&stem, &ts, &ext, 0));
    let mut n = 1usize;
    while candidate.exists() {
        n += 1;
        candidate = dir.join(backup_name(&stem, &ts, &ext, n));
    }

    rename_with_retry(output, &candidate).map_err(classify_io)?;
    tracing::info!(backup = %crate::paths::display_name(&candidate), "moved previous output aside");
    prune_backups(dir, &stem, &ext, max_backups);
    Ok(candidate)
}

fn backup_name(stem: &str, ts: &str, ext: &str, n: usize) -> String {
    let suffix = if n == 0 { String::new() } else { format!("-{n}") };
    if ext.is_empty() {
        format!("{stem}_backup_{ts}{suffix}")
    } else {
        format!("{stem}_backup_{ts}{suffix}.{ext}")
    }
}

/// Keep the `max_backups` newest backups for this output; delete the rest,
/// oldest first. Backup names embed their timestamp, so lexicographic
/// order is chronological.
fn prune_backups(dir: &Path, stem: &str, ext: &str, max_backups: usize) {
    let prefix = format!("{stem}_backup_");
    let Ok(entries) = fs::read_dir(dir) else { return };
    let mut backups: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let ext_matches = match (ext.is_empty(), p.extension().and_then(|e| e.to_str())) {
                (true, None) => true,
                (false, Some(e)) => e == ext,
                _ => false,
            };
            name.starts_with(&prefix) && ext_matches && p.is_file()
        })
        .collect();
    backups.sort();
    if backups.len() > max_backups {
        let excess = backups.len() - max_backups;
        for old in &backups[..excess] {
            if let Err(e) = remove_with_retry(old) {
                tracing::warn!(backup = %crate::paths::display_name(old), error = %e, "failed to prune old backup");
            }
        }
    }
}

fn restore_backup(backup: Option<&Path>, output: &Path) {
    if let Some(backup) = backup {
        if let Err(e) = fs::copy(backup, output) {
            tracing::error!(error = %e, "failed to restore output from backup");
        }
    }
}

/// Re-open the finalized file and confirm the header has the arity the job
/// promised. Catches truncated or interleaved writes before the caller
/// trusts the output.
fn verify_output(output: &Path, expected_arity: usize) -> Result<()> {
    let file = open_with_retry(output).map_err(classify_io)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(file);
    let headers = rdr
        .headers()
        .map_err(|e| EngineError::OutputVerificationFailed(format!("unreadable header: {e}")))?;
    if headers.len() != expected_arity {
        return Err(EngineError::OutputVerificationFailed(format!(
            "expected {expected_arity} columns, found {}",
            headers.len()
        )));
    }
    Ok(())
}
