#![allow(dead_code)]

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// The column layout used by most fixtures; matches a trimmed-down LMD
/// telemetry export.
pub const TELEMETRY_HEADER: &str =
    "Filename,RawSlope170,RawSlope270,TrailingFactor,Lane,Ignore,TestDateUTC";

/// Write a CSV file from a header line and raw data lines.
pub fn write_csv(path: &Path, header: &str, rows: &[&str]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut f = File::create(path).unwrap();
    writeln!(f, "{header}").unwrap();
    for row in rows {
        writeln!(f, "{row}").unwrap();
    }
}

/// Read a text file into non-empty lines.
pub fn read_lines(path: &Path) -> Vec<String> {
    let f = File::open(path).unwrap();
    BufReader::new(f)
        .lines()
        .map(|l| l.unwrap())
        .filter(|s| !s.is_empty())
        .collect()
}

/// A row that survives every cleaning predicate.
pub fn valid_row(name: &str, ts: &str) -> String {
    format!("{name},10,20,0.20,L1,false,{ts}")
}

/// Fresh working directory for one test. The returned guard removes the
/// directory when dropped.
pub fn workdir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

/// Count `.lmdetl_tmp_*` leftovers next to an output path; crash-safety
/// tests assert this is zero after every job.
pub fn temp_dirs_next_to(output: &Path) -> usize {
    let parent = output.parent().unwrap();
    fs::read_dir(parent)
        .unwrap()
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with(".lmdetl_tmp_")
        })
        .count()
}

/// Backups made for `output`, sorted by name.
pub fn backups_of(output: &Path) -> Vec<PathBuf> {
    let stem = output.file_stem().unwrap().to_string_lossy().into_owned();
    let prefix = format!("{stem}_backup_");
    let mut found: Vec<PathBuf> = fs::read_dir(output.parent().unwrap())
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect();
    found.sort();
    found
}
