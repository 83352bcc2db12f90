//! Path validation and input discovery. Inputs are screened for extension,
//! size, and basic sanity before any processing starts; folder merges
//! enumerate their inputs in a deterministic lexicographic order.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::util::classify_io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What a path is used for; validation rules differ per role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathRole {
    Input,
    InputDir,
    Output,
}

/// Validate `path` for `role` and return its canonical form.
pub fn validate_path(path: &Path, role: PathRole, cfg: &EngineConfig) -> Result<PathBuf> {
    match role {
        PathRole::Input => {
            let meta = path.metadata().map_err(classify_io)?;
            if !meta.is_file() {
                return Err(EngineError::InvalidInput(format!(
                    "'{}' is not a regular file",
                    display_name(path)
                )));
            }
            if !extension_allowed(path, cfg) {
                return Err(EngineError::InvalidInput(format!(
                    "'{}' does not have an accepted extension ({})",
                    display_name(path),
                    cfg.allowed_extensions.join(", ")
                )));
            }
            if meta.len() > cfg.max_file_bytes {
                return Err(EngineError::InvalidInput(format!(
                    "'{}' exceeds the configured size limit",
                    display_name(path)
                )));
            }
            if meta.len() == 0 {
                return Err(EngineError::EmptyInput);
            }
            path.canonicalize().map_err(classify_io)
        }
        PathRole::InputDir => {
            let meta = path.metadata().map_err(classify_io)?;
            if !meta.is_dir() {
                return Err(EngineError::InvalidInput(format!(
                    "'{}' is not a directory",
                    display_name(path)
                )));
            }
            path.canonicalize().map_err(classify_io)
        }
        PathRole::Output => {
            let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
            let Some(parent) = parent else {
                return Err(EngineError::InvalidInput(
                    "output path has no parent directory".into(),
                ));
            };
            if !parent.is_dir() {
                return Err(EngineError::InvalidInput(format!(
                    "output directory '{}' does not exist",
                    display_name(parent)
                )));
            }
            let canonical_parent = parent.canonicalize().map_err(classify_io)?;
            Ok(canonical_parent.join(path.file_name().unwrap_or_default()))
        }
    }
}

/// Enumerate processable files directly inside `dir`, sorted by file name.
/// Oversized or wrong-extension entries are skipped with a log line rather
/// than failing the whole merge.
pub fn enumerate_inputs(dir: &Path, cfg: &EngineConfig) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            EngineError::InvalidInput(format!("cannot enumerate input directory: {e}"))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !extension_allowed(path, cfg) {
            continue;
        }
        match path.metadata() {
            Ok(m) if m.len() > cfg.max_file_bytes => {
                tracing::warn!(file = %display_name(path), "skipping oversized input");
            }
            Ok(m) if m.len() == 0 => {
                tracing::warn!(file = %display_name(path), "skipping empty input");
            }
            Ok(_) => files.push(path.to_path_buf()),
            Err(e) => return Err(classify_io(e)),
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    if files.is_empty() {
        return Err(EngineError::EmptyInput);
    }
    Ok(files)
}

fn extension_allowed(path: &Path, cfg: &EngineConfig) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    cfg.allowed_extensions.iter().any(|a| *a == ext)
}

/// File name only; error messages never leak absolute paths.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "<unnamed>".to_string())
}
