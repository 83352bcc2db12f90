//! Timestamp-keyed membership set with a one-way spill from memory to an
//! embedded SQLite store once the working set exceeds the configured cap.
//!
//! The set is owned by exactly one pipeline at a time. Once spilled it never
//! returns to memory form; the backing file lives in the job's temp
//! directory and disappears with it.

use crate::error::{EngineError, Result};
use ahash::AHashSet;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Normalize a raw timestamp cell into the canonical dedup/join key:
/// trim, strip one trailing `Z`, truncate fractional seconds beyond
/// millisecond resolution. Returns `None` for empty cells, which cannot
/// participate in dedup or join.
pub fn canonical_key(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.strip_suffix('Z').unwrap_or(s);
    if let Some(dot) = s.rfind('.') {
        let frac = &s[dot + 1..];
        if frac.len() > 3 && frac.bytes().all(|b| b.is_ascii_digit()) {
            return Some(format!("{}.{}", &s[..dot], &frac[..3]));
        }
    }
    Some(s.to_string())
}

enum State {
    Mem(AHashSet<String>),
    Spill(SpillStore),
}

pub struct DedupSet {
    state: State,
    spill_path: PathBuf,
    max_mem_keys: usize,
    spill_transitions: u32,
}

impl DedupSet {
    /// `spill_path` names the SQLite file that will back the set if it
    /// outgrows `max_mem_keys`; nothing is created until the transition.
    pub fn new(max_mem_keys: usize, spill_path: PathBuf) -> Self {
        Self {
            state: State::Mem(AHashSet::with_capacity(64_000)),
            spill_path,
            max_mem_keys: max_mem_keys.max(1),
            spill_transitions: 0,
        }
    }

    /// Returns true if `key` was already a member (caller drops the row),
    /// false if it was newly inserted. Insertion is idempotent.
    pub fn contains_or_insert(&mut self, key: &str) -> Result<bool> {
        let must_spill = match &self.state {
            State::Mem(set) => !set.contains(key) && set.len() >= self.max_mem_keys,
            State::Spill(_) => false,
        };
        if must_spill {
            self.spill()?;
        }
        match &mut self.state {
            State::Mem(set) => {
                if set.contains(key) {
                    Ok(true)
                } else {
                    set.insert(key.to_string());
                    Ok(false)
                }
            }
            State::Spill(store) => store.contains_or_insert(key),
        }
    }

    /// Number of memory-to-disk transitions (0 or 1 by construction).
    pub fn spill_transitions(&self) -> u32 {
        self.spill_transitions
    }

    /// Copy every in-memory key into a fresh store under one transaction.
    /// A failed transition is fatal; the half-written store is removed.
    fn spill(&mut self) -> Result<()> {
        let State::Mem(set) = std::mem::replace(&mut self.state, State::Mem(AHashSet::new()))
        else {
            return Err(EngineError::Internal("spill from non-memory state".into()));
        };
        tracing::info!(
            keys = set.len(),
            "dedup set reached its memory cap; migrating to disk store"
        );
        match SpillStore::create(&self.spill_path, &set) {
            Ok(store) => {
                self.state = State::Spill(store);
                self.spill_transitions += 1;
                Ok(())
            }
            Err(e) => {
                let _ = crate::util::remove_with_retry(&self.spill_path);
                Err(EngineError::DedupSpillFailed(e.to_string()))
            }
        }
    }
}

/// Disk-backed unique store. One table, one primary key, no row data.
struct SpillStore {
    conn: Connection,
}

impl SpillStore {
    fn create(path: &Path, seed: &AHashSet<String>) -> rusqlite::Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.pragma_update(None, "cache_size", -64_000)?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS seen (key TEXT PRIMARY KEY) WITHOUT ROWID;",
        )?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO seen (key) VALUES (?1)")?;
            for key in seed {
                stmt.execute([key.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(Self { conn })
    }

    /// One indexed upsert per probe; a no-op insert means the key existed.
    /// Transient store errors are retried once before failing the job.
    fn contains_or_insert(&mut self, key: &str) -> Result<bool> {
        match self.try_insert(key) {
            Ok(inserted) => Ok(!inserted),
            Err(e) if is_transient(&e) => match self.try_insert(key) {
                Ok(inserted) => Ok(!inserted),
                Err(e) => Err(EngineError::DedupSpillFailed(e.to_string())),
            },
            Err(e) => Err(EngineError::DedupSpillFailed(e.to_string())),
        }
    }

    fn try_insert(&mut self, key: &str) -> rusqlite::Result<bool> {
        let changed = self
            .conn
            .execute("INSERT OR IGNORE INTO seen (key) VALUES (?1)", [key])?;
        Ok(changed > 0)
    }
}

fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}
