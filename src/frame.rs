//! Typed views over raw CSV rows. The engine keeps cells as strings and
//! coerces lazily: a predicate that never runs never pays for a parse.

use csv::StringRecord;

/// Null tokens produced by the capture tooling. Cells holding one of these
/// are treated as absent by numeric views.
const NULL_TOKENS: [&str; 3] = ["∞", "inf", "-inf"];

/// Outcome of coercing one cell to a float. `Missing` and `Invalid` are
/// deliberately distinct: a blank cell is data that was never captured,
/// while garbage in a numeric column is unsafe to keep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Num {
    Missing,
    Invalid,
    Value(f64),
}

/// Borrowed view of a single row. Cell positions come from the resolved
/// `ColumnSet` indices held by the caller.
#[derive(Clone, Copy)]
pub struct RowView<'a> {
    row: &'a StringRecord,
}

impl<'a> RowView<'a> {
    pub fn new(row: &'a StringRecord) -> Self {
        Self { row }
    }

    /// Raw text of the cell at `idx`; `None` when the record is short.
    pub fn text(&self, idx: usize) -> Option<&'a str> {
        self.row.get(idx)
    }

    /// True when the cell is present and non-empty.
    pub fn has_value(&self, idx: usize) -> bool {
        self.row.get(idx).map_or(false, |s| !s.is_empty())
    }

    /// Lazily coerce the cell at `idx` to a float.
    pub fn num(&self, idx: usize) -> Num {
        let Some(raw) = self.row.get(idx) else {
            return Num::Missing;
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() || NULL_TOKENS.contains(&trimmed) {
            return Num::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Num::Value(v),
            _ => Num::Invalid,
        }
    }
}

/// Normalize a record to the column arity: ragged rows are padded with
/// empty cells or truncated, mirroring how the capture tooling emits them.
pub fn normalize_arity(record: &StringRecord, arity: usize) -> StringRecord {
    if record.len() == arity {
        return record.clone();
    }
    let mut out = StringRecord::with_capacity(record.as_slice().len(), arity);
    for i in 0..arity {
        out.push_field(record.get(i).unwrap_or(""));
    }
    out
}
