//! The fixed cleaning predicates applied to every telemetry chunk.
//!
//! Predicates run in a fixed order chosen to reject the cheapest rows first.
//! A predicate whose columns are absent from the input is a no-op. Each
//! rejection is tallied under its own counter so a run can be audited.

use crate::frame::{Num, RowView};
use crate::header::ColumnSet;
use csv::StringRecord;
use rayon::prelude::*;

const MIN_TRAILING_FACTOR: f64 = 0.15;
const MIN_SLOPE_RATIO: f64 = 0.15;
const LANE_EXCLUDE_MARKER: &str = "SK";

/// Why a row was removed from the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    EmptyKey,
    MissingSlopes,
    TrailingFactor,
    SlopeSymmetry,
    LaneExcluded,
    IgnoreFlag,
    Duplicate,
}

/// Per-reason drop counters for one job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DropTally {
    pub empty_key: u64,
    pub missing_slopes: u64,
    pub trailing_factor: u64,
    pub slope_symmetry: u64,
    pub lane_excluded: u64,
    pub ignore_flag: u64,
    pub duplicate: u64,
}

impl DropTally {
    pub fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::EmptyKey => self.empty_key += 1,
            DropReason::MissingSlopes => self.missing_slopes += 1,
            DropReason::TrailingFactor => self.trailing_factor += 1,
            DropReason::SlopeSymmetry => self.slope_symmetry += 1,
            DropReason::LaneExcluded => self.lane_excluded += 1,
            DropReason::IgnoreFlag => self.ignore_flag += 1,
            DropReason::Duplicate => self.duplicate += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.empty_key
            + self.missing_slopes
            + self.trailing_factor
            + self.slope_symmetry
            + self.lane_excluded
            + self.ignore_flag
            + self.duplicate
    }
}

/// Column indices resolved once per file; `None` disables a predicate.
#[derive(Clone, Debug)]
pub struct FilterSet {
    slope_170: Option<usize>,
    slope_270: Option<usize>,
    trailing: Option<usize>,
    slope_min_y: Option<usize>,
    slope_max_y: Option<usize>,
    lane: Option<usize>,
    ignore: Option<usize>,
    /// Evaluate rows in parallel for chunks at least this large.
    parallel_threshold: Option<usize>,
}

impl FilterSet {
    pub fn from_columns(columns: &ColumnSet) -> Self {
        // The slope-presence predicate only applies when both columns exist;
        // same for the symmetry pair.
        let (slope_170, slope_270) = match (
            columns.index_of("RawSlope170"),
            columns.index_of("RawSlope270"),
        ) {
            (Some(a), Some(b)) => (Some(a), Some(b)),
            _ => (None, None),
        };
        let (slope_min_y, slope_max_y) = match (
            columns.index_of("tsdSlopeMinY"),
            columns.index_of("tsdSlopeMaxY"),
        ) {
            (Some(a), Some(b)) => (Some(a), Some(b)),
            _ => (None, None),
        };
        Self {
            slope_170,
            slope_270,
            trailing: columns.index_of("TrailingFactor"),
            slope_min_y,
            slope_max_y,
            lane: columns.index_of("Lane"),
            ignore: columns.index_of("Ignore"),
            parallel_threshold: Some(16_384),
        }
    }

    pub fn with_parallelism(mut self, enabled: bool) -> Self {
        self.parallel_threshold = if enabled { Some(16_384) } else { None };
        self
    }

    /// First predicate that rejects the row, or `None` to keep it.
    pub fn evaluate(&self, row: &RowView) -> Option<DropReason> {
        // 1. The natural key (first column) must carry a value.
        if !row.has_value(0) {
            return Some(DropReason::EmptyKey);
        }

        // 2. Lanes flagged with the exclusion marker are calibration passes.
        if let Some(idx) = self.lane {
            if row
                .text(idx)
                .map_or(false, |v| v.contains(LANE_EXCLUDE_MARKER))
            {
                return Some(DropReason::LaneExcluded);
            }
        }

        // 3. At least one of the raw slope channels must be populated.
        if let (Some(a), Some(b)) = (self.slope_170, self.slope_270) {
            if !row.has_value(a) && !row.has_value(b) {
                return Some(DropReason::MissingSlopes);
            }
        }

        // 4. Trailing factor below threshold is noise; so is garbage text
        //    in the column, which is indistinguishable from out-of-range.
        if let Some(idx) = self.trailing {
            match row.num(idx) {
                Num::Missing => {}
                Num::Invalid => return Some(DropReason::TrailingFactor),
                Num::Value(v) => {
                    if v < MIN_TRAILING_FACTOR {
                        return Some(DropReason::TrailingFactor);
                    }
                }
            }
        }

        // 5. Slope symmetry: |minY| / maxY must reach the threshold.
        //    A zero or unreadable maxY denominator drops the row.
        if let (Some(min_idx), Some(max_idx)) = (self.slope_min_y, self.slope_max_y) {
            match row.num(max_idx) {
                Num::Value(max_y) if max_y != 0.0 => {
                    if let Num::Value(min_y) = row.num(min_idx) {
                        if (min_y.abs() / max_y) < MIN_SLOPE_RATIO {
                            return Some(DropReason::SlopeSymmetry);
                        }
                    }
                }
                _ => return Some(DropReason::SlopeSymmetry),
            }
        }

        // 6. Operator-set ignore flag.
        if let Some(idx) = self.ignore {
            if let Some(v) = row.text(idx) {
                let v = v.trim().to_lowercase();
                if v == "true" || v == "1" || v == "yes" {
                    return Some(DropReason::IgnoreFlag);
                }
            }
        }

        None
    }

    /// Filter a chunk in place, recording every rejection in `tally`.
    /// Surviving rows keep their input order.
    pub fn apply(&self, rows: Vec<StringRecord>, tally: &mut DropTally) -> Vec<StringRecord> {
        let use_parallel = self
            .parallel_threshold
            .map_or(false, |t| rows.len() >= t);

        let verdicts: Vec<Option<DropReason>> = if use_parallel {
            rows.par_iter()
                .map(|r| self.evaluate(&RowView::new(r)))
                .collect()
        } else {
            rows.iter()
                .map(|r| self.evaluate(&RowView::new(r)))
                .collect()
        };

        let mut kept = Vec::with_capacity(rows.len());
        for (row, verdict) in rows.into_iter().zip(verdicts) {
            match verdict {
                Some(reason) => tally.record(reason),
                None => kept.push(row),
            }
        }
        kept
    }
}
