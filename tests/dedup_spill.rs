#[path = "common/mod.rs"]
mod common;

use common::*;
use lmdetl::{canonical_key, TelemetryEtl};

/// Two otherwise-valid rows with the same timestamp: the first is kept,
/// the second drops under the duplicate counter.
#[test]
fn dedup_within_file() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");
    let r1 = valid_row("a", "2024-03-01T10:00:00");
    let r2 = valid_row("b", "2024-03-01T10:00:00");
    write_csv(&input, TELEMETRY_HEADER, &[&r1, &r2]);

    let report = TelemetryEtl::new().clean_file(&input, &output).unwrap();
    assert_eq!(report.stats.rows_written, 1);
    assert_eq!(report.stats.drops.duplicate, 1);
    let lines = read_lines(&output);
    assert!(lines[1].starts_with("a,"), "first occurrence wins");
}

/// Key canonicalization: trim, one trailing Z stripped, fractional seconds
/// truncated to milliseconds. Values differing only in those details are
/// duplicates.
#[test]
fn canonical_key_rules() {
    assert_eq!(
        canonical_key(" 2024-01-01T00:00:00.1234567Z "),
        Some("2024-01-01T00:00:00.123".to_string())
    );
    assert_eq!(
        canonical_key("2024-01-01T00:00:00.123"),
        Some("2024-01-01T00:00:00.123".to_string())
    );
    assert_eq!(
        canonical_key("2024-01-01T00:00:00Z"),
        Some("2024-01-01T00:00:00".to_string())
    );
    // Short fractions are preserved as-is.
    assert_eq!(
        canonical_key("2024-01-01T00:00:00.5"),
        Some("2024-01-01T00:00:00.5".to_string())
    );
    // Non-digit tails are not fractional seconds.
    assert_eq!(
        canonical_key("01/03/2024 10:00:00"),
        Some("01/03/2024 10:00:00".to_string())
    );
    assert_eq!(canonical_key("   "), None);
}

/// Rows whose keys canonicalize identically dedup against each other even
/// when the raw strings differ.
#[test]
fn dedup_on_canonical_form() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");
    let r1 = valid_row("a", "2024-03-01T10:00:00.123456Z");
    let r2 = valid_row("b", "2024-03-01T10:00:00.123");
    write_csv(&input, TELEMETRY_HEADER, &[&r1, &r2]);

    let report = TelemetryEtl::new().clean_file(&input, &output).unwrap();
    assert_eq!(report.stats.rows_written, 1);
    assert_eq!(report.stats.drops.duplicate, 1);
}

/// Feeding `max_mem_keys + 1` distinct keys triggers exactly one
/// memory-to-disk transition with zero loss of membership: every distinct
/// key survives, duplicates straddling the spill are still caught.
#[test]
fn spill_transition_preserves_membership() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");

    let mut rows: Vec<String> = (0..1001)
        .map(|i| valid_row(&format!("f{i}"), &format!("2024-01-01T{:02}:{:02}:{:02}", i / 3600, (i / 60) % 60, i % 60)))
        .collect();
    // Duplicates of keys inserted before the spill, probed after it.
    rows.push(valid_row("dup0", "2024-01-01T00:00:00"));
    rows.push(valid_row("dup1", "2024-01-01T00:00:01"));
    let row_refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    write_csv(&input, TELEMETRY_HEADER, &row_refs);

    let report = TelemetryEtl::new()
        .max_mem_keys(1000)
        .chunk_bounds(100, 200)
        .chunk_size(100)
        // Pin the chunk size: this test is about the spill, not the
        // adaptive policy reacting to whatever the host is doing.
        .memory_thresholds(0.0, 1.0, 1.0)
        .clean_file(&input, &output)
        .unwrap();

    assert_eq!(report.stats.dedup_spills, 1, "exactly one spill transition");
    assert_eq!(report.stats.rows_written, 1001);
    assert_eq!(report.stats.drops.duplicate, 2);
    assert_eq!(read_lines(&output).len(), 1002);
}

/// Below the cap the set never spills.
#[test]
fn no_spill_below_cap() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");
    let rows: Vec<String> = (0..100)
        .map(|i| valid_row(&format!("f{i}"), &format!("2024-01-01T00:{:02}:{:02}", i / 60, i % 60)))
        .collect();
    let row_refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    write_csv(&input, TELEMETRY_HEADER, &row_refs);

    let report = TelemetryEtl::new()
        .max_mem_keys(1000)
        .clean_file(&input, &output)
        .unwrap();
    assert_eq!(report.stats.dedup_spills, 0);
    assert_eq!(report.stats.rows_written, 100);
}

/// Files without the timestamp column are filtered but never deduplicated.
#[test]
fn no_timestamp_column_no_dedup() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");
    write_csv(
        &input,
        "Filename,Value",
        &["a,1", "a,1", "b,2"],
    );

    let report = TelemetryEtl::new().clean_file(&input, &output).unwrap();
    assert_eq!(report.stats.rows_written, 3);
    assert_eq!(report.stats.drops.duplicate, 0);
}
