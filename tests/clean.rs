#[path = "common/mod.rs"]
mod common;

use common::*;
use lmdetl::TelemetryEtl;

/// The five-row reference scenario for the cleaning predicates:
/// one row per drop reason plus one survivor, each rejection attributed
/// to its own counter.
#[test]
fn basic_filter_scenario() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");

    write_csv(
        &input,
        TELEMETRY_HEADER,
        &[
            "a,,,0.20,LSK1,false,T1",  // lane contains the SK marker
            "b,10,,0.10,L1,false,T2",  // trailing factor below 0.15
            "c,10,20,0.20,L1,true,T3", // ignore flag set
            "d,,,0.20,L1,false,T4",    // both slope channels empty
            "e,10,20,0.20,L1,false,T5",
        ],
    );

    let report = TelemetryEtl::new().clean_file(&input, &output).unwrap();

    let lines = read_lines(&output);
    assert_eq!(lines.len(), 2, "header plus the single surviving row");
    assert_eq!(lines[0], TELEMETRY_HEADER);
    assert_eq!(lines[1], "e,10,20,0.20,L1,false,T5");

    let drops = report.stats.drops;
    assert_eq!(drops.lane_excluded, 1);
    assert_eq!(drops.trailing_factor, 1);
    assert_eq!(drops.ignore_flag, 1);
    assert_eq!(drops.missing_slopes, 1);
    assert_eq!(drops.duplicate, 0);
    assert_eq!(report.stats.rows_read, 5);
    assert_eq!(report.stats.rows_written, 1);
}

/// Row conservation: reads equal writes plus every accounted drop.
#[test]
fn row_conservation_identity() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");

    let r1 = valid_row("a", "2024-01-01T00:00:01");
    let r2 = valid_row("b", "2024-01-01T00:00:01"); // duplicate timestamp
    write_csv(
        &input,
        TELEMETRY_HEADER,
        &[
            &r1,
            &r2,
            ",,,0.20,L1,false,x",          // empty natural key
            "c,10,20,abc,L1,false,T9",     // malformed trailing factor
            "d,10,20,0.20,L1,false,",      // timestamp cell empty
        ],
    );

    let report = TelemetryEtl::new().clean_file(&input, &output).unwrap();
    let s = report.stats;
    assert_eq!(
        s.rows_read,
        s.rows_written + s.drops.total() + s.rows_failed_canonicalization
    );
    assert_eq!(s.rows_failed_canonicalization, 1);
    assert_eq!(s.drops.empty_key, 1);
    assert_eq!(s.drops.trailing_factor, 1);
    assert_eq!(s.drops.duplicate, 1);
}

/// Cleaning an already-clean file changes nothing: the filters are
/// fixed-points and the output is byte-identical.
#[test]
fn cleaning_is_idempotent() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let once = dir.path().join("once.csv");
    let twice = dir.path().join("twice.csv");

    let rows: Vec<String> = (0..50)
        .map(|i| valid_row(&format!("f{i}"), &format!("2024-01-01T00:00:{:02}", i % 60)))
        .collect();
    let row_refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    write_csv(&input, TELEMETRY_HEADER, &row_refs);

    TelemetryEtl::new().clean_file(&input, &once).unwrap();
    TelemetryEtl::new().clean_file(&once, &twice).unwrap();

    let a = std::fs::read(&once).unwrap();
    let b = std::fs::read(&twice).unwrap();
    assert_eq!(a, b, "second clean must be byte-identical");
}

/// A header-only input yields a header-only output and zero rows written.
#[test]
fn header_only_input() {
    let dir = workdir();
    let input = dir.path().join("empty.csv");
    let output = dir.path().join("clean.csv");
    write_csv(&input, TELEMETRY_HEADER, &[]);

    let report = TelemetryEtl::new().clean_file(&input, &output).unwrap();
    assert_eq!(report.stats.rows_written, 0);
    assert_eq!(read_lines(&output), vec![TELEMETRY_HEADER.to_string()]);
}

/// A trailing factor of exactly 0.15 is kept; just below is dropped.
#[test]
fn trailing_factor_boundary() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");
    write_csv(
        &input,
        TELEMETRY_HEADER,
        &[
            "a,10,20,0.15,L1,false,T1",
            "b,10,20,0.14999999,L1,false,T2",
        ],
    );

    let report = TelemetryEtl::new().clean_file(&input, &output).unwrap();
    assert_eq!(report.stats.rows_written, 1);
    assert_eq!(report.stats.drops.trailing_factor, 1);
    let lines = read_lines(&output);
    assert!(lines[1].starts_with("a,"));
}

/// Zero or empty slope-symmetry denominators drop the row; a healthy
/// ratio at the threshold survives.
#[test]
fn slope_symmetry_predicate() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");
    let header = "Filename,tsdSlopeMinY,tsdSlopeMaxY,TestDateUTC";
    write_csv(
        &input,
        header,
        &[
            "a,-0.15,1.0,T1", // ratio exactly 0.15: kept
            "b,-0.10,1.0,T2", // ratio 0.10: dropped
            "c,-0.50,0,T3",   // zero denominator: dropped
            "d,-0.50,,T4",    // missing denominator: dropped
            "e,,1.0,T5",      // missing numerator: kept
        ],
    );

    let report = TelemetryEtl::new().clean_file(&input, &output).unwrap();
    assert_eq!(report.stats.drops.slope_symmetry, 3);
    let lines = read_lines(&output);
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("a,"));
    assert!(lines[2].starts_with("e,"));
}

/// Semicolon-delimited input with a UTF-8 BOM is detected and re-emitted
/// as plain comma-delimited UTF-8.
#[test]
fn dialect_normalization() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
    bytes.extend_from_slice(b"Filename;RawSlope170;RawSlope270;TestDateUTC\n");
    bytes.extend_from_slice(b"a;10;20;T1\n");
    std::fs::write(&input, bytes).unwrap();

    let report = TelemetryEtl::new().clean_file(&input, &output).unwrap();
    assert_eq!(report.stats.rows_written, 1);

    let raw = std::fs::read(&output).unwrap();
    assert!(!raw.starts_with(&[0xEF, 0xBB, 0xBF]), "no BOM in output");
    let lines = read_lines(&output);
    assert_eq!(lines[0], "Filename,RawSlope170,RawSlope270,TestDateUTC");
    assert_eq!(lines[1], "a,10,20,T1");
}

/// Quoted fields holding delimiters survive the round trip intact.
#[test]
fn quoting_round_trip() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");
    write_csv(
        &input,
        "Filename,Note,TestDateUTC",
        &[r#"a,"hello, ""world""",T1"#],
    );

    let report = TelemetryEtl::new().clean_file(&input, &output).unwrap();
    assert_eq!(report.stats.rows_written, 1);
    let lines = read_lines(&output);
    assert_eq!(lines[1], r#"a,"hello, ""world""",T1"#);
}
