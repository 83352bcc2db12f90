#[path = "common/mod.rs"]
mod common;

use common::*;
use lmdetl::{ProgressEvent, TelemetryEtl};
use std::sync::mpsc;

/// Compact trace of the event stream a callback observes.
fn event_tag(event: &ProgressEvent) -> &'static str {
    match event {
        ProgressEvent::Start { .. } => "start",
        ProgressEvent::Chunk { .. } => "chunk",
        ProgressEvent::Stage { .. } => "stage",
        ProgressEvent::Done { .. } => "done",
        ProgressEvent::Error { .. } => "error",
    }
}

/// A successful clean emits start, at least one chunk, the finalize
/// stage, and done — in that order, with byte-based fractions that never
/// decrease.
#[test]
fn event_sequence_for_clean() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");
    let rows: Vec<String> = (0..300)
        .map(|i| valid_row(&format!("f{i}"), &format!("2024-01-01T00:{:02}:{:02}", i / 60, i % 60)))
        .collect();
    let row_refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    write_csv(&input, TELEMETRY_HEADER, &row_refs);

    let (tx, rx) = mpsc::channel();
    TelemetryEtl::new()
        .chunk_bounds(100, 100)
        .chunk_size(100)
        .memory_thresholds(0.0, 1.0, 1.0)
        .on_progress(move |event| {
            let fraction = match event {
                ProgressEvent::Chunk { fraction, .. } => Some(*fraction),
                _ => None,
            };
            tx.send((event_tag(event), fraction)).unwrap();
        })
        .clean_file(&input, &output)
        .unwrap();

    let events: Vec<(&str, Option<f64>)> = rx.try_iter().collect();
    let tags: Vec<&str> = events.iter().map(|(t, _)| *t).collect();

    assert_eq!(tags.first(), Some(&"start"));
    assert_eq!(tags.last(), Some(&"done"));
    assert_eq!(tags.iter().filter(|t| **t == "chunk").count(), 3);
    assert!(tags.contains(&"stage"), "finalize stage event expected");
    assert!(!tags.contains(&"error"));

    let fractions: Vec<f64> = events.iter().filter_map(|(_, f)| *f).collect();
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
}

/// A failing job ends its event stream with an error event instead of
/// done.
#[test]
fn error_event_on_failure() {
    let dir = workdir();
    let input = dir.path().join("broken.csv");
    let output = dir.path().join("clean.csv");
    std::fs::write(&input, "\n\n").unwrap();

    let (tx, rx) = mpsc::channel();
    let failure = TelemetryEtl::new()
        .on_progress(move |event| tx.send(event_tag(event)).unwrap())
        .clean_file(&input, &output)
        .unwrap_err();
    assert!(!failure.correlation_id.is_empty());

    let tags: Vec<&str> = rx.try_iter().collect();
    assert_eq!(tags.last(), Some(&"error"));
    assert!(!tags.contains(&"done"));
}

/// Cancellation mid-run stops within a chunk boundary: fewer chunk events
/// than the input would produce, and no output file.
#[test]
fn cancel_mid_run() {
    let dir = workdir();
    let input = dir.path().join("lmd.csv");
    let output = dir.path().join("clean.csv");
    let rows: Vec<String> = (0..500)
        .map(|i| valid_row(&format!("f{i}"), &format!("2024-01-01T00:{:02}:{:02}", i / 60, i % 60)))
        .collect();
    let row_refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    write_csv(&input, TELEMETRY_HEADER, &row_refs);

    let engine = TelemetryEtl::new()
        .chunk_bounds(100, 100)
        .chunk_size(100)
        .memory_thresholds(0.0, 1.0, 1.0);
    let token = engine.cancel_token();
    let failure = engine
        .on_progress(move |event| {
            // Cancel as soon as the first chunk completes.
            if matches!(event, ProgressEvent::Chunk { .. }) {
                token.set();
            }
        })
        .clean_file(&input, &output)
        .unwrap_err();

    assert!(matches!(failure.error, lmdetl::EngineError::Cancelled));
    assert!(failure.stats.rows_read < 500, "stopped before reading everything");
    assert!(!output.exists());
    assert_eq!(temp_dirs_next_to(&output), 0);
}
