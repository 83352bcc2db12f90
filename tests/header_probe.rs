#[path = "common/mod.rs"]
mod common;

use common::*;
use lmdetl::{
    detect_file_kind, probe_header, EngineError, FileKind, InputEncoding, TIMESTAMP_COLUMN,
};

/// Each delimiter candidate is detected from a plain header line.
#[test]
fn delimiter_detection() {
    let dir = workdir();
    for (delim, byte) in [(",", b','), (";", b';'), ("\t", b'\t'), ("|", b'|')] {
        let path = dir.path().join(format!("d{}.csv", byte));
        std::fs::write(&path, format!("A{delim}B{delim}C\n1{delim}2{delim}3\n")).unwrap();
        let probe = probe_header(&path).unwrap();
        assert_eq!(probe.delimiter, byte, "delimiter {delim:?}");
        assert_eq!(probe.columns.names(), ["A", "B", "C"]);
    }
}

/// A BOM selects the utf-8-sig encoding and is stripped from the first
/// column name.
#[test]
fn bom_detection() {
    let dir = workdir();
    let path = dir.path().join("bom.csv");
    let mut bytes = vec![0xEF, 0xBB, 0xBF];
    bytes.extend_from_slice(b"A,B\n");
    std::fs::write(&path, bytes).unwrap();

    let probe = probe_header(&path).unwrap();
    assert_eq!(probe.encoding, InputEncoding::Utf8Sig);
    assert_eq!(probe.columns.names(), ["A", "B"]);

    let plain = dir.path().join("plain.csv");
    std::fs::write(&plain, "A,B\n").unwrap();
    assert_eq!(probe_header(&plain).unwrap().encoding, InputEncoding::Utf8);
}

/// A file with bytes but no usable header line is unreadable; a zero-byte
/// file is empty.
#[test]
fn unreadable_and_empty_headers() {
    let dir = workdir();
    let blank = dir.path().join("blank.csv");
    std::fs::write(&blank, "\n\n\n").unwrap();
    assert!(matches!(
        probe_header(&blank).unwrap_err(),
        EngineError::HeaderUnreadable
    ));

    let empty = dir.path().join("empty.csv");
    std::fs::write(&empty, b"").unwrap();
    assert!(matches!(
        probe_header(&empty).unwrap_err(),
        EngineError::EmptyInput
    ));
}

/// Repeated header names are disambiguated so positional lookups stay
/// unique; the first occurrence keeps the bare name.
#[test]
fn duplicate_header_names() {
    let dir = workdir();
    let path = dir.path().join("dup.csv");
    std::fs::write(&path, "Lane,Lane,Lane\n1,2,3\n").unwrap();

    let probe = probe_header(&path).unwrap();
    assert_eq!(probe.columns.names(), ["Lane", "Lane_2", "Lane_3"]);
    assert_eq!(probe.columns.index_of("Lane"), Some(0));
    assert_eq!(probe.columns.index_of("Lane_3"), Some(2));
}

/// Quoted header fields containing delimiters parse as single columns.
#[test]
fn quoted_header_fields() {
    let dir = workdir();
    let path = dir.path().join("quoted.csv");
    std::fs::write(&path, "\"Start Chainage (km)\",\"Note, free text\",TestDateUTC\n").unwrap();

    let probe = probe_header(&path).unwrap();
    assert_eq!(probe.delimiter, b',');
    assert_eq!(
        probe.columns.names(),
        ["Start Chainage (km)", "Note, free text", TIMESTAMP_COLUMN]
    );
}

/// File-kind sniffing recognizes telemetry, lane-fix, and workbrief
/// layouts by their marker columns.
#[test]
fn file_kind_detection() {
    let dir = workdir();

    let lmd = dir.path().join("lmd.csv");
    std::fs::write(&lmd, "Filename,TestDateUTC,Lane\n").unwrap();
    let probe = probe_header(&lmd).unwrap();
    assert_eq!(detect_file_kind(&probe.columns), FileKind::Telemetry);

    let fixes = dir.path().join("fixes.csv");
    std::fs::write(&fixes, "From,To,Lane,Ignore,Plate\n").unwrap();
    let probe = probe_header(&fixes).unwrap();
    assert_eq!(detect_file_kind(&probe.columns), FileKind::LaneFixes);

    let brief = dir.path().join("brief.csv");
    std::fs::write(&brief, "RoadName,Lane,Start Chainage (km)\n").unwrap();
    let probe = probe_header(&brief).unwrap();
    assert_eq!(detect_file_kind(&probe.columns), FileKind::Workbrief);

    let other = dir.path().join("other.csv");
    std::fs::write(&other, "X,Y,Z\n").unwrap();
    let probe = probe_header(&other).unwrap();
    assert_eq!(detect_file_kind(&probe.columns), FileKind::Unknown);
}
