//! Header probe: sniff delimiter and encoding from the first 64 KiB of a
//! file and derive the ordered column list everything downstream trusts.

use crate::error::{EngineError, Result};
use crate::util::{classify_io, open_with_retry};
use ahash::AHashMap;
use std::io::Read;
use std::path::Path;

/// Canonical timestamp column used for dedup and join keys.
pub const TIMESTAMP_COLUMN: &str = "TestDateUTC";

/// The probe never reads more than this many bytes.
const PROBE_BYTES: usize = 64 * 1024;

/// Delimiter candidates, in tie-break order.
const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Detected input encoding. Output is always plain UTF-8 without BOM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEncoding {
    Utf8,
    Utf8Sig,
}

/// Ordered, unique column names derived from a header row.
/// Every emitted row has exactly this arity in this order.
#[derive(Clone, Debug)]
pub struct ColumnSet {
    names: Vec<String>,
    by_name: AHashMap<String, usize>,
}

impl ColumnSet {
    /// Builds a column set, disambiguating repeated header names by
    /// suffixing `_2`, `_3`, ... so positional lookups stay unambiguous.
    pub fn from_names<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = Vec::new();
        let mut by_name: AHashMap<String, usize> = AHashMap::new();
        for field in raw {
            let base = field.as_ref().to_string();
            let mut name = base.clone();
            let mut n = 2usize;
            while by_name.contains_key(&name) {
                name = format!("{base}_{n}");
                n += 1;
            }
            by_name.insert(name.clone(), names.len());
            names.push(name);
        }
        Self { names, by_name }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Column names present here but not in `other`, and vice versa.
    /// Used to describe schema mismatches.
    pub fn divergence(&self, other: &ColumnSet) -> Vec<String> {
        let mut out: Vec<String> = self
            .names
            .iter()
            .filter(|n| !other.contains(n))
            .cloned()
            .collect();
        out.extend(other.names.iter().filter(|n| !self.contains(n)).cloned());
        out
    }

    pub fn same_as(&self, other: &ColumnSet) -> bool {
        self.names == other.names
    }
}

/// Result of probing a file's header.
#[derive(Clone, Debug)]
pub struct HeaderProbe {
    pub columns: ColumnSet,
    pub delimiter: u8,
    pub encoding: InputEncoding,
}

/// Read the first line of `path`, detect encoding and delimiter, and parse
/// the header fields. Fails with `HeaderUnreadable` when no combination
/// yields a non-empty column list.
pub fn probe_header(path: &Path) -> Result<HeaderProbe> {
    let mut file = open_with_retry(path).map_err(classify_io)?;
    let mut buf = vec![0u8; PROBE_BYTES];
    let mut filled = 0usize;
    loop {
        let n = file.read(&mut buf[filled..]).map_err(classify_io)?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == buf.len() || buf[..filled].contains(&b'\n') {
            break;
        }
    }
    buf.truncate(filled);

    if buf.is_empty() {
        return Err(EngineError::EmptyInput);
    }

    // A byte-order mark always wins the encoding decision.
    let (encoding, body) = if buf.starts_with(&UTF8_BOM) {
        (InputEncoding::Utf8Sig, &buf[UTF8_BOM.len()..])
    } else {
        (InputEncoding::Utf8, &buf[..])
    };

    let line_bytes = match body.iter().position(|&b| b == b'\n') {
        Some(pos) => &body[..pos],
        None => body,
    };
    let line_bytes = line_bytes.strip_suffix(b"\r").unwrap_or(line_bytes);

    // Lossy decode tolerates stray code-page bytes in otherwise-sane headers.
    let (line, _, _) = encoding_rs::UTF_8.decode(line_bytes);
    let line = line.into_owned();
    if line.trim().is_empty() {
        return Err(EngineError::HeaderUnreadable);
    }

    let delimiter = pick_delimiter(&line);
    let fields = split_header(&line, delimiter)?;
    if fields.is_empty() || fields.iter().all(|f| f.trim().is_empty()) {
        return Err(EngineError::HeaderUnreadable);
    }

    Ok(HeaderProbe {
        columns: ColumnSet::from_names(fields),
        delimiter,
        encoding,
    })
}

/// Choose the candidate that splits the header into the most fields,
/// considering only candidates producing at least two. Falls back to comma
/// for genuine single-column files.
fn pick_delimiter(line: &str) -> u8 {
    let mut best: Option<(u8, usize)> = None;
    for &delim in &DELIMITERS {
        let count = match split_header(line, delim) {
            Ok(fields) => fields.len(),
            Err(_) => continue,
        };
        if count >= 2 && best.map_or(true, |(_, c)| count > c) {
            best = Some((delim, count));
        }
    }
    best.map_or(b',', |(d, _)| d)
}

/// Split one header line with full CSV quoting rules.
fn split_header(line: &str, delimiter: u8) -> Result<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    let got = rdr.read_record(&mut record)?;
    if !got {
        return Ok(Vec::new());
    }
    Ok(record.iter().map(|s| s.to_string()).collect())
}

/// Rough classification of a telemetry input by its marker columns. The
/// engine only cleans telemetry files; side files from the capture tooling
/// are recognized so callers can reject them with a useful message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Telemetry,
    LaneFixes,
    Workbrief,
    Unknown,
}

pub fn detect_file_kind(columns: &ColumnSet) -> FileKind {
    let lane_fix_markers = ["From", "To", "Lane", "Ignore"];
    if lane_fix_markers.iter().all(|c| columns.contains(c)) {
        return FileKind::LaneFixes;
    }
    let telemetry_markers = [
        TIMESTAMP_COLUMN,
        "BinViewerVersion",
        "tsdSlope2000",
        "compositeModulus200",
    ];
    if telemetry_markers.iter().any(|c| columns.contains(c)) {
        return FileKind::Telemetry;
    }
    if columns.contains("RoadName") && columns.contains("Lane") && columns.len() < 20 {
        return FileKind::Workbrief;
    }
    FileKind::Unknown
}
