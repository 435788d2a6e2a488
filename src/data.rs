//! Data rows - key normalization, JSON coercion and delimited text
//!
//! Rows come from a JSON array of objects or from a CSV/TSV sheet with a
//! header line. Either way keys are normalized headers and values are
//! plain strings.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::layout::DataRow;

/// Delimiters recognized when sniffing a sheet, in order of preference.
pub const DELIMITERS: [u8; 3] = [b',', b'\t', b';'];

/// Lines looked at when sniffing.
const SNIFF_LINES: usize = 5;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("Data row {row} must be an object, got {kind}")]
    NotAnObject { row: usize, kind: &'static str },

    #[error("Rows must be a JSON array, got {0}")]
    NotAnArray(&'static str),

    #[error("Failed to read rows from {}: {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Invalid JSON rows: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid delimited rows: {0}")]
    Csv(#[from] csv::Error),
}

/// "  Full Name " -> "full_name"
pub fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase().replace(' ', "_")
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A JSON object as a data row with normalized keys.
pub fn row_from_json(value: &Value) -> Result<DataRow, DataError> {
    row_at(1, value)
}

/// A JSON array of objects as data rows, numbered from 1 in errors.
pub fn rows_from_json(value: &Value) -> Result<Vec<DataRow>, DataError> {
    let Value::Array(items) = value else {
        return Err(DataError::NotAnArray(kind(value)));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| row_at(i + 1, item))
        .collect()
}

/// The delimiter that splits the first lines of `text` into the same
/// non-zero number of cells, preferring the one giving the most cells.
/// Falls back to whichever is most frequent on the header line, then comma.
pub fn sniff_delimiter(text: &str) -> u8 {
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    let count = |line: &str, d: u8| line.bytes().filter(|b| *b == d).count();

    let mut best: Option<(usize, u8)> = None;
    for d in DELIMITERS {
        let Some(first) = lines.first().map(|line| count(line, d)) else {
            break;
        };
        let consistent = first > 0 && lines.iter().all(|line| count(line, d) == first);
        if consistent && best.map_or(true, |(n, _)| first > n) {
            best = Some((first, d));
        }
    }
    if let Some((_, d)) = best {
        return d;
    }

    let header = lines.first().copied().unwrap_or("");
    DELIMITERS
        .into_iter()
        .map(|d| (count(header, d), d))
        .filter(|(n, _)| *n > 0)
        .fold(None, |acc: Option<(usize, u8)>, cur| match acc {
            Some(prev) if prev.0 >= cur.0 => Some(prev),
            _ => Some(cur),
        })
        .map_or(b',', |(_, d)| d)
}

/// Rows of a delimited sheet whose first line holds the headers.
///
/// A leading byte-order mark is dropped, headers are normalized, cells
/// trimmed, and rows with no non-blank cell skipped. Columns with a blank
/// header are ignored. `None` sniffs the delimiter.
pub fn rows_from_csv(text: &str, delimiter: Option<u8>) -> Result<Vec<DataRow>, DataError> {
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(text));
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();
    let mut rows = vec![];
    for record in reader.records() {
        let record = record?;
        let row: DataRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, cell)| (header.clone(), cell.trim().to_string()))
            .collect();
        if row.values().any(|cell| !cell.is_empty()) {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Rows from a `.csv`, `.tsv` or `.json` file; other extensions are read
/// as delimited text with a sniffed delimiter.
pub fn rows_from_file(path: &Path) -> Result<Vec<DataRow>, DataError> {
    let text = fs::read_to_string(path).map_err(|source| DataError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("json") => rows_from_json(&serde_json::from_str(&text)?),
        Some("tsv") => rows_from_csv(&text, Some(b'\t')),
        _ => rows_from_csv(&text, None),
    }
}

fn row_at(row: usize, value: &Value) -> Result<DataRow, DataError> {
    let Value::Object(map) = value else {
        return Err(DataError::NotAnObject { row, kind: kind(value) });
    };
    Ok(map
        .iter()
        .map(|(k, v)| (normalize_header(k), cell_text(v)))
        .collect())
}
