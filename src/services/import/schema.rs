//! Structural CSV check: header normalization and the required column set.

use csv::ReaderBuilder;
use tracing::debug;

use super::error::SchemaError;
use crate::types::{Column, ImportRow, ImportTable};

/// Lowercase, join words with underscores.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .replace(' ', "_")
}

/// Empty and whitespace-only cells count as missing.
fn normalize_cell(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn unreadable(err: impl std::fmt::Display) -> SchemaError {
    SchemaError::Unreadable {
        message: err.to_string(),
    }
}

/// Parse CSV bytes into a normalized table.
///
/// Fails when the file cannot be read or a required column is absent.
/// Blank rows are dropped, but every kept row remembers its original
/// position among the data records.
pub fn parse_table(bytes: &[u8]) -> Result<ImportTable, SchemaError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers().map_err(unreadable)?.clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(unreadable("CSV file has no header row"));
    }

    // First occurrence wins when a normalized name repeats.
    let mut positions: Vec<(Column, usize)> = Vec::new();
    for (pos, header) in headers.iter().enumerate() {
        if let Some(column) = Column::from_header(&normalize_header(header)) {
            if !positions.iter().any(|(c, _)| *c == column) {
                positions.push((column, pos));
            }
        }
    }

    let missing: Vec<String> = Column::REQUIRED
        .iter()
        .filter(|required| !positions.iter().any(|(c, _)| c == *required))
        .map(|c| c.as_str().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SchemaError::MissingColumns { missing });
    }

    let mut table = ImportTable::default();
    for (row_index, record) in reader.records().enumerate() {
        let record = record.map_err(unreadable)?;
        table.records_read += 1;

        let mut row = ImportRow::new(row_index);
        for (column, pos) in &positions {
            row.set(*column, record.get(*pos).and_then(normalize_cell));
        }
        if !row.is_blank() {
            table.rows.push(row);
        }
    }

    debug!(
        records = table.records_read,
        kept = table.rows.len(),
        "CSV schema check passed"
    );
    Ok(table)
}
