//! Semantic checks applied to every row of a schema-valid table.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::error::RowValidationError;
use crate::types::{Column, ImportRow, ImportTable, ValidatedRow};

/// Maximum comma-separated segments in `subjects_taught`.
pub const MAX_SUBJECTS: usize = 5;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@]+@[^@]+\.[^@]+$").expect("valid email regex")
});

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+\d{1,3}-\d{3}-\d{3}-\d{3}$").expect("valid phone regex")
});

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn is_valid_phone(value: &str) -> bool {
    PHONE_RE.is_match(value)
}

/// Rows that passed, plus every violation found.
#[derive(Debug, Clone, Default)]
pub struct RowValidation {
    pub rows: Vec<ValidatedRow>,
    pub errors: Vec<RowValidationError>,
}

/// Run every check on every row.
///
/// Errors are ordered by row, then by check. A row with at least one error
/// is left out of `rows`.
pub fn validate_rows(table: &ImportTable) -> RowValidation {
    let mut email_counts: HashMap<&str, usize> = HashMap::new();
    for row in &table.rows {
        if let Some(email) = row.email_address.as_deref() {
            *email_counts.entry(email).or_default() += 1;
        }
    }

    let mut result = RowValidation::default();
    for row in &table.rows {
        let errors = check_row(row, &email_counts);
        if errors.is_empty() {
            if let Some(valid) = ValidatedRow::from_row(row) {
                result.rows.push(valid);
            }
        } else {
            result.errors.extend(errors);
        }
    }

    debug!(
        rows = table.rows.len(),
        accepted = result.rows.len(),
        errors = result.errors.len(),
        "Row validation finished"
    );
    result
}

fn check_row(row: &ImportRow, email_counts: &HashMap<&str, usize>) -> Vec<RowValidationError> {
    let row_index = row.row_index;
    let mut errors: Vec<RowValidationError> = Column::REQUIRED
        .iter()
        .filter(|column| row.value(**column).is_none())
        .map(|column| RowValidationError::EmptyField {
            row_index,
            column: *column,
        })
        .collect();

    if let Some(email) = row.email_address.as_deref() {
        if !is_valid_email(email) {
            errors.push(RowValidationError::InvalidEmail {
                row_index,
                value: email.to_string(),
            });
        }
        if email_counts.get(email).copied().unwrap_or(0) > 1 {
            errors.push(RowValidationError::DuplicateEmail {
                row_index,
                value: email.to_string(),
            });
        }
    }

    if let Some(phone) = row.phone_number.as_deref() {
        if !is_valid_phone(phone) {
            errors.push(RowValidationError::InvalidPhone {
                row_index,
                value: phone.to_string(),
            });
        }
    }

    if let Some(subjects) = row.subjects_taught.as_deref() {
        let count = subjects.split(',').count();
        if count > MAX_SUBJECTS {
            errors.push(RowValidationError::TooManyTags { row_index, count });
        }
    }

    errors
}
