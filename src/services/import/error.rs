//! Error taxonomy for the import pipeline.
//!
//! Validation errors (`SchemaError`, `RowValidationError`, `ArchiveError`)
//! are data: they are collected into a `ValidationReport` and shown to the
//! caller. `RowImportError` and `ImportError` surface during commit.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Column, ImportIssue};

// =============================================================================
// Schema
// =============================================================================

/// Structural problems with the CSV file. Fatal for the whole attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SchemaError {
    #[error("CSV file is missing required columns: {}", .missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("Error reading the CSV file: {message}")]
    Unreadable { message: String },
}

// =============================================================================
// Rows
// =============================================================================

/// A single semantic violation found in one CSV row.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "ImportIssue")]
pub enum RowValidationError {
    #[error("Row {row_index}, Column '{column}': Field is empty")]
    EmptyField { row_index: usize, column: Column },

    #[error("Row {row_index}, Column 'email_address': Invalid email address")]
    InvalidEmail { row_index: usize, value: String },

    #[error("Row {row_index}, Column 'email_address': Duplicate email address")]
    DuplicateEmail { row_index: usize, value: String },

    #[error("Row {row_index}, Column 'phone_number': Invalid phone number")]
    InvalidPhone { row_index: usize, value: String },

    #[error("Row {row_index}, Column 'subjects_taught': More than 5 subjects ({count})")]
    TooManyTags { row_index: usize, count: usize },
}

impl RowValidationError {
    pub fn row_index(&self) -> usize {
        match self {
            Self::EmptyField { row_index, .. }
            | Self::InvalidEmail { row_index, .. }
            | Self::DuplicateEmail { row_index, .. }
            | Self::InvalidPhone { row_index, .. }
            | Self::TooManyTags { row_index, .. } => *row_index,
        }
    }

    pub fn column(&self) -> Column {
        match self {
            Self::EmptyField { column, .. } => *column,
            Self::InvalidEmail { .. } | Self::DuplicateEmail { .. } => Column::EmailAddress,
            Self::InvalidPhone { .. } => Column::PhoneNumber,
            Self::TooManyTags { .. } => Column::SubjectsTaught,
        }
    }

    /// Stable machine-readable kind, used by clients to pick a rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyField { .. } => "emptyField",
            Self::InvalidEmail { .. } => "invalidEmail",
            Self::DuplicateEmail { .. } => "duplicateEmail",
            Self::InvalidPhone { .. } => "invalidPhone",
            Self::TooManyTags { .. } => "tooManyTags",
        }
    }

    /// Short message without the row/column prefix.
    pub fn message(&self) -> String {
        match self {
            Self::EmptyField { .. } => "Field is empty".to_string(),
            Self::InvalidEmail { .. } => "Invalid email address".to_string(),
            Self::DuplicateEmail { .. } => "Duplicate email address".to_string(),
            Self::InvalidPhone { .. } => "Invalid phone number".to_string(),
            Self::TooManyTags { count, .. } => format!("More than 5 subjects ({count})"),
        }
    }

    fn original_value(&self) -> Option<String> {
        match self {
            Self::InvalidEmail { value, .. }
            | Self::DuplicateEmail { value, .. }
            | Self::InvalidPhone { value, .. } => Some(value.clone()),
            Self::EmptyField { .. } | Self::TooManyTags { .. } => None,
        }
    }
}

impl From<RowValidationError> for ImportIssue {
    fn from(err: RowValidationError) -> Self {
        Self {
            row_index: err.row_index(),
            column: err.column(),
            kind: err.kind().to_string(),
            message: err.message(),
            original_value: err.original_value(),
        }
    }
}

// =============================================================================
// Archive
// =============================================================================

/// An archive entry that could not be decoded as an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidEntry {
    pub name: String,
    pub message: String,
}

/// Problems with the profile-picture archive. Any of these blocks the import.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ArchiveError {
    #[error("Error opening the ZIP file: {message}")]
    Format { message: String },

    #[error("ZIP file is empty")]
    Empty,

    #[error("ZIP file contains {} invalid image file(s)", .entries.len())]
    InvalidImages { entries: Vec<InvalidEntry> },

    #[error("ZIP file exceeds import limits ({entries} entries, {bytes} bytes; allowed {max_entries} entries, {max_bytes} bytes)")]
    #[serde(rename_all = "camelCase")]
    TooLarge {
        entries: usize,
        bytes: u64,
        max_entries: usize,
        max_bytes: u64,
    },
}

impl ArchiveError {
    /// One line per problem, matching how the validation report lists them.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::InvalidImages { entries } => entries
                .iter()
                .map(|e| format!("File '{}': {}", e.name, e.message))
                .collect(),
            other => vec![other.to_string()],
        }
    }
}

// =============================================================================
// Commit
// =============================================================================

/// A row that could not be written during commit.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Row {row_index}: {cause}")]
#[serde(rename_all = "camelCase")]
pub struct RowImportError {
    pub row_index: usize,
    pub cause: String,
}

/// Pipeline-level failure.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Import requires an authenticated caller")]
    Unauthorized,

    #[error("Staged import not found: {0}")]
    StagingNotFound(Uuid),

    #[error("Staging error: {0}")]
    Staging(#[from] std::io::Error),

    #[error("Staged import is corrupt: {0}")]
    StagingCorrupt(#[from] serde_json::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    RowImport(#[from] RowImportError),

    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl ImportError {
    /// Error code used in NATS error replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::StagingNotFound(_) => "NOT_FOUND",
            Self::Archive(_) | Self::RowImport(_) => "IMPORT_FAILED",
            Self::Staging(_) | Self::StagingCorrupt(_) => "STAGING_ERROR",
            Self::Store(_) => "DATABASE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_message_names_the_set() {
        let err = SchemaError::MissingColumns {
            missing: vec!["email_address".into(), "room_number".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("missing required columns"));
        assert!(msg.contains("email_address, room_number"));
    }

    #[test]
    fn row_error_serializes_as_flat_issue() {
        let err = RowValidationError::InvalidPhone {
            row_index: 4,
            value: "123".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["rowIndex"], 4);
        assert_eq!(json["column"], "phone_number");
        assert_eq!(json["kind"], "invalidPhone");
        assert_eq!(json["message"], "Invalid phone number");
        assert_eq!(json["originalValue"], "123");
    }

    #[test]
    fn row_error_display_matches_report_line() {
        let err = RowValidationError::EmptyField {
            row_index: 2,
            column: Column::RoomNumber,
        };
        assert_eq!(err.to_string(), "Row 2, Column 'room_number': Field is empty");
    }

    #[test]
    fn invalid_images_list_every_entry() {
        let err = ArchiveError::InvalidImages {
            entries: vec![
                InvalidEntry { name: "a.txt".into(), message: "invalid image".into() },
                InvalidEntry { name: "b.doc".into(), message: "invalid image".into() },
            ],
        };
        assert_eq!(
            err.messages(),
            vec!["File 'a.txt': invalid image", "File 'b.doc': invalid image"]
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "invalidImages");
        assert_eq!(json["entries"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn import_error_codes() {
        assert_eq!(ImportError::Unauthorized.code(), "UNAUTHORIZED");
        assert_eq!(ImportError::StagingNotFound(Uuid::nil()).code(), "NOT_FOUND");
        assert_eq!(ImportError::from(ArchiveError::Empty).code(), "IMPORT_FAILED");
    }
}
