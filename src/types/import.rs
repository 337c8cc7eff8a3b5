//! Import types: parsed CSV rows, validation reports and commit results

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::import::error::{ArchiveError, RowImportError, RowValidationError, SchemaError};

// =============================================================================
// COLUMNS
// =============================================================================

/// Known CSV columns, addressed by their normalized header name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    FirstName,
    LastName,
    EmailAddress,
    PhoneNumber,
    RoomNumber,
    SubjectsTaught,
    ProfilePicture,
}

impl Column {
    /// Columns that must be present in the header and non-empty in every row.
    pub const REQUIRED: [Column; 6] = [
        Column::FirstName,
        Column::LastName,
        Column::EmailAddress,
        Column::PhoneNumber,
        Column::RoomNumber,
        Column::SubjectsTaught,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Column::FirstName => "first_name",
            Column::LastName => "last_name",
            Column::EmailAddress => "email_address",
            Column::PhoneNumber => "phone_number",
            Column::RoomNumber => "room_number",
            Column::SubjectsTaught => "subjects_taught",
            Column::ProfilePicture => "profile_picture",
        }
    }

    /// Match an already-normalized header name.
    pub fn from_header(name: &str) -> Option<Self> {
        match name {
            "first_name" => Some(Column::FirstName),
            "last_name" => Some(Column::LastName),
            "email_address" => Some(Column::EmailAddress),
            "phone_number" => Some(Column::PhoneNumber),
            "room_number" => Some(Column::RoomNumber),
            "subjects_taught" => Some(Column::SubjectsTaught),
            "profile_picture" => Some(Column::ProfilePicture),
            _ => None,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ROWS
// =============================================================================

/// One data row after schema normalization. Blank cells are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRow {
    /// 0-based position among the data records of the file
    pub row_index: usize,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_address: Option<String>,
    pub phone_number: Option<String>,
    pub room_number: Option<String>,
    pub subjects_taught: Option<String>,
    pub profile_picture: Option<String>,
}

impl ImportRow {
    pub fn new(row_index: usize) -> Self {
        Self {
            row_index,
            ..Self::default()
        }
    }

    pub fn value(&self, column: Column) -> Option<&str> {
        self.slot(column).as_deref()
    }

    pub fn set(&mut self, column: Column, value: Option<String>) {
        *self.slot_mut(column) = value;
    }

    pub fn is_blank(&self) -> bool {
        Column::REQUIRED
            .iter()
            .chain(std::iter::once(&Column::ProfilePicture))
            .all(|c| self.value(*c).is_none())
    }

    fn slot(&self, column: Column) -> &Option<String> {
        match column {
            Column::FirstName => &self.first_name,
            Column::LastName => &self.last_name,
            Column::EmailAddress => &self.email_address,
            Column::PhoneNumber => &self.phone_number,
            Column::RoomNumber => &self.room_number,
            Column::SubjectsTaught => &self.subjects_taught,
            Column::ProfilePicture => &self.profile_picture,
        }
    }

    fn slot_mut(&mut self, column: Column) -> &mut Option<String> {
        match column {
            Column::FirstName => &mut self.first_name,
            Column::LastName => &mut self.last_name,
            Column::EmailAddress => &mut self.email_address,
            Column::PhoneNumber => &mut self.phone_number,
            Column::RoomNumber => &mut self.room_number,
            Column::SubjectsTaught => &mut self.subjects_taught,
            Column::ProfilePicture => &mut self.profile_picture,
        }
    }
}

/// Parsed, normalized CSV table handed from the schema check to row validation.
#[derive(Debug, Clone, Default)]
pub struct ImportTable {
    pub rows: Vec<ImportRow>,
    /// Number of data records read, including the dropped blank ones
    pub records_read: usize,
}

/// A row that passed every check. This is what gets staged and imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedRow {
    pub row_index: usize,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
    pub phone_number: String,
    pub room_number: String,
    pub subjects_taught: String,
    pub profile_picture: Option<String>,
}

impl ValidatedRow {
    /// Returns `None` when a required field is missing.
    pub fn from_row(row: &ImportRow) -> Option<Self> {
        Some(Self {
            row_index: row.row_index,
            first_name: row.first_name.clone()?,
            last_name: row.last_name.clone()?,
            email_address: row.email_address.clone()?,
            phone_number: row.phone_number.clone()?,
            room_number: row.room_number.clone()?,
            subjects_taught: row.subjects_taught.clone()?,
            profile_picture: row.profile_picture.clone(),
        })
    }
}

// =============================================================================
// REPORTING
// =============================================================================

/// Flat, client-renderable form of a row validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportIssue {
    pub row_index: usize,
    pub column: Column,
    pub kind: String,
    pub message: String,
    pub original_value: Option<String>,
}

/// Result of the validate phase.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Present when the validated rows were staged and can be confirmed
    pub staging_id: Option<Uuid>,
    pub total_rows: usize,
    pub accepted_rows: usize,
    pub schema_error: Option<SchemaError>,
    pub archive_error: Option<ArchiveError>,
    pub row_errors: Vec<RowValidationError>,
    /// Human-readable lines for every problem above
    pub messages: Vec<String>,
}

impl ValidationReport {
    pub fn new(
        total_rows: usize,
        accepted_rows: usize,
        schema_error: Option<SchemaError>,
        archive_error: Option<ArchiveError>,
        row_errors: Vec<RowValidationError>,
    ) -> Self {
        let mut messages = Vec::new();
        if let Some(err) = &schema_error {
            messages.push(err.to_string());
        }
        messages.extend(row_errors.iter().map(|e| e.to_string()));
        if let Some(err) = &archive_error {
            messages.extend(err.messages());
        }
        Self {
            staging_id: None,
            total_rows,
            accepted_rows,
            schema_error,
            archive_error,
            row_errors,
            messages,
        }
    }

    /// Schema and archive errors prevent staging and commit.
    pub fn is_blocked(&self) -> bool {
        self.schema_error.is_some() || self.archive_error.is_some()
    }

    pub fn has_errors(&self) -> bool {
        self.is_blocked() || !self.row_errors.is_empty()
    }
}

// =============================================================================
// COMMIT
// =============================================================================

/// How existing data is treated on commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportMode {
    /// Upsert by email, keep everything else
    #[default]
    Merge,
    /// Delete all teachers and subjects, then import
    ReplaceAll,
}

/// What happens when a single row fails to persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommitPolicy {
    /// Each row is its own transaction; failures are reported and skipped
    #[default]
    BestEffort,
    /// One transaction for the whole file; the first failure aborts
    AllOrNothing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOptions {
    #[serde(default)]
    pub mode: ImportMode,
    #[serde(default)]
    pub policy: CommitPolicy,
}

impl CommitOptions {
    /// A reset import is never partially applied.
    pub fn effective_policy(&self) -> CommitPolicy {
        match self.mode {
            ImportMode::ReplaceAll => CommitPolicy::AllOrNothing,
            ImportMode::Merge => self.policy,
        }
    }
}

/// Result of the confirm phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub created_count: u32,
    pub updated_count: u32,
    pub pictures_attached: u32,
    pub failed: Vec<RowImportError>,
}

/// Result of a one-shot import.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ImportOutcome {
    /// Validation was clean and the rows were committed
    Committed {
        report: ValidationReport,
        summary: CommitSummary,
    },
    /// Validation found problems; confirm or discard the staged rows
    Pending { report: ValidationReport },
}

// =============================================================================
// NATS PAYLOADS
// =============================================================================

/// Upload for the validate phase
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateImportRequest {
    #[serde(default)]
    pub filename: Option<String>,
    pub csv_content_base64: String,
    #[serde(default)]
    pub zip_content_base64: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmImportRequest {
    pub staging_id: Uuid,
    #[serde(flatten)]
    pub options: CommitOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardImportRequest {
    pub staging_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardImportResponse {
    pub discarded: bool,
}

/// Upload plus commit options for the one-shot import
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunImportRequest {
    #[serde(flatten)]
    pub upload: ValidateImportRequest,
    #[serde(flatten)]
    pub options: CommitOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_roundtrip_through_header() {
        for column in Column::REQUIRED {
            assert_eq!(Column::from_header(column.as_str()), Some(column));
        }
        assert_eq!(Column::from_header("profile_picture"), Some(Column::ProfilePicture));
        assert_eq!(Column::from_header("shoe_size"), None);
    }

    #[test]
    fn test_validated_row_requires_all_fields() {
        let mut row = ImportRow::new(3);
        for column in Column::REQUIRED {
            row.set(column, Some("x".into()));
        }
        let validated = ValidatedRow::from_row(&row).unwrap();
        assert_eq!(validated.row_index, 3);
        assert!(validated.profile_picture.is_none());

        row.set(Column::RoomNumber, None);
        assert!(ValidatedRow::from_row(&row).is_none());
    }

    #[test]
    fn test_blank_row_detection() {
        let mut row = ImportRow::new(0);
        assert!(row.is_blank());
        row.set(Column::ProfilePicture, Some("a.png".into()));
        assert!(!row.is_blank());
    }

    #[test]
    fn test_replace_all_forces_all_or_nothing() {
        let options = CommitOptions {
            mode: ImportMode::ReplaceAll,
            policy: CommitPolicy::BestEffort,
        };
        assert_eq!(options.effective_policy(), CommitPolicy::AllOrNothing);
        assert_eq!(CommitOptions::default().effective_policy(), CommitPolicy::BestEffort);
    }

    #[test]
    fn test_confirm_request_defaults() {
        let json = format!(r#"{{"stagingId":"{}"}}"#, Uuid::nil());
        let req: ConfirmImportRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.options, CommitOptions::default());

        let json = format!(
            r#"{{"stagingId":"{}","mode":"replaceAll","policy":"allOrNothing"}}"#,
            Uuid::nil()
        );
        let req: ConfirmImportRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.options.mode, ImportMode::ReplaceAll);
        assert_eq!(req.options.policy, CommitPolicy::AllOrNothing);
    }

    #[test]
    fn test_report_collects_messages_in_order() {
        let report = ValidationReport::new(
            2,
            1,
            None,
            Some(ArchiveError::Empty),
            vec![RowValidationError::InvalidPhone { row_index: 1, value: "1".into() }],
        );
        assert!(report.is_blocked());
        assert_eq!(
            report.messages,
            vec![
                "Row 1, Column 'phone_number': Invalid phone number".to_string(),
                "ZIP file is empty".to_string(),
            ]
        );
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let report = ValidationReport::new(0, 0, None, None, vec![]);
        let outcome = ImportOutcome::Pending { report };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json["report"]["stagingId"].is_null());
    }
}
