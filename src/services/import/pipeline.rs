//! Validate → stage → confirm orchestration.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::archive::{validate_archive, ArchiveLimits, ProfileArchive};
use super::error::ImportError;
use super::importer::Importer;
use super::rows::validate_rows;
use super::schema::parse_table;
use super::staging::StagingArea;
use crate::db::TeacherStore;
use crate::services::blob_store::BlobStore;
use crate::types::{CommitOptions, CommitSummary, ImportOutcome, ValidationReport};

/// Who is asking. Imports are only open to authenticated callers; staged
/// imports belong to `owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportCaller {
    pub owner: Uuid,
    pub authenticated: bool,
}

impl ImportCaller {
    pub fn authenticated(owner: Uuid) -> Self {
        Self {
            owner,
            authenticated: true,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            owner: Uuid::nil(),
            authenticated: false,
        }
    }

    fn require(&self) -> Result<Uuid, ImportError> {
        if self.authenticated {
            Ok(self.owner)
        } else {
            Err(ImportError::Unauthorized)
        }
    }
}

pub struct ImportPipeline {
    importer: Importer,
    staging: StagingArea,
    limits: ArchiveLimits,
    /// One commit in flight per process
    commit_guard: Mutex<()>,
}

impl ImportPipeline {
    pub fn new(
        store: Arc<dyn TeacherStore>,
        blobs: Arc<dyn BlobStore>,
        staging: StagingArea,
        limits: ArchiveLimits,
    ) -> Self {
        Self {
            importer: Importer::new(store, blobs),
            staging,
            limits,
            commit_guard: Mutex::new(()),
        }
    }

    /// Check the CSV and the archive and stage what passed.
    ///
    /// Schema and archive errors block the import: nothing is staged and
    /// the report carries no staging id. Row errors only drop their rows.
    pub async fn validate(
        &self,
        caller: ImportCaller,
        filename: Option<String>,
        csv: &[u8],
        archive: Option<&[u8]>,
    ) -> Result<ValidationReport, ImportError> {
        let owner = caller.require()?;

        let (schema_error, total_rows, validation) = match parse_table(csv) {
            Ok(table) => (None, table.rows.len(), validate_rows(&table)),
            Err(e) => (Some(e), 0, Default::default()),
        };
        let archive_error = archive.and_then(|bytes| validate_archive(bytes, &self.limits).err());

        let mut report = ValidationReport::new(
            total_rows,
            validation.rows.len(),
            schema_error,
            archive_error,
            validation.errors,
        );

        if !report.is_blocked() {
            let staged = self
                .staging
                .stage(owner, filename.clone(), validation.rows, archive)
                .await?;
            report.staging_id = Some(staged.id);
        }

        info!(
            %owner,
            filename = filename.as_deref().unwrap_or("-"),
            total = report.total_rows,
            accepted = report.accepted_rows,
            row_errors = report.row_errors.len(),
            blocked = report.is_blocked(),
            staging_id = ?report.staging_id,
            "Import validated"
        );
        Ok(report)
    }

    /// Commit a staged import. The staging entry is removed on success and
    /// kept when the commit fails, so it can be retried.
    pub async fn confirm(
        &self,
        caller: ImportCaller,
        staging_id: Uuid,
        options: CommitOptions,
    ) -> Result<CommitSummary, ImportError> {
        let owner = caller.require()?;
        let _guard = self.commit_guard.lock().await;

        let (staged, archive_bytes) = self.staging.load(owner, staging_id).await?;
        let archive = archive_bytes
            .map(|bytes| ProfileArchive::read(&bytes, &self.limits))
            .transpose()?;
        info!(
            %owner,
            %staging_id,
            filename = staged.filename.as_deref().unwrap_or("-"),
            rows = staged.rows.len(),
            pictures = archive.as_ref().map_or(0, ProfileArchive::len),
            "Committing staged import"
        );

        let summary = self
            .importer
            .commit(&staged.rows, archive.as_ref(), options)
            .await?;

        if let Err(e) = self.staging.remove(owner, staging_id).await {
            warn!(%staging_id, error = %e, "Failed to remove confirmed staging entry");
        }
        Ok(summary)
    }

    /// Abandon a staged import. Returns whether it existed.
    pub async fn discard(&self, caller: ImportCaller, staging_id: Uuid) -> Result<bool, ImportError> {
        let owner = caller.require()?;
        let discarded = self.staging.remove(owner, staging_id).await?;
        info!(%owner, %staging_id, discarded, "Import discarded");
        Ok(discarded)
    }

    /// Validate and, when nothing at all was wrong, commit right away.
    pub async fn import_now(
        &self,
        caller: ImportCaller,
        filename: Option<String>,
        csv: &[u8],
        archive: Option<&[u8]>,
        options: CommitOptions,
    ) -> Result<ImportOutcome, ImportError> {
        let mut report = self.validate(caller, filename, csv, archive).await?;

        match report.staging_id {
            Some(staging_id) if !report.has_errors() => {
                let summary = self.confirm(caller, staging_id, options).await?;
                report.staging_id = None;
                Ok(ImportOutcome::Committed { report, summary })
            }
            _ => Ok(ImportOutcome::Pending { report }),
        }
    }

    pub async fn purge_expired(&self) -> Result<usize, ImportError> {
        self.staging.purge_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryTeacherStore;
    use crate::services::blob_store::MemoryBlobStore;
    use crate::services::import::error::{ArchiveError, RowValidationError, SchemaError};
    use crate::services::import::test_support::{csv_bytes, png_bytes, teacher_line, zip_bytes};
    use crate::types::{CommitPolicy, ImportMode};
    use chrono::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryTeacherStore>,
        blobs: Arc<MemoryBlobStore>,
        pipeline: ImportPipeline,
        caller: ImportCaller,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryTeacherStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let pipeline = ImportPipeline::new(
            store.clone(),
            blobs.clone(),
            StagingArea::new(dir.path().join("staging"), Duration::hours(24)),
            ArchiveLimits::default(),
        );
        Fixture {
            _dir: dir,
            store,
            blobs,
            pipeline,
            caller: ImportCaller::authenticated(Uuid::new_v4()),
        }
    }

    fn three_rows_with_bad_phone() -> Vec<u8> {
        csv_bytes(&[
            &teacher_line("Ada", "ada@school.edu", "Math", ""),
            "Bob,Example,bob@school.edu,555-1234,102,Art,",
            &teacher_line("Cy", "cy@school.edu", "Math, science ", ""),
        ])
    }

    #[tokio::test]
    async fn anonymous_callers_are_rejected() {
        let f = fixture();
        let anon = ImportCaller::anonymous();
        assert!(matches!(
            f.pipeline.validate(anon, None, &three_rows_with_bad_phone(), None).await,
            Err(ImportError::Unauthorized)
        ));
        assert!(matches!(
            f.pipeline.confirm(anon, Uuid::new_v4(), CommitOptions::default()).await,
            Err(ImportError::Unauthorized)
        ));
        assert!(matches!(
            f.pipeline.discard(anon, Uuid::new_v4()).await,
            Err(ImportError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn missing_columns_block_staging() {
        let f = fixture();
        let csv = b"first_name,last_name\nAda,Lovelace\n";
        let report = f.pipeline.validate(f.caller, None, csv, None).await.unwrap();
        assert!(matches!(report.schema_error, Some(SchemaError::MissingColumns { .. })));
        assert!(report.staging_id.is_none());
        assert!(report.messages[0].contains("missing required columns"));
    }

    #[tokio::test]
    async fn invalid_row_is_reported_and_the_rest_committed() {
        let f = fixture();
        let report = f
            .pipeline
            .validate(f.caller, Some("staff.csv".into()), &three_rows_with_bad_phone(), None)
            .await
            .unwrap();

        assert_eq!(report.total_rows, 3);
        assert_eq!(report.accepted_rows, 2);
        assert_eq!(
            report.row_errors,
            vec![RowValidationError::InvalidPhone {
                row_index: 1,
                value: "555-1234".into()
            }]
        );
        let staging_id = report.staging_id.unwrap();

        let summary = f
            .pipeline
            .confirm(f.caller, staging_id, CommitOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.created_count, 2);
        assert!(f.store.find_by_email("bob@school.edu").is_none());
        assert_eq!(
            f.store.find_by_email("cy@school.edu").unwrap().subjects,
            vec!["Math", "Science"]
        );

        // The staging entry is gone after a successful confirm
        assert!(matches!(
            f.pipeline.confirm(f.caller, staging_id, CommitOptions::default()).await,
            Err(ImportError::StagingNotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_archive_blocks_commit() {
        let f = fixture();
        let csv = csv_bytes(&[&teacher_line("Ada", "ada@school.edu", "Math", "ada.png")]);
        let report = f
            .pipeline
            .validate(f.caller, None, &csv, Some(&zip_bytes(&[])))
            .await
            .unwrap();
        assert_eq!(report.archive_error, Some(ArchiveError::Empty));
        assert!(report.staging_id.is_none());
        assert!(report.messages.contains(&"ZIP file is empty".to_string()));

        let outcome = f
            .pipeline
            .import_now(f.caller, None, &csv, Some(&zip_bytes(&[])), CommitOptions::default())
            .await
            .unwrap();
        assert!(matches!(outcome, ImportOutcome::Pending { .. }));
        assert!(f.store.teachers().is_empty());
    }

    #[tokio::test]
    async fn invalid_images_block_commit() {
        let f = fixture();
        let csv = csv_bytes(&[&teacher_line("Ada", "ada@school.edu", "Math", "ada.png")]);
        let zip = zip_bytes(&[("ada.png", png_bytes([1, 1, 1])), ("notes.txt", b"hello".to_vec())]);
        let report = f.pipeline.validate(f.caller, None, &csv, Some(&zip)).await.unwrap();
        assert!(matches!(report.archive_error, Some(ArchiveError::InvalidImages { .. })));
        assert!(report.messages.contains(&"File 'notes.txt': invalid image".to_string()));
        assert!(report.staging_id.is_none());
    }

    #[tokio::test]
    async fn missing_archive_entry_leaves_picture_unset() {
        let f = fixture();
        let csv = csv_bytes(&[
            &teacher_line("Ada", "ada@school.edu", "Math", "ada.png"),
            &teacher_line("Bea", "bea@school.edu", "Art", "bea.png"),
        ]);
        let zip = zip_bytes(&[("ada.png", png_bytes([1, 2, 3]))]);

        let outcome = f
            .pipeline
            .import_now(f.caller, None, &csv, Some(&zip), CommitOptions::default())
            .await
            .unwrap();
        match outcome {
            ImportOutcome::Committed { report, summary } => {
                assert!(report.staging_id.is_none());
                assert_eq!(summary.created_count, 2);
                assert_eq!(summary.pictures_attached, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(f.store.find_by_email("ada@school.edu").unwrap().profile_picture.is_some());
        assert!(f.store.find_by_email("bea@school.edu").unwrap().profile_picture.is_none());
        assert_eq!(f.blobs.handles().len(), 1);
    }

    #[tokio::test]
    async fn import_now_with_row_errors_stays_pending() {
        let f = fixture();
        let outcome = f
            .pipeline
            .import_now(f.caller, None, &three_rows_with_bad_phone(), None, CommitOptions::default())
            .await
            .unwrap();
        let staging_id = match outcome {
            ImportOutcome::Pending { report } => report.staging_id.unwrap(),
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert!(f.store.teachers().is_empty());

        f.pipeline
            .confirm(f.caller, staging_id, CommitOptions::default())
            .await
            .unwrap();
        assert_eq!(f.store.teachers().len(), 2);
    }

    #[tokio::test]
    async fn staged_imports_belong_to_their_owner() {
        let f = fixture();
        let report = f
            .pipeline
            .validate(f.caller, None, &three_rows_with_bad_phone(), None)
            .await
            .unwrap();
        let staging_id = report.staging_id.unwrap();

        let stranger = ImportCaller::authenticated(Uuid::new_v4());
        assert!(matches!(
            f.pipeline.confirm(stranger, staging_id, CommitOptions::default()).await,
            Err(ImportError::StagingNotFound(_))
        ));
        assert!(!f.pipeline.discard(stranger, staging_id).await.unwrap());

        assert!(f.pipeline.discard(f.caller, staging_id).await.unwrap());
        assert!(!f.pipeline.discard(f.caller, staging_id).await.unwrap());
    }

    #[tokio::test]
    async fn failed_commit_keeps_staging_entry() {
        let f = fixture();
        f.store.fail_on("cy@school.edu");
        let report = f
            .pipeline
            .validate(f.caller, None, &three_rows_with_bad_phone(), None)
            .await
            .unwrap();
        let staging_id = report.staging_id.unwrap();
        let strict = CommitOptions {
            mode: ImportMode::Merge,
            policy: CommitPolicy::AllOrNothing,
        };

        for _ in 0..2 {
            let err = f.pipeline.confirm(f.caller, staging_id, strict).await.unwrap_err();
            assert_eq!(err.code(), "IMPORT_FAILED");
        }
        assert!(f.store.teachers().is_empty());
    }

    #[tokio::test]
    async fn purge_keeps_fresh_entries() {
        let f = fixture();
        let report = f
            .pipeline
            .validate(f.caller, None, &three_rows_with_bad_phone(), None)
            .await
            .unwrap();
        assert_eq!(f.pipeline.purge_expired().await.unwrap(), 0);
        assert!(f.pipeline.discard(f.caller, report.staging_id.unwrap()).await.unwrap());
    }
}
