//! Commit of validated rows into the teacher store.
//!
//! Blob ordering per row: write the new picture, persist the row, then
//! release the picture it replaced. A picture written for a row that failed
//! is deleted again unless it existed before.

use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::archive::ProfileArchive;
use super::error::{ImportError, RowImportError};
use crate::db::{BatchError, TeacherStore};
use crate::services::blob_store::BlobStore;
use crate::types::{
    CommitOptions, CommitPolicy, CommitSummary, ImageChange, ImportMode, TeacherWrite,
    UpsertOutcome, ValidatedRow,
};

/// Python-style title case: a letter is uppercased when it does not follow
/// another letter, lowercased otherwise.
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_letter = false;
    for c in value.chars() {
        if prev_letter {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_letter = c.is_alphabetic();
    }
    out
}

/// Split a `subjects_taught` cell into normalized, unique subject names.
pub fn normalize_subjects(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(title_case)
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Blob name for a teacher's picture. The same teacher and the same bytes
/// always give the same name.
///
/// The email is hashed exactly as stored: teachers differing only in email
/// case are distinct and must not share a blob.
pub fn picture_blob_name(email: &str, picture_name: &str, data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update([0u8]);
    hasher.update(data);
    let digest = hex::encode(hasher.finalize());

    let extension = picture_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "img".to_string());

    format!("{}.{}", &digest[..32], extension)
}

/// One row ready to be written, plus the picture bytes it brings.
struct PreparedRow<'a> {
    write: TeacherWrite,
    picture: Option<&'a [u8]>,
}

/// A picture blob written during this commit.
struct SavedBlob {
    handle: String,
    /// The blob did not exist before this commit
    fresh: bool,
}

pub struct Importer {
    store: Arc<dyn TeacherStore>,
    blobs: Arc<dyn BlobStore>,
}

impl Importer {
    pub fn new(store: Arc<dyn TeacherStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { store, blobs }
    }

    /// Write validated rows according to `options`.
    ///
    /// Best-effort commits report failing rows in the summary. All-or-nothing
    /// commits (and every reset) fail as a whole on the first bad row.
    pub async fn commit(
        &self,
        rows: &[ValidatedRow],
        archive: Option<&ProfileArchive>,
        options: CommitOptions,
    ) -> Result<CommitSummary, ImportError> {
        let prepared: Vec<PreparedRow<'_>> = rows.iter().map(|row| prepare(row, archive)).collect();
        let reset = options.mode == ImportMode::ReplaceAll;

        let summary = match options.effective_policy() {
            CommitPolicy::BestEffort => self.commit_each(prepared).await,
            CommitPolicy::AllOrNothing => self.commit_all(prepared, reset).await?,
        };

        info!(
            mode = ?options.mode,
            policy = ?options.effective_policy(),
            created = summary.created_count,
            updated = summary.updated_count,
            pictures = summary.pictures_attached,
            failed = summary.failed.len(),
            "Import committed"
        );
        Ok(summary)
    }

    async fn commit_each(&self, prepared: Vec<PreparedRow<'_>>) -> CommitSummary {
        let mut summary = CommitSummary::default();

        for row in prepared {
            let row_index = row.write.row_index;
            let saved = match self.save_picture(&row).await {
                Ok(saved) => saved,
                Err(e) => {
                    warn!(row = row_index, error = %format!("{e:#}"), "Failed to store profile picture");
                    summary.failed.push(RowImportError {
                        row_index,
                        cause: format!("Failed to store profile picture: {e:#}"),
                    });
                    continue;
                }
            };

            match self.store.upsert(&row.write).await {
                Ok(outcome) => {
                    count(&mut summary, &row.write, &outcome);
                    if let Some(old) = outcome.released_image {
                        self.release(&old).await;
                    }
                }
                Err(e) => {
                    warn!(row = row_index, error = %format!("{e:#}"), "Failed to import row");
                    summary.failed.push(RowImportError {
                        row_index,
                        cause: format!("{e:#}"),
                    });
                    if let Some(saved) = saved {
                        self.rollback(std::slice::from_ref(&saved)).await;
                    }
                }
            }
        }

        summary
    }

    async fn commit_all(&self, prepared: Vec<PreparedRow<'_>>, reset: bool) -> Result<CommitSummary, ImportError> {
        let mut saved = Vec::new();
        for row in &prepared {
            match self.save_picture(row).await {
                Ok(Some(blob)) => saved.push(blob),
                Ok(None) => {}
                Err(e) => {
                    self.rollback(&saved).await;
                    return Err(RowImportError {
                        row_index: row.write.row_index,
                        cause: format!("Failed to store profile picture: {e:#}"),
                    }
                    .into());
                }
            }
        }

        let writes: Vec<TeacherWrite> = prepared.into_iter().map(|p| p.write).collect();
        let batch = match self.store.apply_all(&writes, reset).await {
            Ok(batch) => batch,
            Err(err) => {
                self.rollback(&saved).await;
                return Err(match err {
                    BatchError::Row { row_index, error } => RowImportError {
                        row_index,
                        cause: format!("{error:#}"),
                    }
                    .into(),
                    BatchError::Store(error) => ImportError::Store(error),
                });
            }
        };

        let mut summary = CommitSummary::default();
        for (write, outcome) in writes.iter().zip(&batch.outcomes) {
            count(&mut summary, write, outcome);
        }

        // A reset re-import of the same picture keeps the same handle.
        let referenced: HashSet<&str> = writes
            .iter()
            .filter_map(|w| match &w.image {
                ImageChange::Set(handle) => Some(handle.as_str()),
                _ => None,
            })
            .collect();
        let released: HashSet<&str> = batch
            .outcomes
            .iter()
            .filter_map(|o| o.released_image.as_deref())
            .chain(batch.released_images.iter().map(String::as_str))
            .filter(|handle| !referenced.contains(handle))
            .collect();
        for handle in released {
            self.release(handle).await;
        }

        Ok(summary)
    }

    async fn save_picture(&self, row: &PreparedRow<'_>) -> anyhow::Result<Option<SavedBlob>> {
        let (ImageChange::Set(handle), Some(data)) = (&row.write.image, row.picture) else {
            return Ok(None);
        };
        if self.blobs.contains(handle).await? {
            return Ok(Some(SavedBlob {
                handle: handle.clone(),
                fresh: false,
            }));
        }
        self.blobs.save(handle, data).await?;
        Ok(Some(SavedBlob {
            handle: handle.clone(),
            fresh: true,
        }))
    }

    async fn release(&self, handle: &str) {
        match self.blobs.delete(handle).await {
            Ok(()) => debug!(handle, "Released profile picture"),
            Err(e) => warn!(handle, error = %format!("{e:#}"), "Failed to release profile picture"),
        }
    }

    async fn rollback(&self, saved: &[SavedBlob]) {
        for blob in saved.iter().filter(|b| b.fresh) {
            self.release(&blob.handle).await;
        }
    }
}

fn prepare<'a>(row: &ValidatedRow, archive: Option<&'a ProfileArchive>) -> PreparedRow<'a> {
    let (image, picture) = match row.profile_picture.as_deref() {
        None => (ImageChange::Clear, None),
        Some(name) => match archive.and_then(|a| a.find(name)) {
            Some(data) => (
                ImageChange::Set(picture_blob_name(&row.email_address, name, data)),
                Some(data),
            ),
            None => {
                debug!(row = row.row_index, picture = name, "Picture not in archive, keeping current");
                (ImageChange::Keep, None)
            }
        },
    };

    PreparedRow {
        write: TeacherWrite {
            row_index: row.row_index,
            first_name: row.first_name.clone(),
            last_name: row.last_name.clone(),
            email_address: row.email_address.clone(),
            phone_number: row.phone_number.clone(),
            room_number: row.room_number.clone(),
            image,
            subjects: normalize_subjects(&row.subjects_taught),
        },
        picture,
    }
}

fn count(summary: &mut CommitSummary, write: &TeacherWrite, outcome: &UpsertOutcome) {
    if outcome.created {
        summary.created_count += 1;
    } else {
        summary.updated_count += 1;
    }
    if matches!(write.image, ImageChange::Set(_)) {
        summary.pictures_attached += 1;
    }
}
