//! Teacher persistence abstraction.
//!
//! `TeacherStore` is what the importer and the directory handlers talk to.
//! `PgTeacherStore` runs against PostgreSQL; `MemoryTeacherStore`
//! (see `db::memory`) implements the same contract in memory.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

use super::queries;
use crate::types::{
    released_by, BatchOutcome, ImageChange, TeacherQuery, TeacherView, TeacherWrite,
    UpsertOutcome,
};

/// Failure of a whole-file write. Nothing was persisted.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Row {row_index}: {error:#}")]
    Row { row_index: usize, error: anyhow::Error },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[async_trait]
pub trait TeacherStore: Send + Sync {
    /// Create or update one teacher (matched by email) with its subjects,
    /// in one transaction.
    async fn upsert(&self, write: &TeacherWrite) -> Result<UpsertOutcome>;

    /// Write every teacher in a single transaction, optionally deleting all
    /// teachers and subjects first. The first failing row aborts the batch.
    async fn apply_all(&self, writes: &[TeacherWrite], reset: bool) -> Result<BatchOutcome, BatchError>;

    /// Page of matching teachers plus the total match count.
    async fn list(&self, query: &TeacherQuery) -> Result<(Vec<TeacherView>, i64)>;

    async fn get(&self, id: Uuid) -> Result<Option<TeacherView>>;
}

// =============================================================================
// PgTeacherStore
// =============================================================================

#[derive(Clone)]
pub struct PgTeacherStore {
    pool: PgPool,
}

impl PgTeacherStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn views(&self, teachers: Vec<crate::types::Teacher>) -> Result<Vec<TeacherView>> {
        let ids: Vec<Uuid> = teachers.iter().map(|t| t.id).collect();
        let mut subjects: HashMap<Uuid, Vec<String>> = HashMap::new();
        for (teacher_id, name) in queries::subject::subjects_for_teachers(&self.pool, &ids).await? {
            subjects.entry(teacher_id).or_default().push(name);
        }

        Ok(teachers
            .into_iter()
            .map(|t| {
                let names = subjects.remove(&t.id).unwrap_or_default();
                TeacherView::new(t, names)
            })
            .collect())
    }
}

/// Write one teacher and its subject links on an open connection.
async fn write_teacher(conn: &mut PgConnection, write: &TeacherWrite) -> Result<UpsertOutcome> {
    let existing = queries::teacher::find_by_email_for_update(&mut *conn, &write.email_address).await?;

    let outcome = match existing {
        Some(current) => {
            let picture = match &write.image {
                ImageChange::Keep => current.profile_picture.clone(),
                ImageChange::Set(handle) => Some(handle.clone()),
                ImageChange::Clear => None,
            };
            queries::teacher::update_teacher(&mut *conn, current.id, write, picture.as_deref()).await?;
            UpsertOutcome {
                teacher_id: current.id,
                created: false,
                released_image: released_by(current.profile_picture.as_deref(), &write.image),
            }
        }
        None => {
            let picture = match &write.image {
                ImageChange::Set(handle) => Some(handle.as_str()),
                ImageChange::Keep | ImageChange::Clear => None,
            };
            let teacher_id = queries::teacher::insert_teacher(&mut *conn, write, picture).await?;
            UpsertOutcome {
                teacher_id,
                created: true,
                released_image: None,
            }
        }
    };

    for name in &write.subjects {
        let subject_id = queries::subject::get_or_create_subject(&mut *conn, name).await?;
        queries::subject::link_subject(&mut *conn, outcome.teacher_id, subject_id).await?;
    }

    Ok(outcome)
}

#[async_trait]
impl TeacherStore for PgTeacherStore {
    async fn upsert(&self, write: &TeacherWrite) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = write_teacher(&mut *tx, write).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn apply_all(&self, writes: &[TeacherWrite], reset: bool) -> Result<BatchOutcome, BatchError> {
        let mut tx = self.pool.begin().await.context("Failed to begin import transaction")?;
        let mut batch = BatchOutcome::default();

        if reset {
            batch.released_images = queries::teacher::delete_all_teachers(&mut *tx).await?;
            queries::subject::delete_all_subjects(&mut *tx).await?;
        }

        for write in writes {
            match write_teacher(&mut *tx, write).await {
                Ok(outcome) => batch.outcomes.push(outcome),
                // Dropping `tx` rolls everything back
                Err(error) => {
                    return Err(BatchError::Row {
                        row_index: write.row_index,
                        error,
                    })
                }
            }
        }

        tx.commit().await.context("Failed to commit import transaction")?;
        Ok(batch)
    }

    async fn list(&self, query: &TeacherQuery) -> Result<(Vec<TeacherView>, i64)> {
        let (teachers, total) = queries::teacher::list_teachers(&self.pool, query).await?;
        Ok((self.views(teachers).await?, total))
    }

    async fn get(&self, id: Uuid) -> Result<Option<TeacherView>> {
        match queries::teacher::get_teacher(&self.pool, id).await? {
            Some(teacher) => Ok(self.views(vec![teacher]).await?.pop()),
            None => Ok(None),
        }
    }
}
