//! In-memory `TeacherStore` for tests and dry runs.
//!
//! Writes go to a copy of the state that replaces the original only when the
//! whole operation succeeded, mirroring a database transaction.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::store::{BatchError, TeacherStore};
use crate::types::{
    released_by, BatchOutcome, ImageChange, Subject, Teacher, TeacherQuery, TeacherView,
    TeacherWrite, UpsertOutcome,
};

#[derive(Debug, Clone, Default)]
struct State {
    teachers: BTreeMap<Uuid, Teacher>,
    subjects: BTreeMap<Uuid, Subject>,
    links: BTreeSet<(Uuid, Uuid)>,
}

impl State {
    fn view(&self, teacher: &Teacher) -> TeacherView {
        let subjects = self
            .links
            .iter()
            .filter(|(teacher_id, _)| *teacher_id == teacher.id)
            .filter_map(|(_, subject_id)| self.subjects.get(subject_id))
            .map(|s| s.name.clone())
            .collect();
        TeacherView::new(teacher.clone(), subjects)
    }

    fn subject_id(&mut self, name: &str) -> Uuid {
        if let Some(existing) = self.subjects.values().find(|s| s.name == name) {
            return existing.id;
        }
        let id = Uuid::new_v4();
        self.subjects.insert(id, Subject { id, name: name.to_string() });
        id
    }

    fn write(&mut self, write: &TeacherWrite) -> UpsertOutcome {
        let now = Utc::now();
        let existing = self
            .teachers
            .values_mut()
            .find(|t| t.email_address == write.email_address);

        let outcome = match existing {
            Some(current) => {
                let released_image = released_by(current.profile_picture.as_deref(), &write.image);
                current.first_name = write.first_name.clone();
                current.last_name = write.last_name.clone();
                current.phone_number = write.phone_number.clone();
                current.room_number = write.room_number.clone();
                match &write.image {
                    ImageChange::Keep => {}
                    ImageChange::Set(handle) => current.profile_picture = Some(handle.clone()),
                    ImageChange::Clear => current.profile_picture = None,
                }
                current.updated_at = now;
                UpsertOutcome {
                    teacher_id: current.id,
                    created: false,
                    released_image,
                }
            }
            None => {
                let id = Uuid::new_v4();
                let profile_picture = match &write.image {
                    ImageChange::Set(handle) => Some(handle.clone()),
                    ImageChange::Keep | ImageChange::Clear => None,
                };
                self.teachers.insert(
                    id,
                    Teacher {
                        id,
                        first_name: write.first_name.clone(),
                        last_name: write.last_name.clone(),
                        email_address: write.email_address.clone(),
                        phone_number: write.phone_number.clone(),
                        room_number: write.room_number.clone(),
                        profile_picture,
                        created_at: now,
                        updated_at: now,
                    },
                );
                UpsertOutcome {
                    teacher_id: id,
                    created: true,
                    released_image: None,
                }
            }
        };

        for name in &write.subjects {
            let subject_id = self.subject_id(name);
            self.links.insert((outcome.teacher_id, subject_id));
        }
        outcome
    }

    /// Drop everything, returning the picture handles that were referenced.
    fn reset(&mut self) -> Vec<String> {
        let released = self
            .teachers
            .values()
            .filter_map(|t| t.profile_picture.clone())
            .collect();
        *self = State::default();
        released
    }
}

#[derive(Default)]
pub struct MemoryTeacherStore {
    state: Mutex<State>,
    failing_emails: Mutex<HashSet<String>>,
}

impl MemoryTeacherStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write of this email fail, like a database error would.
    #[cfg(test)]
    pub fn fail_on(&self, email: impl Into<String>) {
        self.failing_emails.lock().insert(email.into());
    }

    pub fn teachers(&self) -> Vec<TeacherView> {
        let state = self.state.lock();
        let mut views: Vec<TeacherView> = state.teachers.values().map(|t| state.view(t)).collect();
        sort_views(&mut views);
        views
    }

    #[cfg(test)]
    pub fn find_by_email(&self, email: &str) -> Option<TeacherView> {
        let state = self.state.lock();
        state
            .teachers
            .values()
            .find(|t| t.email_address == email)
            .map(|t| state.view(t))
    }

    #[cfg(test)]
    pub fn subject_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().subjects.values().map(|s| s.name.clone()).collect();
        names.sort();
        names
    }

    fn check(&self, write: &TeacherWrite) -> Result<()> {
        if self.failing_emails.lock().contains(&write.email_address) {
            return Err(anyhow!(
                "duplicate key value violates unique constraint for {}",
                write.email_address
            ));
        }
        Ok(())
    }
}

fn sort_views(views: &mut [TeacherView]) {
    views.sort_by(|a, b| {
        (&a.last_name, &a.first_name, a.id).cmp(&(&b.last_name, &b.first_name, b.id))
    });
}

#[async_trait]
impl TeacherStore for MemoryTeacherStore {
    async fn upsert(&self, write: &TeacherWrite) -> Result<UpsertOutcome> {
        self.check(write)?;
        Ok(self.state.lock().write(write))
    }

    async fn apply_all(&self, writes: &[TeacherWrite], reset: bool) -> Result<BatchOutcome, BatchError> {
        let mut state = self.state.lock();
        let mut draft = state.clone();
        let mut batch = BatchOutcome::default();

        if reset {
            batch.released_images = draft.reset();
        }
        for write in writes {
            if let Err(error) = self.check(write) {
                return Err(BatchError::Row {
                    row_index: write.row_index,
                    error,
                });
            }
            batch.outcomes.push(draft.write(write));
        }

        *state = draft;
        Ok(batch)
    }

    async fn list(&self, query: &TeacherQuery) -> Result<(Vec<TeacherView>, i64)> {
        let matching: Vec<TeacherView> = self
            .teachers()
            .into_iter()
            .filter(|t| query.matches(t))
            .collect();
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn get(&self, id: Uuid) -> Result<Option<TeacherView>> {
        let state = self.state.lock();
        Ok(state.teachers.get(&id).map(|t| state.view(t)))
    }
}
