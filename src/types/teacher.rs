//! Teacher and subject types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Teacher entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
    pub phone_number: String,
    pub room_number: String,
    /// Blob handle of the profile picture
    pub profile_picture: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Subject (normalized tag) entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: Uuid,
    pub name: String,
}

/// Teacher with subject names, as served to directory clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherView {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
    pub phone_number: String,
    pub room_number: String,
    pub profile_picture: Option<String>,
    /// Sorted by name
    pub subjects: Vec<String>,
}

impl TeacherView {
    pub fn new(teacher: Teacher, mut subjects: Vec<String>) -> Self {
        subjects.sort();
        Self {
            id: teacher.id,
            first_name: teacher.first_name,
            last_name: teacher.last_name,
            email_address: teacher.email_address,
            phone_number: teacher.phone_number,
            room_number: teacher.room_number,
            profile_picture: teacher.profile_picture,
            subjects,
        }
    }
}

// =============================================================================
// QUERIES
// =============================================================================

/// Directory query: every search word must prefix-match a first name,
/// last name or subject name (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeacherQuery {
    pub words: Vec<String>,
    pub limit: i64,
    pub offset: i64,
}

impl TeacherQuery {
    pub fn new(search: Option<&str>, limit: i64, offset: i64) -> Self {
        let words = search
            .map(|s| s.split_whitespace().map(str::to_lowercase).collect())
            .unwrap_or_default();
        Self {
            words,
            limit: limit.clamp(1, 500),
            offset: offset.max(0),
        }
    }

    pub fn matches(&self, teacher: &TeacherView) -> bool {
        self.words.iter().all(|word| {
            starts_with_ci(&teacher.first_name, word)
                || starts_with_ci(&teacher.last_name, word)
                || teacher.subjects.iter().any(|s| starts_with_ci(s, word))
        })
    }
}

fn starts_with_ci(value: &str, lowercase_prefix: &str) -> bool {
    value.to_lowercase().starts_with(lowercase_prefix)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTeacherRequest {
    pub id: Uuid,
}

// =============================================================================
// WRITES
// =============================================================================

/// What to do with a teacher's profile picture during upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChange {
    /// Leave the current picture (or its absence) untouched
    Keep,
    /// Point at this blob handle
    Set(String),
    /// Remove the picture reference
    Clear,
}

/// One teacher as written by the importer: scalar fields, picture and subjects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeacherWrite {
    pub row_index: usize,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
    pub phone_number: String,
    pub room_number: String,
    pub image: ImageChange,
    /// Normalized, de-duplicated subject names
    pub subjects: Vec<String>,
}

/// Result of writing one teacher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub teacher_id: Uuid,
    pub created: bool,
    /// Picture handle that the teacher no longer references
    pub released_image: Option<String>,
}

/// Result of a whole-file transactional write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub outcomes: Vec<UpsertOutcome>,
    /// Picture handles of teachers removed by a reset
    pub released_images: Vec<String>,
}

/// Decide which handle (if any) stops being referenced when `change` is applied
/// over `current`.
pub fn released_by(current: Option<&str>, change: &ImageChange) -> Option<String> {
    match (current, change) {
        (Some(old), ImageChange::Set(new)) if old != new => Some(old.to_string()),
        (Some(old), ImageChange::Clear) => Some(old.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(first: &str, last: &str, subjects: &[&str]) -> TeacherView {
        TeacherView {
            id: Uuid::new_v4(),
            first_name: first.into(),
            last_name: last.into(),
            email_address: format!("{}@school.edu", first.to_lowercase()),
            phone_number: "+1-555-555-555".into(),
            room_number: "101".into(),
            profile_picture: None,
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_query_without_words_matches_everything() {
        let q = TeacherQuery::new(None, 10, 0);
        assert!(q.matches(&view("Ada", "Lovelace", &[])));
        let q = TeacherQuery::new(Some("   "), 10, 0);
        assert!(q.words.is_empty());
    }

    #[test]
    fn test_query_prefix_on_names_and_subjects() {
        let ada = view("Ada", "Lovelace", &["Mathematics"]);
        assert!(TeacherQuery::new(Some("ad"), 10, 0).matches(&ada));
        assert!(TeacherQuery::new(Some("LOVE"), 10, 0).matches(&ada));
        assert!(TeacherQuery::new(Some("math"), 10, 0).matches(&ada));
        assert!(!TeacherQuery::new(Some("ovelace"), 10, 0).matches(&ada));
    }

    #[test]
    fn test_query_requires_every_word() {
        let ada = view("Ada", "Lovelace", &["Mathematics"]);
        assert!(TeacherQuery::new(Some("ada math"), 10, 0).matches(&ada));
        assert!(!TeacherQuery::new(Some("ada physics"), 10, 0).matches(&ada));
    }

    #[test]
    fn test_query_clamps_paging() {
        let q = TeacherQuery::new(None, 0, -5);
        assert_eq!(q.limit, 1);
        assert_eq!(q.offset, 0);
    }

    #[test]
    fn test_released_by() {
        assert_eq!(released_by(None, &ImageChange::Clear), None);
        assert_eq!(released_by(Some("a"), &ImageChange::Keep), None);
        assert_eq!(released_by(Some("a"), &ImageChange::Set("a".into())), None);
        assert_eq!(released_by(Some("a"), &ImageChange::Set("b".into())), Some("a".into()));
        assert_eq!(released_by(Some("a"), &ImageChange::Clear), Some("a".into()));
    }
}
