//! Teacher database queries

use anyhow::Result;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::types::{Teacher, TeacherQuery, TeacherWrite};

const TEACHER_COLUMNS: &str = r#"
    id, first_name, last_name, email_address, phone_number, room_number,
    profile_picture, created_at, updated_at
"#;

/// Every search word must prefix-match a name or one of the subjects.
const SEARCH_FILTER: &str = r#"
    NOT EXISTS (
        SELECT 1 FROM unnest($1::text[]) AS w(word)
        WHERE NOT (
            t.first_name ILIKE w.word || '%' ESCAPE '\'
            OR t.last_name ILIKE w.word || '%' ESCAPE '\'
            OR EXISTS (
                SELECT 1
                FROM teacher_subjects ts
                JOIN subjects s ON s.id = ts.subject_id
                WHERE ts.teacher_id = t.id
                  AND s.name ILIKE w.word || '%' ESCAPE '\'
            )
        )
    )
"#;

/// Escape LIKE wildcards so a search word only matches literally.
pub fn escape_like(word: &str) -> String {
    let mut escaped = String::with_capacity(word.len());
    for c in word.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Find a teacher by email and lock the row for the rest of the transaction
pub async fn find_by_email_for_update(conn: &mut PgConnection, email: &str) -> Result<Option<Teacher>> {
    let teacher = sqlx::query_as::<_, Teacher>(&format!(
        "SELECT {TEACHER_COLUMNS} FROM teachers WHERE email_address = $1 FOR UPDATE"
    ))
    .bind(email)
    .fetch_optional(conn)
    .await?;

    Ok(teacher)
}

/// Create a teacher
pub async fn insert_teacher(
    conn: &mut PgConnection,
    write: &TeacherWrite,
    profile_picture: Option<&str>,
) -> Result<Uuid> {
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO teachers (
            id, first_name, last_name, email_address, phone_number, room_number,
            profile_picture, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&write.first_name)
    .bind(&write.last_name)
    .bind(&write.email_address)
    .bind(&write.phone_number)
    .bind(&write.room_number)
    .bind(profile_picture)
    .fetch_one(conn)
    .await?;

    Ok(id)
}

/// Overwrite the scalar fields and picture of an existing teacher
pub async fn update_teacher(
    conn: &mut PgConnection,
    teacher_id: Uuid,
    write: &TeacherWrite,
    profile_picture: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE teachers SET
            first_name = $2,
            last_name = $3,
            phone_number = $4,
            room_number = $5,
            profile_picture = $6,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(teacher_id)
    .bind(&write.first_name)
    .bind(&write.last_name)
    .bind(&write.phone_number)
    .bind(&write.room_number)
    .bind(profile_picture)
    .execute(conn)
    .await?;

    Ok(())
}

/// Delete every teacher, returning the picture handles they referenced
pub async fn delete_all_teachers(conn: &mut PgConnection) -> Result<Vec<String>> {
    let rows: Vec<(Option<String>,)> = sqlx::query_as("DELETE FROM teachers RETURNING profile_picture")
        .fetch_all(conn)
        .await?;

    Ok(rows.into_iter().filter_map(|(p,)| p).collect())
}

/// Get teacher by ID
pub async fn get_teacher(pool: &PgPool, teacher_id: Uuid) -> Result<Option<Teacher>> {
    let teacher = sqlx::query_as::<_, Teacher>(&format!(
        "SELECT {TEACHER_COLUMNS} FROM teachers WHERE id = $1"
    ))
    .bind(teacher_id)
    .fetch_optional(pool)
    .await?;

    Ok(teacher)
}

/// List teachers matching the query, ordered by last name, first name.
/// Returns the page and the total number of matches.
pub async fn list_teachers(pool: &PgPool, query: &TeacherQuery) -> Result<(Vec<Teacher>, i64)> {
    let words: Vec<String> = query.words.iter().map(|w| escape_like(w)).collect();

    let teachers = sqlx::query_as::<_, Teacher>(&format!(
        r#"
        SELECT {TEACHER_COLUMNS}
        FROM teachers t
        WHERE {SEARCH_FILTER}
        ORDER BY t.last_name, t.first_name, t.id
        LIMIT $2 OFFSET $3
        "#
    ))
    .bind(&words)
    .bind(query.limit)
    .bind(query.offset)
    .fetch_all(pool)
    .await?;

    let (total,): (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM teachers t WHERE {SEARCH_FILTER}"
    ))
    .bind(&words)
    .fetch_one(pool)
    .await?;

    Ok((teachers, total))
}
