//! Subject database queries

use anyhow::Result;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Return the id of the subject with this name, creating it when absent.
pub async fn get_or_create_subject(conn: &mut PgConnection, name: &str) -> Result<Uuid> {
    // DO UPDATE (not DO NOTHING) so RETURNING also yields the existing row
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO subjects (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(conn)
    .await?;

    Ok(id)
}

/// Add a subject to a teacher's set. Existing links are left alone.
pub async fn link_subject(conn: &mut PgConnection, teacher_id: Uuid, subject_id: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO teacher_subjects (teacher_id, subject_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(teacher_id)
    .bind(subject_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Subject names per teacher for the given teachers.
pub async fn subjects_for_teachers(pool: &PgPool, teacher_ids: &[Uuid]) -> Result<Vec<(Uuid, String)>> {
    if teacher_ids.is_empty() {
        return Ok(vec![]);
    }

    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT ts.teacher_id, s.name
        FROM teacher_subjects ts
        JOIN subjects s ON s.id = ts.subject_id
        WHERE ts.teacher_id = ANY($1)
        ORDER BY s.name
        "#,
    )
    .bind(teacher_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Delete every link and subject (reset import)
pub async fn delete_all_subjects(conn: &mut PgConnection) -> Result<u64> {
    sqlx::query("DELETE FROM teacher_subjects")
        .execute(&mut *conn)
        .await?;
    let result = sqlx::query("DELETE FROM subjects").execute(&mut *conn).await?;

    Ok(result.rows_affected())
}
