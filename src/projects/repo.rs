use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Display aggregate; populated by the production pipeline, read-mostly here.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Media {
    pub id: Uuid,
    pub project_id: Uuid,
    pub filename: String,
    pub s3_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub duration_seconds: Option<f64>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub struct ProjectSummaryRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
    pub media_count: i64,
}

pub struct NewMedia<'a> {
    pub project_id: Uuid,
    pub filename: &'a str,
    pub s3_key: &'a str,
    pub content_type: &'a str,
    pub size_bytes: i64,
    pub duration_seconds: Option<f64>,
}

impl Project {
    /// Projects the user owns or has been invited to, newest first.
    pub async fn list_visible(
        db: &PgPool,
        user_id: Uuid,
        email: &str,
    ) -> anyhow::Result<Vec<ProjectSummaryRow>> {
        let rows = sqlx::query_as::<_, ProjectSummaryRow>(
            r#"
            SELECT p.id, p.name, p.description, p.created_at, COUNT(m.id) AS media_count
            FROM projects p
            LEFT JOIN media m ON m.project_id = p.id
            WHERE p.owner_id = $1
               OR p.id IN (SELECT project_id FROM project_shares WHERE email = $2)
            GROUP BY p.id
            ORDER BY p.created_at DESC
            "#,
        )
        .bind(user_id)
        .bind(email)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn find_visible(
        db: &PgPool,
        id: Uuid,
        user_id: Uuid,
        email: &str,
    ) -> anyhow::Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, owner_id, name, description, created_at
            FROM projects
            WHERE id = $1
              AND (owner_id = $2
                   OR id IN (SELECT project_id FROM project_shares WHERE email = $3))
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(project)
    }

    pub async fn find_owned(db: &PgPool, id: Uuid, user_id: Uuid) -> anyhow::Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, owner_id, name, description, created_at
            FROM projects
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(project)
    }

    pub async fn insert_share(
        db: &PgPool,
        project_id: Uuid,
        email: &str,
        invited_by: Uuid,
        token: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_shares (project_id, email, invited_by, token)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (project_id, email) DO UPDATE SET token = $4, created_at = now()
            "#,
        )
        .bind(project_id)
        .bind(email)
        .bind(invited_by)
        .bind(token)
        .execute(db)
        .await?;
        Ok(())
    }
}

impl Media {
    pub async fn list_for_project(db: &PgPool, project_id: Uuid) -> anyhow::Result<Vec<Media>> {
        let rows = sqlx::query_as::<_, Media>(
            r#"
            SELECT id, project_id, filename, s3_key, content_type, size_bytes,
                   duration_seconds, created_at
            FROM media
            WHERE project_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn find_in_project(
        db: &PgPool,
        id: Uuid,
        project_id: Uuid,
    ) -> anyhow::Result<Option<Media>> {
        let media = sqlx::query_as::<_, Media>(
            r#"
            SELECT id, project_id, filename, s3_key, content_type, size_bytes,
                   duration_seconds, created_at
            FROM media
            WHERE id = $1 AND project_id = $2
            "#,
        )
        .bind(id)
        .bind(project_id)
        .fetch_optional(db)
        .await?;
        Ok(media)
    }

    pub async fn insert(db: &PgPool, new: NewMedia<'_>) -> anyhow::Result<Media> {
        let media = sqlx::query_as::<_, Media>(
            r#"
            INSERT INTO media (project_id, filename, s3_key, content_type, size_bytes,
                               duration_seconds)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, project_id, filename, s3_key, content_type, size_bytes,
                      duration_seconds, created_at
            "#,
        )
        .bind(new.project_id)
        .bind(new.filename)
        .bind(new.s3_key)
        .bind(new.content_type)
        .bind(new.size_bytes)
        .bind(new.duration_seconds)
        .fetch_one(db)
        .await?;
        Ok(media)
    }

    pub async fn delete_in_project(db: &PgPool, id: Uuid, project_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(r#"DELETE FROM media WHERE id = $1 AND project_id = $2"#)
            .bind(id)
            .bind(project_id)
            .execute(db)
            .await?;
        Ok(())
    }
}
