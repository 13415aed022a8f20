//! Append-only revision ledger
//!
//! One row per create and per content update. The append always runs inside
//! the transaction that writes the annotation row it documents; if the append
//! fails the whole mutation rolls back, so the live row's `version` and the
//! latest ledger row can never diverge.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

use super::query::{PageParams, Pagination};
use super::types::{self, Annotation, AnnotationVersion};

pub struct VersionLedger<'a> {
    pool: &'a SqlitePool,
}

impl<'a> VersionLedger<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the version ledger table
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS annotation_versions (
                id TEXT PRIMARY KEY,
                annotation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                text TEXT NOT NULL,
                rich_text_json TEXT,
                annotation_type TEXT NOT NULL,
                tags_json TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_versions_annotation
                ON annotation_versions(annotation_id, version);
            "#,
        )
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Append the given annotation state as its `version` revision row.
    ///
    /// Pure insert; the caller supplies the connection of the enclosing
    /// transaction.
    pub async fn append(
        conn: &mut SqliteConnection,
        annotation: &Annotation,
        actor: &str,
    ) -> Result<()> {
        let tags_json = types::encode_tags(&annotation.tags)?;
        let rich_text_json = types::encode_json(annotation.rich_text.as_ref())?;

        sqlx::query(
            r#"
            INSERT INTO annotation_versions (
                id, annotation_id, user_id, text, rich_text_json,
                annotation_type, tags_json, version, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&annotation.id)
        .bind(actor)
        .bind(&annotation.text)
        .bind(&rich_text_json)
        .bind(&annotation.annotation_type)
        .bind(&tags_json)
        .bind(annotation.version)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// List the ledger for an annotation, most recent revision first
    pub async fn list(
        &self,
        annotation_id: &str,
        params: PageParams,
    ) -> Result<(Vec<AnnotationVersion>, Pagination)> {
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM annotation_versions WHERE annotation_id = ?")
                .bind(annotation_id)
                .fetch_one(self.pool)
                .await?;

        let rows = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT id, annotation_id, user_id, text, rich_text_json,
                   annotation_type, tags_json, version, created_at
            FROM annotation_versions
            WHERE annotation_id = ?
            ORDER BY version DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(annotation_id)
        .bind(params.limit)
        .bind(params.offset())
        .fetch_all(self.pool)
        .await?;

        let versions = rows
            .into_iter()
            .map(|r| r.into_version())
            .collect::<Result<Vec<_>>>()?;

        Ok((versions, Pagination::new(params, total.0)))
    }
}

/// Internal row type for ledger queries
#[derive(sqlx::FromRow)]
struct VersionRow {
    id: String,
    annotation_id: String,
    user_id: String,
    text: String,
    rich_text_json: Option<String>,
    annotation_type: String,
    tags_json: String,
    version: i64,
    created_at: String,
}

impl VersionRow {
    fn into_version(self) -> Result<AnnotationVersion> {
        Ok(AnnotationVersion {
            id: self.id,
            annotation_id: self.annotation_id,
            user_id: self.user_id,
            text: self.text,
            rich_text: types::decode_json(self.rich_text_json.as_deref())?,
            annotation_type: self.annotation_type,
            tags: types::decode_tags(&self.tags_json)?,
            version: self.version,
            created_at: types::decode_timestamp(&self.created_at)?,
        })
    }
}
