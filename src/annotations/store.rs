//! SQLite storage for annotations
//!
//! Owns the transaction that keeps the annotation row, its version-ledger
//! entry, and the parent reply counter in lock-step. A mutation is never
//! reported successful unless its version record persisted in the same
//! transaction.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::query::{push_page, push_predicates, AnnotationFilter, PageParams, Pagination};
use super::threads::{DeletePolicy, ThreadManager};
use super::types::{self, Annotation, Visibility, DEFAULT_ANNOTATION_TYPE, TOMBSTONE_TEXT};
use super::versions::VersionLedger;

const ANNOTATION_COLUMNS: &str = "id, article_id, url, user_id, text, rich_text_json, \
     annotation_type, tags_json, sentiment, visibility, selection_json, parent_id, \
     is_reply, reply_count, collection_id, is_deleted, version, reaction_count, \
     created_at, updated_at";

/// Repository for annotation persistence
pub struct AnnotationStore<'a> {
    pool: &'a SqlitePool,
}

/// Input for creating an annotation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAnnotation {
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "articleId")]
    pub article_id: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "richText")]
    pub rich_text: Option<Value>,
    #[serde(rename = "type")]
    pub annotation_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub sentiment: Option<f64>,
    pub visibility: Option<Visibility>,
    pub selection: Option<Value>,
    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,
    #[serde(rename = "collectionId")]
    pub collection_id: Option<String>,
}

/// Partial update; unset fields keep their prior values
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnotationPatch {
    pub text: Option<String>,
    #[serde(rename = "richText")]
    pub rich_text: Option<Value>,
    #[serde(rename = "type")]
    pub annotation_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub sentiment: Option<f64>,
    pub visibility: Option<Visibility>,
    pub selection: Option<Value>,
    #[serde(rename = "collectionId")]
    pub collection_id: Option<String>,
}

/// How a delete resolved
#[derive(Debug, Clone)]
pub enum DeleteOutcome {
    /// Row removed; carries the parent id when the deleted row was a reply
    Hard { parent_id: Option<String> },
    /// Row tombstoned; content replaced, thread structure preserved
    Soft(Annotation),
}

impl<'a> AnnotationStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the annotations table
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS annotations (
                id TEXT PRIMARY KEY,
                article_id TEXT,
                url TEXT,
                user_id TEXT NOT NULL,
                text TEXT NOT NULL,
                rich_text_json TEXT,
                annotation_type TEXT NOT NULL,
                tags_json TEXT NOT NULL,
                sentiment REAL NOT NULL DEFAULT 0,
                visibility TEXT NOT NULL DEFAULT 'private',
                selection_json TEXT,
                parent_id TEXT,
                is_reply INTEGER NOT NULL DEFAULT 0,
                reply_count INTEGER NOT NULL DEFAULT 0,
                collection_id TEXT,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 1,
                reaction_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_annotations_article ON annotations(article_id);
            CREATE INDEX IF NOT EXISTS idx_annotations_url ON annotations(url);
            CREATE INDEX IF NOT EXISTS idx_annotations_user ON annotations(user_id);
            CREATE INDEX IF NOT EXISTS idx_annotations_parent ON annotations(parent_id);
            CREATE INDEX IF NOT EXISTS idx_annotations_collection ON annotations(collection_id);
            "#,
        )
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Create an annotation with `version = 1` and its matching ledger row.
    /// A reply also increments its parent's reply counter, all in one
    /// transaction.
    pub async fn create(&self, input: NewAnnotation) -> Result<Annotation> {
        if input.user_id.trim().is_empty() {
            return Err(AppError::Validation("userId is required".to_string()));
        }
        if input.text.trim().is_empty() {
            return Err(AppError::Validation("text is required".to_string()));
        }
        if input.article_id.is_none() && input.url.is_none() {
            return Err(AppError::Validation(
                "articleId or url is required".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        if let Some(parent_id) = &input.parent_id {
            let parent: Option<(i64,)> =
                sqlx::query_as("SELECT 1 FROM annotations WHERE id = ? AND is_deleted = 0")
                    .bind(parent_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            if parent.is_none() {
                return Err(AppError::Validation(format!(
                    "Parent annotation not found: {parent_id}"
                )));
            }
        }

        let now = Utc::now();
        let parent_id = input.parent_id;
        let annotation = Annotation {
            id: Uuid::new_v4().to_string(),
            article_id: input.article_id,
            url: input.url,
            user_id: input.user_id,
            text: input.text,
            rich_text: input.rich_text,
            annotation_type: input
                .annotation_type
                .unwrap_or_else(|| DEFAULT_ANNOTATION_TYPE.to_string()),
            tags: input.tags.unwrap_or_default(),
            sentiment: input.sentiment.unwrap_or(0.0),
            visibility: input.visibility.unwrap_or_default(),
            selection: input.selection,
            is_reply: parent_id.is_some(),
            parent_id,
            reply_count: 0,
            collection_id: input.collection_id,
            is_deleted: false,
            version: 1,
            reaction_count: 0,
            created_at: now,
            updated_at: now,
        };

        Self::insert(&mut tx, &annotation).await?;
        VersionLedger::append(&mut tx, &annotation, &annotation.user_id).await?;
        if let Some(parent_id) = &annotation.parent_id {
            ThreadManager::increment_reply_count(&mut tx, parent_id).await?;
        }

        tx.commit().await?;
        Ok(annotation)
    }

    /// Apply a partial update, bump `version` by one and append the matching
    /// ledger row, all in one transaction. Only the owner may update, and
    /// tombstoned rows are not editable.
    pub async fn update(
        &self,
        id: &str,
        user_id: &str,
        patch: AnnotationPatch,
    ) -> Result<Annotation> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AnnotationRow>(&format!(
            "SELECT {ANNOTATION_COLUMNS} FROM annotations WHERE id = ? AND is_deleted = 0"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut annotation = row
            .ok_or_else(|| AppError::NotFound(format!("Annotation not found: {id}")))?
            .into_annotation()?;

        if annotation.user_id != user_id {
            return Err(AppError::PermissionDenied(
                "Only the owner may edit an annotation".to_string(),
            ));
        }

        if let Some(text) = patch.text {
            if text.trim().is_empty() {
                return Err(AppError::Validation("text must not be empty".to_string()));
            }
            annotation.text = text;
        }
        if let Some(rich_text) = patch.rich_text {
            annotation.rich_text = Some(rich_text);
        }
        if let Some(annotation_type) = patch.annotation_type {
            annotation.annotation_type = annotation_type;
        }
        if let Some(tags) = patch.tags {
            annotation.tags = tags;
        }
        if let Some(sentiment) = patch.sentiment {
            annotation.sentiment = sentiment;
        }
        if let Some(visibility) = patch.visibility {
            annotation.visibility = visibility;
        }
        if let Some(selection) = patch.selection {
            annotation.selection = Some(selection);
        }
        if let Some(collection_id) = patch.collection_id {
            annotation.collection_id = Some(collection_id);
        }

        annotation.version += 1;
        annotation.updated_at = Utc::now();

        let tags_json = types::encode_tags(&annotation.tags)?;
        let rich_text_json = types::encode_json(annotation.rich_text.as_ref())?;
        let selection_json = types::encode_json(annotation.selection.as_ref())?;

        sqlx::query(
            r#"
            UPDATE annotations
            SET text = ?, rich_text_json = ?, annotation_type = ?, tags_json = ?,
                sentiment = ?, visibility = ?, selection_json = ?, collection_id = ?,
                version = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&annotation.text)
        .bind(&rich_text_json)
        .bind(&annotation.annotation_type)
        .bind(&tags_json)
        .bind(annotation.sentiment)
        .bind(annotation.visibility.as_str())
        .bind(&selection_json)
        .bind(&annotation.collection_id)
        .bind(annotation.version)
        .bind(annotation.updated_at.to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        VersionLedger::append(&mut tx, &annotation, user_id).await?;

        tx.commit().await?;
        Ok(annotation)
    }

    /// Delete an annotation under the thread manager's policy: rows with
    /// live replies are tombstoned in place, leaf rows are removed along
    /// with their version and reaction rows.
    pub async fn delete(&self, id: &str, user_id: &str) -> Result<DeleteOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AnnotationRow>(&format!(
            "SELECT {ANNOTATION_COLUMNS} FROM annotations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut annotation = row
            .ok_or_else(|| AppError::NotFound(format!("Annotation not found: {id}")))?
            .into_annotation()?;

        if annotation.user_id != user_id {
            return Err(AppError::PermissionDenied(
                "Only the owner may delete an annotation".to_string(),
            ));
        }

        match ThreadManager::policy_for(annotation.reply_count) {
            DeletePolicy::Soft => {
                let now = Utc::now();
                sqlx::query(
                    "UPDATE annotations SET text = ?, is_deleted = 1, updated_at = ? WHERE id = ?",
                )
                .bind(TOMBSTONE_TEXT)
                .bind(now.to_rfc3339())
                .bind(id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                annotation.text = TOMBSTONE_TEXT.to_string();
                annotation.is_deleted = true;
                annotation.updated_at = now;
                Ok(DeleteOutcome::Soft(annotation))
            }
            DeletePolicy::Hard => {
                sqlx::query("DELETE FROM annotation_reactions WHERE annotation_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM annotation_versions WHERE annotation_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM annotations WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                if let Some(parent_id) = &annotation.parent_id {
                    ThreadManager::decrement_reply_count(&mut tx, parent_id).await?;
                }
                tx.commit().await?;

                Ok(DeleteOutcome::Hard {
                    parent_id: annotation.parent_id,
                })
            }
        }
    }

    /// Get an annotation by ID; tombstoned rows are returned as stored
    pub async fn get(&self, id: &str) -> Result<Option<Annotation>> {
        let row = sqlx::query_as::<_, AnnotationRow>(&format!(
            "SELECT {ANNOTATION_COLUMNS} FROM annotations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_annotation()).transpose()
    }

    /// List annotations with filters, visibility rules and pagination.
    /// The count query and the data query share one predicate path.
    pub async fn list(
        &self,
        filter: &AnnotationFilter,
        params: PageParams,
    ) -> Result<(Vec<Annotation>, Pagination)> {
        let mut count_query =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM annotations");
        push_predicates(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(self.pool)
            .await?;

        let mut data_query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {ANNOTATION_COLUMNS} FROM annotations"));
        push_predicates(&mut data_query, filter);
        push_page(&mut data_query, params);
        let rows: Vec<AnnotationRow> = data_query
            .build_query_as()
            .fetch_all(self.pool)
            .await?;

        let annotations = rows
            .into_iter()
            .map(|r| r.into_annotation())
            .collect::<Result<Vec<_>>>()?;

        Ok((annotations, Pagination::new(params, total)))
    }

    /// All replies of a parent, oldest first (thread display order)
    pub async fn replies(&self, parent_id: &str) -> Result<Vec<Annotation>> {
        let rows = sqlx::query_as::<_, AnnotationRow>(&format!(
            "SELECT {ANNOTATION_COLUMNS} FROM annotations \
             WHERE parent_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(parent_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_annotation()).collect()
    }

    async fn insert(conn: &mut SqliteConnection, a: &Annotation) -> Result<()> {
        let tags_json = types::encode_tags(&a.tags)?;
        let rich_text_json = types::encode_json(a.rich_text.as_ref())?;
        let selection_json = types::encode_json(a.selection.as_ref())?;

        sqlx::query(
            r#"
            INSERT INTO annotations (
                id, article_id, url, user_id, text, rich_text_json,
                annotation_type, tags_json, sentiment, visibility, selection_json,
                parent_id, is_reply, reply_count, collection_id, is_deleted,
                version, reaction_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&a.id)
        .bind(&a.article_id)
        .bind(&a.url)
        .bind(&a.user_id)
        .bind(&a.text)
        .bind(&rich_text_json)
        .bind(&a.annotation_type)
        .bind(&tags_json)
        .bind(a.sentiment)
        .bind(a.visibility.as_str())
        .bind(&selection_json)
        .bind(&a.parent_id)
        .bind(a.is_reply)
        .bind(a.reply_count)
        .bind(&a.collection_id)
        .bind(a.is_deleted)
        .bind(a.version)
        .bind(a.reaction_count)
        .bind(a.created_at.to_rfc3339())
        .bind(a.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

/// Internal row type for SQLite queries
#[derive(sqlx::FromRow)]
struct AnnotationRow {
    id: String,
    article_id: Option<String>,
    url: Option<String>,
    user_id: String,
    text: String,
    rich_text_json: Option<String>,
    annotation_type: String,
    tags_json: String,
    sentiment: f64,
    visibility: String,
    selection_json: Option<String>,
    parent_id: Option<String>,
    is_reply: bool,
    reply_count: i64,
    collection_id: Option<String>,
    is_deleted: bool,
    version: i64,
    reaction_count: i64,
    created_at: String,
    updated_at: String,
}

impl AnnotationRow {
    fn into_annotation(self) -> Result<Annotation> {
        Ok(Annotation {
            id: self.id,
            article_id: self.article_id,
            url: self.url,
            user_id: self.user_id,
            text: self.text,
            rich_text: types::decode_json(self.rich_text_json.as_deref())?,
            annotation_type: self.annotation_type,
            tags: types::decode_tags(&self.tags_json)?,
            sentiment: self.sentiment,
            visibility: Visibility::parse(&self.visibility),
            selection: types::decode_json(self.selection_json.as_deref())?,
            parent_id: self.parent_id,
            is_reply: self.is_reply,
            reply_count: self.reply_count,
            collection_id: self.collection_id,
            is_deleted: self.is_deleted,
            version: self.version,
            reaction_count: self.reaction_count,
            created_at: types::decode_timestamp(&self.created_at)?,
            updated_at: types::decode_timestamp(&self.updated_at)?,
        })
    }
}
