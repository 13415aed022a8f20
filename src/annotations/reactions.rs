//! Reaction storage and counter aggregation
//!
//! One reaction row per (annotation, user); a repeated reaction from the
//! same user updates the existing row instead of duplicating it. After every
//! reaction write the annotation's `reaction_count` is recomputed from the
//! reaction rows inside the same transaction, so the stored counter cannot
//! drift from the source of truth.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::types::AnnotationReaction;

pub struct ReactionAggregator<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ReactionAggregator<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the reactions table
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS annotation_reactions (
                id TEXT PRIMARY KEY,
                annotation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                reaction_type TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_reactions_annotation_user
                ON annotation_reactions(annotation_id, user_id);
            "#,
        )
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Insert or update the caller's reaction, then recompute the
    /// annotation's counter. Returns the reaction and whether a new row was
    /// created (as opposed to an existing one being retyped).
    pub async fn add_or_update(
        &self,
        annotation_id: &str,
        user_id: &str,
        reaction_type: &str,
    ) -> Result<(AnnotationReaction, bool)> {
        if user_id.trim().is_empty() {
            return Err(AppError::Validation("userId is required".to_string()));
        }

        let mut tx = self.pool.begin().await?;

        let annotation: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM annotations WHERE id = ?")
                .bind(annotation_id)
                .fetch_optional(&mut *tx)
                .await?;
        if annotation.is_none() {
            return Err(AppError::NotFound(format!(
                "Annotation not found: {annotation_id}"
            )));
        }

        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM annotation_reactions WHERE annotation_id = ? AND user_id = ?",
        )
        .bind(annotation_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let now = Utc::now();
        let (id, created) = match existing {
            Some((id,)) => {
                sqlx::query(
                    "UPDATE annotation_reactions SET reaction_type = ?, created_at = ? WHERE id = ?",
                )
                .bind(reaction_type)
                .bind(now.to_rfc3339())
                .bind(&id)
                .execute(&mut *tx)
                .await?;
                (id, false)
            }
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO annotation_reactions (id, annotation_id, user_id, reaction_type, created_at)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(annotation_id)
                .bind(user_id)
                .bind(reaction_type)
                .bind(now.to_rfc3339())
                .execute(&mut *tx)
                .await?;
                (id, true)
            }
        };

        Self::recompute(&mut tx, annotation_id).await?;
        tx.commit().await?;

        Ok((
            AnnotationReaction {
                id,
                annotation_id: annotation_id.to_string(),
                user_id: user_id.to_string(),
                reaction_type: reaction_type.to_string(),
                created_at: now,
            },
            created,
        ))
    }

    /// Remove the caller's reaction if present (absence is not an error),
    /// then recompute the counter.
    pub async fn remove(&self, annotation_id: &str, user_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM annotation_reactions WHERE annotation_id = ? AND user_id = ?")
            .bind(annotation_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        Self::recompute(&mut tx, annotation_id).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Overwrite the stored counter with a live COUNT over the reaction rows
    async fn recompute(conn: &mut SqliteConnection, annotation_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE annotations
            SET reaction_count = (
                SELECT COUNT(*) FROM annotation_reactions WHERE annotation_id = ?
            )
            WHERE id = ?
            "#,
        )
        .bind(annotation_id)
        .bind(annotation_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::store::{AnnotationStore, NewAnnotation};
    use crate::annotations::versions::VersionLedger;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        AnnotationStore::new(&pool).init().await.unwrap();
        VersionLedger::new(&pool).init().await.unwrap();
        ReactionAggregator::new(&pool).init().await.unwrap();
        pool
    }

    async fn create_annotation(pool: &SqlitePool) -> String {
        AnnotationStore::new(pool)
            .create(NewAnnotation {
                user_id: "author".to_string(),
                text: "note".to_string(),
                article_id: Some("article-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    async fn reaction_count(pool: &SqlitePool, annotation_id: &str) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT reaction_count FROM annotations WHERE id = ?")
            .bind(annotation_id)
            .fetch_one(pool)
            .await
            .unwrap();
        row.0
    }

    #[tokio::test]
    async fn test_react_retype_unreact_sequence() {
        let pool = setup_test_db().await;
        let reactions = ReactionAggregator::new(&pool);
        let id = create_annotation(&pool).await;

        let (reaction, created) = reactions.add_or_update(&id, "u-1", "like").await.unwrap();
        assert!(created);
        assert_eq!(reaction.reaction_type, "like");
        assert_eq!(reaction_count(&pool, &id).await, 1);

        // Same user reacting again retypes the existing row
        let (reaction, created) = reactions
            .add_or_update(&id, "u-1", "insightful")
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(reaction.reaction_type, "insightful");
        assert_eq!(reaction_count(&pool, &id).await, 1);

        let rows: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM annotation_reactions WHERE annotation_id = ?")
                .bind(&id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(rows.0, 1);
        let stored: (String,) = sqlx::query_as(
            "SELECT reaction_type FROM annotation_reactions WHERE annotation_id = ? AND user_id = ?",
        )
        .bind(&id)
        .bind("u-1")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(stored.0, "insightful");

        reactions.remove(&id, "u-1").await.unwrap();
        assert_eq!(reaction_count(&pool, &id).await, 0);
    }

    #[tokio::test]
    async fn test_counter_tracks_multiple_users() {
        let pool = setup_test_db().await;
        let reactions = ReactionAggregator::new(&pool);
        let id = create_annotation(&pool).await;

        reactions.add_or_update(&id, "u-1", "like").await.unwrap();
        reactions.add_or_update(&id, "u-2", "like").await.unwrap();
        reactions.add_or_update(&id, "u-3", "question").await.unwrap();
        assert_eq!(reaction_count(&pool, &id).await, 3);

        reactions.remove(&id, "u-2").await.unwrap();
        assert_eq!(reaction_count(&pool, &id).await, 2);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let pool = setup_test_db().await;
        let reactions = ReactionAggregator::new(&pool);
        let id = create_annotation(&pool).await;

        reactions.remove(&id, "never-reacted").await.unwrap();
        assert_eq!(reaction_count(&pool, &id).await, 0);
    }

    #[tokio::test]
    async fn test_react_to_missing_annotation_fails() {
        let pool = setup_test_db().await;
        let reactions = ReactionAggregator::new(&pool);

        assert!(matches!(
            reactions.add_or_update("no-such-id", "u-1", "like").await,
            Err(AppError::NotFound(_))
        ));
    }
}
