//! Annotation collections
//!
//! Collections group annotations without owning their lifecycle: deleting a
//! collection detaches its members (nullifies the back-reference) and never
//! deletes an annotation row.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::query::{PageParams, Pagination};
use super::types::{self, AnnotationCollection};

pub struct CollectionManager<'a> {
    pool: &'a SqlitePool,
}

/// Input for creating a collection
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCollection {
    #[serde(rename = "userId", default)]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "isPublic")]
    pub is_public: Option<bool>,
}

/// Partial update; unset fields keep their prior values
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "isPublic")]
    pub is_public: Option<bool>,
}

impl<'a> CollectionManager<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the collections table
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS annotation_collections (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                is_public INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_collections_user ON annotation_collections(user_id);
            "#,
        )
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn create(&self, input: NewCollection) -> Result<AnnotationCollection> {
        if input.user_id.trim().is_empty() {
            return Err(AppError::Validation("userId is required".to_string()));
        }
        if input.name.trim().is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }

        let now = Utc::now();
        let collection = AnnotationCollection {
            id: Uuid::new_v4().to_string(),
            user_id: input.user_id,
            name: input.name,
            description: input.description,
            is_public: input.is_public.unwrap_or(false),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO annotation_collections (id, user_id, name, description, is_public, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&collection.id)
        .bind(&collection.user_id)
        .bind(&collection.name)
        .bind(&collection.description)
        .bind(collection.is_public)
        .bind(collection.created_at.to_rfc3339())
        .bind(collection.updated_at.to_rfc3339())
        .execute(self.pool)
        .await?;

        Ok(collection)
    }

    pub async fn get(&self, id: &str) -> Result<Option<AnnotationCollection>> {
        let row = sqlx::query_as::<_, CollectionRow>(
            r#"
            SELECT id, user_id, name, description, is_public, created_at, updated_at
            FROM annotation_collections
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(|r| r.into_collection()).transpose()
    }

    pub async fn update(
        &self,
        id: &str,
        user_id: &str,
        patch: CollectionPatch,
    ) -> Result<AnnotationCollection> {
        let mut collection = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Collection not found: {id}")))?;

        if collection.user_id != user_id {
            return Err(AppError::PermissionDenied(
                "Only the owner may edit a collection".to_string(),
            ));
        }

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("name must not be empty".to_string()));
            }
            collection.name = name;
        }
        if let Some(description) = patch.description {
            collection.description = Some(description);
        }
        if let Some(is_public) = patch.is_public {
            collection.is_public = is_public;
        }
        collection.updated_at = Utc::now();

        sqlx::query(
            r#"
            UPDATE annotation_collections
            SET name = ?, description = ?, is_public = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&collection.name)
        .bind(&collection.description)
        .bind(collection.is_public)
        .bind(collection.updated_at.to_rfc3339())
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(collection)
    }

    /// Delete a collection: detach every member annotation first, then
    /// remove the collection row, in one transaction.
    pub async fn delete(&self, id: &str, user_id: &str) -> Result<()> {
        let collection = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Collection not found: {id}")))?;

        if collection.user_id != user_id {
            return Err(AppError::PermissionDenied(
                "Only the owner may delete a collection".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE annotations SET collection_id = NULL WHERE collection_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM annotation_collections WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Collections owned by the caller unioned with public ones, paginated.
    /// The count query and the data query share one predicate path.
    pub async fn list(
        &self,
        user_id: &str,
        params: PageParams,
    ) -> Result<(Vec<AnnotationCollection>, Pagination)> {
        fn push_predicates<'q>(qb: &mut QueryBuilder<'q, Sqlite>, user_id: &str) {
            qb.push(" WHERE (user_id = ")
                .push_bind(user_id.to_string())
                .push(" OR is_public = 1)");
        }

        let mut count_query =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM annotation_collections");
        push_predicates(&mut count_query, user_id);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(self.pool)
            .await?;

        let mut data_query = QueryBuilder::<Sqlite>::new(
            "SELECT id, user_id, name, description, is_public, created_at, updated_at \
             FROM annotation_collections",
        );
        push_predicates(&mut data_query, user_id);
        data_query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(params.limit)
            .push(" OFFSET ")
            .push_bind(params.offset());
        let rows: Vec<CollectionRow> = data_query
            .build_query_as()
            .fetch_all(self.pool)
            .await?;

        let collections = rows
            .into_iter()
            .map(|r| r.into_collection())
            .collect::<Result<Vec<_>>>()?;

        Ok((collections, Pagination::new(params, total)))
    }
}

/// Internal row type for SQLite queries
#[derive(sqlx::FromRow)]
struct CollectionRow {
    id: String,
    user_id: String,
    name: String,
    description: Option<String>,
    is_public: bool,
    created_at: String,
    updated_at: String,
}

impl CollectionRow {
    fn into_collection(self) -> Result<AnnotationCollection> {
        Ok(AnnotationCollection {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            description: self.description,
            is_public: self.is_public,
            created_at: types::decode_timestamp(&self.created_at)?,
            updated_at: types::decode_timestamp(&self.updated_at)?,
        })
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
        CollectionManager::new(&pool).init().await.unwrap();
        pool
    }

    fn new_collection(user_id: &str, name: &str) -> NewCollection {
        NewCollection {
            user_id: user_id.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let pool = setup_test_db().await;
        let collections = CollectionManager::new(&pool);

        let created = collections
            .create(NewCollection {
                description: Some("reading list".to_string()),
                ..new_collection("u-1", "History")
            })
            .await
            .unwrap();
        assert!(!created.is_public);

        let loaded = collections.get(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "History");
        assert_eq!(loaded.description.as_deref(), Some("reading list"));
    }

    #[tokio::test]
    async fn test_create_requires_name_and_owner() {
        let pool = setup_test_db().await;
        let collections = CollectionManager::new(&pool);

        assert!(matches!(
            collections.create(new_collection("u-1", "  ")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            collections.create(new_collection("", "History")).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_checks_ownership() {
        let pool = setup_test_db().await;
        let collections = CollectionManager::new(&pool);

        let created = collections.create(new_collection("u-1", "History")).await.unwrap();

        let patch = CollectionPatch {
            is_public: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            collections.update(&created.id, "u-2", patch.clone()).await,
            Err(AppError::PermissionDenied(_))
        ));

        let updated = collections.update(&created.id, "u-1", patch).await.unwrap();
        assert!(updated.is_public);
    }

    #[tokio::test]
    async fn test_delete_detaches_members_without_deleting_them() {
        let pool = setup_test_db().await;
        let collections = CollectionManager::new(&pool);
        let store = AnnotationStore::new(&pool);

        let collection = collections.create(new_collection("u-1", "History")).await.unwrap();
        let annotation = store
            .create(NewAnnotation {
                user_id: "u-1".to_string(),
                text: "member".to_string(),
                article_id: Some("article-1".to_string()),
                collection_id: Some(collection.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();

        collections.delete(&collection.id, "u-1").await.unwrap();

        assert!(collections.get(&collection.id).await.unwrap().is_none());
        let detached = store.get(&annotation.id).await.unwrap().unwrap();
        assert!(detached.collection_id.is_none());
        assert_eq!(detached.text, "member");
    }

    #[tokio::test]
    async fn test_list_unions_owned_and_public() {
        let pool = setup_test_db().await;
        let collections = CollectionManager::new(&pool);

        collections.create(new_collection("u-1", "Mine private")).await.unwrap();
        collections
            .create(NewCollection {
                is_public: Some(true),
                ..new_collection("u-2", "Theirs public")
            })
            .await
            .unwrap();
        collections.create(new_collection("u-2", "Theirs private")).await.unwrap();

        let (rows, pagination) = collections.list("u-1", PageParams::default()).await.unwrap();
        assert_eq!(pagination.total_count, 2);
        let names: Vec<_> = rows.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Mine private"));
        assert!(names.contains(&"Theirs public"));
    }

    #[tokio::test]
    async fn test_list_pagination_math() {
        let pool = setup_test_db().await;
        let collections = CollectionManager::new(&pool);

        for i in 0..5 {
            collections
                .create(new_collection("u-1", &format!("c{i}")))
                .await
                .unwrap();
        }

        let (rows, pagination) = collections
            .list("u-1", PageParams::new(Some(2), Some(2)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(pagination.total_count, 5);
        assert_eq!(pagination.total_pages, 3);
    }
}
