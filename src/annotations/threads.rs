//! Thread consistency: reply counters and the deletion policy
//!
//! Reply counters are maintained incrementally, in the same transaction as
//! the child insert or delete; the transaction's lock on the parent row keeps
//! the counter exact under concurrent replies.

use sqlx::SqliteConnection;

use crate::error::Result;

/// What deleting an annotation does to its row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Replace content with the tombstone marker; the row and its id survive
    /// so existing replies stay attached to a valid parent.
    Soft,
    /// Remove the row and its dependent version/reaction rows.
    Hard,
}

pub struct ThreadManager;

impl ThreadManager {
    /// Annotations with live replies are tombstoned; leaf rows are removed.
    pub fn policy_for(reply_count: i64) -> DeletePolicy {
        if reply_count > 0 {
            DeletePolicy::Soft
        } else {
            DeletePolicy::Hard
        }
    }

    pub async fn increment_reply_count(
        conn: &mut SqliteConnection,
        parent_id: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE annotations SET reply_count = reply_count + 1 WHERE id = ?")
            .bind(parent_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Floored at zero to guard against double-decrement races
    pub async fn decrement_reply_count(
        conn: &mut SqliteConnection,
        parent_id: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE annotations SET reply_count = MAX(reply_count - 1, 0) WHERE id = ?")
            .bind(parent_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    #[test]
    fn test_policy_branches_on_reply_count() {
        assert_eq!(ThreadManager::policy_for(0), DeletePolicy::Hard);
        assert_eq!(ThreadManager::policy_for(1), DeletePolicy::Soft);
        assert_eq!(ThreadManager::policy_for(42), DeletePolicy::Soft);
    }

    async fn setup_parent_row() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE annotations (id TEXT PRIMARY KEY, reply_count INTEGER NOT NULL DEFAULT 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO annotations (id, reply_count) VALUES ('parent', 0)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    async fn reply_count(pool: &SqlitePool) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT reply_count FROM annotations WHERE id = 'parent'")
            .fetch_one(pool)
            .await
            .unwrap();
        row.0
    }

    #[tokio::test]
    async fn test_increment_and_decrement() {
        let pool = setup_parent_row().await;

        let mut tx = pool.begin().await.unwrap();
        ThreadManager::increment_reply_count(&mut tx, "parent").await.unwrap();
        ThreadManager::increment_reply_count(&mut tx, "parent").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(reply_count(&pool).await, 2);

        let mut tx = pool.begin().await.unwrap();
        ThreadManager::decrement_reply_count(&mut tx, "parent").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(reply_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_decrement_never_goes_negative() {
        let pool = setup_parent_row().await;

        let mut tx = pool.begin().await.unwrap();
        ThreadManager::decrement_reply_count(&mut tx, "parent").await.unwrap();
        ThreadManager::decrement_reply_count(&mut tx, "parent").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(reply_count(&pool).await, 0);
    }
}
