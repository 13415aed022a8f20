//! Shared application state

use sqlx::SqlitePool;

use crate::cache::ResponseCache;

#[derive(Clone)]
pub struct AppState {
    pool: SqlitePool,
    pub cache: ResponseCache,
}

impl AppState {
    pub fn new(pool: SqlitePool, cache: ResponseCache) -> Self {
        Self { pool, cache }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.pool
    }
}
