//! Filtered, paginated annotation queries
//!
//! The count query and the data query for a listing are assembled from one
//! predicate-construction path (`push_predicates`), so their filter sets
//! cannot diverge.

use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Query filters for listing annotations
#[derive(Debug, Clone, Default)]
pub struct AnnotationFilter {
    pub article_id: Option<String>,
    pub url: Option<String>,
    /// The authenticated caller listing their own rows. When absent, only
    /// public rows match.
    pub user_id: Option<String>,
    pub collection_id: Option<String>,
    /// Thread view: replies of this parent. When absent, reply rows are
    /// excluded so top-level listings stay free of child clutter.
    pub parent_id: Option<String>,
}

impl AnnotationFilter {
    /// Stable fingerprint used to key cached list responses
    pub fn fingerprint(&self) -> String {
        fn part(v: &Option<String>) -> &str {
            v.as_deref().unwrap_or("-")
        }
        format!(
            "{}:{}:{}:{}:{}",
            part(&self.article_id),
            part(&self.url),
            part(&self.user_id),
            part(&self.collection_id),
            part(&self.parent_id),
        )
    }
}

/// Normalized page/limit pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: i64,
    pub limit: i64,
}

impl PageParams {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Pagination metadata returned alongside every listed slice
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    #[serde(rename = "totalCount")]
    pub total_count: i64,
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(params: PageParams, total_count: i64) -> Self {
        Self {
            page: params.page,
            limit: params.limit,
            total_count,
            total_pages: (total_count + params.limit - 1) / params.limit,
        }
    }
}

/// Append the WHERE clause for a filter set.
///
/// Visibility rule: a `user_id` filter means the caller is listing their own
/// rows, at any visibility; without it only public rows match.
pub fn push_predicates(qb: &mut QueryBuilder<'_, Sqlite>, filter: &AnnotationFilter) {
    qb.push(" WHERE 1=1");

    if let Some(article_id) = &filter.article_id {
        qb.push(" AND article_id = ").push_bind(article_id.clone());
    }
    if let Some(url) = &filter.url {
        qb.push(" AND url = ").push_bind(url.clone());
    }
    match &filter.user_id {
        Some(user_id) => {
            qb.push(" AND user_id = ").push_bind(user_id.clone());
        }
        None => {
            qb.push(" AND visibility = 'public'");
        }
    }
    if let Some(collection_id) = &filter.collection_id {
        qb.push(" AND collection_id = ").push_bind(collection_id.clone());
    }
    match &filter.parent_id {
        Some(parent_id) => {
            qb.push(" AND parent_id = ").push_bind(parent_id.clone());
        }
        None => {
            qb.push(" AND parent_id IS NULL");
        }
    }
}

/// Append the deterministic ordering and page window
pub fn push_page(qb: &mut QueryBuilder<'_, Sqlite>, params: PageParams) {
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(params.limit)
        .push(" OFFSET ")
        .push_bind(params.offset());
}
