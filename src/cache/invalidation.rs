//! Post-commit cache invalidation
//!
//! Maps a completed mutation to the key prefixes whose cached responses it
//! obsoletes. Handlers call [`apply`] only after the owning transaction has
//! committed; a rolled-back mutation must never clear a cache entry that
//! still reflects valid state. Invalidation problems are logged, never
//! surfaced to the caller.

use super::ResponseCache;

/// A committed mutation, described just enough to name its affected keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    AnnotationCreated { parent_id: Option<String> },
    AnnotationUpdated { id: String },
    AnnotationDeleted { id: String, parent_id: Option<String> },
    ReactionChanged { annotation_id: String },
    CollectionCreated,
    CollectionUpdated { id: String },
    CollectionDeleted { id: String },
}

/// The cache-key prefixes a mutation invalidates.
///
/// Reaction mutations touch only the single-item key: reaction counts do not
/// affect list-level filtering. Version-history keys ride on updates, the
/// only mutation that appends to the ledger of an already-cached history.
pub fn affected_prefixes(mutation: &Mutation) -> Vec<String> {
    match mutation {
        Mutation::AnnotationCreated { parent_id } => {
            let mut prefixes = vec!["annotations:".to_string()];
            if let Some(parent_id) = parent_id {
                prefixes.push(format!("annotation:{parent_id}"));
            }
            prefixes
        }
        Mutation::AnnotationUpdated { id } => vec![
            "annotations:".to_string(),
            format!("annotation:{id}"),
            format!("annotation-versions:{id}"),
        ],
        Mutation::AnnotationDeleted { id, parent_id } => {
            let mut prefixes = vec!["annotations:".to_string(), format!("annotation:{id}")];
            if let Some(parent_id) = parent_id {
                prefixes.push(format!("annotation:{parent_id}"));
            }
            prefixes
        }
        Mutation::ReactionChanged { annotation_id } => {
            vec![format!("annotation:{annotation_id}")]
        }
        Mutation::CollectionCreated => vec!["annotation-collections:".to_string()],
        Mutation::CollectionUpdated { id } | Mutation::CollectionDeleted { id } => vec![
            "annotation-collections:".to_string(),
            format!("annotation-collection:{id}"),
        ],
    }
}

/// Clear the affected prefixes for a committed mutation
pub async fn apply(cache: &ResponseCache, mutation: Mutation) {
    for prefix in affected_prefixes(&mutation) {
        let dropped = cache.invalidate_prefix(&prefix).await;
        if dropped > 0 {
            tracing::debug!(%prefix, dropped, "invalidated cached responses");
        }
    }
}
