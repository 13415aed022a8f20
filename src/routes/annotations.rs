//! Annotation API routes
//!
//! Read paths are fronted by the response cache; mutation handlers fire the
//! cache invalidator only after the store's transaction has committed.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::annotations::types::DEFAULT_REACTION_TYPE;
use crate::annotations::{
    AnnotationFilter, AnnotationPatch, AnnotationStore, DeleteOutcome, NewAnnotation, PageParams,
    ReactionAggregator, VersionLedger,
};
use crate::cache::invalidation::{self, Mutation};
use crate::cache::CacheTier;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the annotations router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_annotations).post(create_annotation))
        .route(
            "/:id",
            get(get_annotation)
                .put(update_annotation)
                .delete(delete_annotation),
        )
        .route("/:id/reactions", post(add_reaction))
        .route("/:id/reactions/:user_id", delete(remove_reaction))
        .route("/:id/versions", get(list_versions))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "articleId")]
    article_id: Option<String>,
    url: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(rename = "collectionId")]
    collection_id: Option<String>,
    #[serde(rename = "parentId")]
    parent_id: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

async fn list_annotations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>> {
    let filter = AnnotationFilter {
        article_id: query.article_id,
        url: query.url,
        user_id: query.user_id,
        collection_id: query.collection_id,
        parent_id: query.parent_id,
    };
    let params = PageParams::new(query.page, query.limit);

    let key = format!(
        "annotations:{}:{}:{}",
        filter.fingerprint(),
        params.page,
        params.limit
    );
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(Json(cached));
    }

    let store = AnnotationStore::new(state.db());
    let (annotations, pagination) = store.list(&filter, params).await?;

    let body = json!({ "annotations": annotations, "pagination": pagination });
    state.cache.put(key, body.clone(), CacheTier::Short).await;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct GetQuery {
    #[serde(rename = "includeReplies")]
    include_replies: Option<bool>,
    #[serde(rename = "includeVersions")]
    include_versions: Option<bool>,
}

async fn get_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<Json<Value>> {
    let include_replies = query.include_replies.unwrap_or(false);
    let include_versions = query.include_versions.unwrap_or(false);

    let key = format!("annotation:{id}:{include_replies}:{include_versions}");
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(Json(cached));
    }

    let store = AnnotationStore::new(state.db());
    let annotation = store
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Annotation not found: {id}")))?;

    let mut body = serde_json::to_value(&annotation)?;
    if include_replies {
        body["replies"] = serde_json::to_value(store.replies(&id).await?)?;
    }
    if include_versions {
        let (versions, _) = VersionLedger::new(state.db())
            .list(&id, PageParams::default())
            .await?;
        body["versions"] = serde_json::to_value(versions)?;
    }

    state.cache.put(key, body.clone(), CacheTier::Medium).await;
    Ok(Json(body))
}

async fn create_annotation(
    State(state): State<AppState>,
    Json(input): Json<NewAnnotation>,
) -> Result<Response> {
    let store = AnnotationStore::new(state.db());
    let annotation = store.create(input).await?;

    invalidation::apply(
        &state.cache,
        Mutation::AnnotationCreated {
            parent_id: annotation.parent_id.clone(),
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(annotation)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(flatten)]
    patch: AnnotationPatch,
}

async fn update_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Value>> {
    let user_id = request
        .user_id
        .ok_or_else(|| AppError::Validation("userId is required".to_string()))?;

    let store = AnnotationStore::new(state.db());
    let annotation = store.update(&id, &user_id, request.patch).await?;

    invalidation::apply(&state.cache, Mutation::AnnotationUpdated { id }).await;

    Ok(Json(serde_json::to_value(annotation)?))
}

#[derive(Debug, Deserialize)]
pub struct ActorQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

async fn delete_annotation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ActorQuery>,
) -> Result<Response> {
    let user_id = query
        .user_id
        .ok_or_else(|| AppError::Validation("userId is required".to_string()))?;

    let store = AnnotationStore::new(state.db());
    match store.delete(&id, &user_id).await? {
        DeleteOutcome::Hard { parent_id } => {
            invalidation::apply(&state.cache, Mutation::AnnotationDeleted { id, parent_id }).await;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        DeleteOutcome::Soft(annotation) => {
            invalidation::apply(
                &state.cache,
                Mutation::AnnotationDeleted {
                    id,
                    parent_id: annotation.parent_id.clone(),
                },
            )
            .await;
            let body = json!({
                "message": "Annotation has replies; content removed, thread preserved",
                "annotation": annotation,
            });
            Ok((StatusCode::OK, Json(body)).into_response())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(rename = "type")]
    reaction_type: Option<String>,
}

async fn add_reaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReactionRequest>,
) -> Result<Response> {
    let user_id = request
        .user_id
        .ok_or_else(|| AppError::Validation("userId is required".to_string()))?;
    let reaction_type = request
        .reaction_type
        .unwrap_or_else(|| DEFAULT_REACTION_TYPE.to_string());

    let reactions = ReactionAggregator::new(state.db());
    let (reaction, created) = reactions.add_or_update(&id, &user_id, &reaction_type).await?;

    invalidation::apply(&state.cache, Mutation::ReactionChanged { annotation_id: id }).await;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(reaction)).into_response())
}

async fn remove_reaction(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let reactions = ReactionAggregator::new(state.db());
    reactions.remove(&id, &user_id).await?;

    invalidation::apply(&state.cache, Mutation::ReactionChanged { annotation_id: id }).await;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct VersionsQuery {
    page: Option<i64>,
    limit: Option<i64>,
}

async fn list_versions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<VersionsQuery>,
) -> Result<Json<Value>> {
    let params = PageParams::new(query.page, query.limit);

    let key = format!("annotation-versions:{id}:{}:{}", params.page, params.limit);
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(Json(cached));
    }

    let store = AnnotationStore::new(state.db());
    if store.get(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("Annotation not found: {id}")));
    }

    let (versions, pagination) = VersionLedger::new(state.db()).list(&id, params).await?;

    let body = json!({ "versions": versions, "pagination": pagination });
    state.cache.put(key, body.clone(), CacheTier::Long).await;
    Ok(Json(body))
}
