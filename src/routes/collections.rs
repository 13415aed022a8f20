//! Annotation collection API routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::annotations::{
    AnnotationFilter, AnnotationStore, CollectionManager, CollectionPatch, NewCollection,
    PageParams,
};
use crate::cache::invalidation::{self, Mutation};
use crate::cache::CacheTier;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Create the collections router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_collections).post(create_collection))
        .route(
            "/:id",
            get(get_collection)
                .put(update_collection)
                .delete(delete_collection),
        )
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

async fn list_collections(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>> {
    let user_id = query
        .user_id
        .ok_or_else(|| AppError::Validation("userId is required".to_string()))?;
    let params = PageParams::new(query.page, query.limit);

    let key = format!(
        "annotation-collections:{user_id}:{}:{}",
        params.page, params.limit
    );
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(Json(cached));
    }

    let collections = CollectionManager::new(state.db());
    let (rows, pagination) = collections.list(&user_id, params).await?;

    let body = json!({ "collections": rows, "pagination": pagination });
    state.cache.put(key, body.clone(), CacheTier::Short).await;
    Ok(Json(body))
}

async fn create_collection(
    State(state): State<AppState>,
    Json(input): Json<NewCollection>,
) -> Result<Response> {
    let collections = CollectionManager::new(state.db());
    let collection = collections.create(input).await?;

    invalidation::apply(&state.cache, Mutation::CollectionCreated).await;

    Ok((StatusCode::CREATED, Json(collection)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct GetQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    page: Option<i64>,
    limit: Option<i64>,
}

/// A collection with a paginated slice of its member annotations. Private
/// collections are visible to their owner only.
async fn get_collection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<Json<Value>> {
    let params = PageParams::new(query.page, query.limit);
    let caller = query.user_id;

    let key = format!(
        "annotation-collection:{id}:{}:{}:{}",
        caller.as_deref().unwrap_or("-"),
        params.page,
        params.limit
    );
    if let Some(cached) = state.cache.get(&key).await {
        return Ok(Json(cached));
    }

    let collections = CollectionManager::new(state.db());
    let collection = collections
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Collection not found: {id}")))?;

    let is_owner = caller.as_deref() == Some(collection.user_id.as_str());
    if !collection.is_public && !is_owner {
        return Err(AppError::PermissionDenied(
            "This collection is private".to_string(),
        ));
    }

    let filter = AnnotationFilter {
        collection_id: Some(id.clone()),
        user_id: is_owner.then(|| collection.user_id.clone()),
        ..Default::default()
    };
    let store = AnnotationStore::new(state.db());
    let (annotations, pagination) = store.list(&filter, params).await?;

    let body = json!({
        "collection": collection,
        "annotations": annotations,
        "pagination": pagination,
    });
    state.cache.put(key, body.clone(), CacheTier::Medium).await;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(flatten)]
    patch: CollectionPatch,
}

async fn update_collection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Value>> {
    let user_id = request
        .user_id
        .ok_or_else(|| AppError::Validation("userId is required".to_string()))?;

    let collections = CollectionManager::new(state.db());
    let collection = collections.update(&id, &user_id, request.patch).await?;

    invalidation::apply(&state.cache, Mutation::CollectionUpdated { id }).await;

    Ok(Json(serde_json::to_value(collection)?))
}

#[derive(Debug, Deserialize)]
pub struct ActorQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

async fn delete_collection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ActorQuery>,
) -> Result<StatusCode> {
    let user_id = query
        .user_id
        .ok_or_else(|| AppError::Validation("userId is required".to_string()))?;

    let collections = CollectionManager::new(state.db());
    collections.delete(&id, &user_id).await?;

    invalidation::apply(&state.cache, Mutation::CollectionDeleted { id }).await;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{ReactionAggregator, VersionLedger};
    use crate::cache::ResponseCache;
    use axum_test::TestServer;
    use sqlx::SqlitePool;

    async fn test_server() -> TestServer {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        AnnotationStore::new(&pool).init().await.unwrap();
        VersionLedger::new(&pool).init().await.unwrap();
        ReactionAggregator::new(&pool).init().await.unwrap();
        CollectionManager::new(&pool).init().await.unwrap();

        let state = AppState::new(pool, ResponseCache::default());
        let app = Router::new()
            .nest("/annotations/collections", router())
            .nest("/annotations", crate::routes::annotations::router())
            .with_state(state);
        TestServer::new(app).unwrap()
    }

    async fn create_collection_via_api(server: &TestServer, user_id: &str, name: &str) -> Value {
        let response = server
            .post("/annotations/collections")
            .json(&json!({ "userId": user_id, "name": name }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        response.json::<Value>()
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let server = test_server().await;

        let response = server
            .post("/annotations/collections")
            .json(&json!({ "userId": "u-1" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_private_collection_is_owner_only() {
        let server = test_server().await;
        let collection = create_collection_via_api(&server, "u-1", "History").await;
        let id = collection["id"].as_str().unwrap();

        let response = server
            .get(&format!("/annotations/collections/{id}"))
            .add_query_param("userId", "u-2")
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        let response = server
            .get(&format!("/annotations/collections/{id}"))
            .add_query_param("userId", "u-1")
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>()["collection"]["name"], "History");

        let response = server
            .get("/annotations/collections/no-such-id")
            .add_query_param("userId", "u-1")
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_collection_members_come_back_with_pagination() {
        let server = test_server().await;
        let collection = create_collection_via_api(&server, "u-1", "History").await;
        let id = collection["id"].as_str().unwrap();

        for i in 0..3 {
            let response = server
                .post("/annotations")
                .json(&json!({
                    "userId": "u-1",
                    "text": format!("note {i}"),
                    "articleId": "article-1",
                    "collectionId": id,
                }))
                .await;
            assert_eq!(response.status_code(), StatusCode::CREATED);
        }

        let response = server
            .get(&format!("/annotations/collections/{id}"))
            .add_query_param("userId", "u-1")
            .add_query_param("limit", "2")
            .await;
        let body = response.json::<Value>();
        assert_eq!(body["annotations"].as_array().unwrap().len(), 2);
        assert_eq!(body["pagination"]["totalCount"], 3);
        assert_eq!(body["pagination"]["totalPages"], 2);
    }

    #[tokio::test]
    async fn test_update_and_delete_enforce_ownership() {
        let server = test_server().await;
        let collection = create_collection_via_api(&server, "u-1", "History").await;
        let id = collection["id"].as_str().unwrap();

        let response = server
            .put(&format!("/annotations/collections/{id}"))
            .json(&json!({ "userId": "u-2", "name": "Stolen" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        let response = server
            .put(&format!("/annotations/collections/{id}"))
            .json(&json!({ "userId": "u-1", "isPublic": true }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>()["isPublic"], true);

        let response = server
            .delete(&format!("/annotations/collections/{id}"))
            .add_query_param("userId", "u-2")
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        let response = server
            .delete(&format!("/annotations/collections/{id}"))
            .add_query_param("userId", "u-1")
            .await;
        assert_eq!(response.status_code(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_list_requires_user_and_reflects_mutations() {
        let server = test_server().await;

        let response = server.get("/annotations/collections").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        create_collection_via_api(&server, "u-1", "First").await;
        let response = server
            .get("/annotations/collections")
            .add_query_param("userId", "u-1")
            .await;
        assert_eq!(response.json::<Value>()["pagination"]["totalCount"], 1);

        // Creation invalidates the cached listing
        create_collection_via_api(&server, "u-1", "Second").await;
        let response = server
            .get("/annotations/collections")
            .add_query_param("userId", "u-1")
            .await;
        assert_eq!(response.json::<Value>()["pagination"]["totalCount"], 2);
    }
}
