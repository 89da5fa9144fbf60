//! Administrative cache endpoints
//!
//! - `GET  /cache/stats`               -> `{ success, data: Stats }`
//! - `POST /cache/clear[/:entity_type]` -> `{ success, message, data: { cleared, entityType } }`

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;

use crate::{
    CacheOrchestrator, InvalidationRouter, Stats, invalidation::ALL_ENTITIES,
};

#[derive(Clone)]
pub struct AdminState {
    cache: CacheOrchestrator,
    invalidation: InvalidationRouter,
}

impl AdminState {
    pub fn new(cache: CacheOrchestrator, invalidation: InvalidationRouter) -> Self {
        Self {
            cache,
            invalidation,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResult {
    pub cleared: u64,
    pub entity_type: String,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/cache/stats", get(stats))
        .route("/cache/clear", post(clear_all))
        .route("/cache/clear/:entity_type", post(clear_entity))
        .with_state(state)
}

async fn stats(State(state): State<AdminState>) -> Json<ApiResponse<Stats>> {
    Json(ApiResponse {
        success: true,
        message: None,
        data: state.cache.stats().await,
    })
}

async fn clear_all(State(state): State<AdminState>) -> Json<ApiResponse<ClearResult>> {
    clear(&state, ALL_ENTITIES).await
}

async fn clear_entity(
    State(state): State<AdminState>,
    Path(entity_type): Path<String>,
) -> Json<ApiResponse<ClearResult>> {
    clear(&state, &entity_type).await
}

async fn clear(state: &AdminState, entity_type: &str) -> Json<ApiResponse<ClearResult>> {
    let entity_type = entity_type.trim().to_lowercase();
    let cleared = state.invalidation.invalidate(&entity_type).await;
    let message = if entity_type == ALL_ENTITIES {
        format!("Cleared {} cached entries", cleared)
    } else {
        format!("Cleared {} cached entries for {}", cleared, entity_type)
    };

    Json(ApiResponse {
        success: true,
        message: Some(message),
        data: ClearResult {
            cleared,
            entity_type,
        },
    })
}
