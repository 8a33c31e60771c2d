//! HTTP routes for identifier allocation and posts.
//!
//! | Method | Path             | Success                      |
//! |--------|------------------|------------------------------|
//! | GET    | `/generate-hash` | `200 {"hash": ...}`          |
//! | POST   | `/create_post`   | `200 {"short_url": ...}`     |
//! | GET    | `/healthz`       | `200`, or `503` when stopped |
//! | GET    | `/{hash}`        | `200 {"text": ...}`          |

use crate::server::{
    service::error::ApiError,
    telemetry::{increment_ids_allocated, increment_posts_created},
};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use pastid::{Identifier, PostService, TaskHealth};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    posts: Arc<PostService>,
    public_base_url: Arc<str>,
    refill_health: watch::Receiver<TaskHealth>,
}

impl AppState {
    pub fn new(
        posts: Arc<PostService>,
        public_base_url: &str,
        refill_health: watch::Receiver<TaskHealth>,
    ) -> Self {
        Self {
            posts,
            public_base_url: Arc::from(public_base_url),
            refill_health,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HashResponse {
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePost {
    pub text: String,
    pub ttl: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePostResponse {
    pub short_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub refill: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generate-hash", get(generate_hash))
        .route("/create_post", post(create_post))
        .route("/healthz", get(healthz))
        .route("/{hash}", get(read_post))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn generate_hash(State(state): State<AppState>) -> Result<Json<HashResponse>, ApiError> {
    let allocation = state.posts.allocator().allocate().await?;
    increment_ids_allocated(allocation.path.as_str());
    Ok(Json(HashResponse {
        hash: allocation.identifier.to_string(),
    }))
}

async fn create_post(
    State(state): State<AppState>,
    payload: Result<Json<CreatePost>, JsonRejection>,
) -> Result<Json<CreatePostResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::Unprocessable(e.body_text()))?;
    let created = state.posts.create(request.text, request.ttl).await?;
    increment_posts_created(created.tier.as_str());
    Ok(Json(CreatePostResponse {
        short_url: format!("{}/{}", state.public_base_url, created.identifier),
    }))
}

async fn read_post(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<PostResponse>, ApiError> {
    let id = Identifier::parse(&hash).map_err(|_| ApiError::NotFound)?;
    match state.posts.fetch(&id).await? {
        Some(text) => Ok(Json(PostResponse { text })),
        None => Err(ApiError::NotFound),
    }
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.refill_health.borrow().clone();
    let refill = match &health {
        TaskHealth::Starting => "starting",
        TaskHealth::Healthy => "healthy",
        TaskHealth::Degraded { .. } => "degraded",
        TaskHealth::Stopped => "stopped",
    };
    let (code, status) = if health.is_serving() {
        (StatusCode::OK, "serving")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_serving")
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            refill: refill.to_string(),
        }),
    )
}
