use std::sync::Arc;

use axum::{
    extract::State,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use serde_json::json;
use tower_sessions::{MemoryStore, Session, SessionManagerLayer};

use crate::auth::{self, Authenticated, SessionStore};
use crate::config::Config;
use crate::deep;
use crate::error::AppError;
use crate::extract;
use crate::models::{
    CreatePostRequest, CreatePostResponse, ExtractRequest, ExtractionResult, LoginRequest,
};
use crate::page;
use crate::publish::{self, ContentRepository, LinkPost};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repository: Arc<dyn ContentRepository>,
}

pub fn router(state: AppState) -> Router {
    let sessions = SessionManagerLayer::new(MemoryStore::default()).with_secure(false);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/fetch-metadata", post(fetch_metadata))
        .route("/fetch-metadata-deep", post(fetch_metadata_deep))
        .route("/create-post", post(create_post))
        .layer(sessions)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn index(State(state): State<AppState>, session: Session) -> Result<Html<String>, AppError> {
    let debug = state.config.debug_mode;
    let authenticated = debug || session.is_authenticated().await?;
    Ok(Html(page::render(authenticated, debug)))
}

async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    if state.config.debug_mode {
        session.set_authenticated().await?;
    } else {
        auth::login(&session, &state.config.api_token, &req.token).await?;
    }
    Ok(Json(json!({"success": true})))
}

async fn logout(session: Session) -> Result<impl IntoResponse, AppError> {
    session.revoke().await?;
    Ok(Json(json!({"success": true})))
}

fn required_url(req: &ExtractRequest) -> Result<&str, AppError> {
    let url = req.url.trim();
    if url.is_empty() {
        return Err(AppError::BadRequest("URL is required".to_string()));
    }
    Ok(url)
}

async fn fetch_metadata(
    _auth: Authenticated,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractionResult>, AppError> {
    let url = required_url(&req)?;
    Ok(Json(extract::extract_metadata(url).await))
}

async fn fetch_metadata_deep(
    _auth: Authenticated,
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ExtractionResult>, AppError> {
    let url = required_url(&req)?;
    Ok(Json(
        deep::extract_metadata_deep(url, state.config.chrome_path.as_deref()).await,
    ))
}

async fn create_post(
    _auth: Authenticated,
    State(state): State<AppState>,
    Json(req): Json<CreatePostRequest>,
) -> Result<Json<CreatePostResponse>, AppError> {
    let post = LinkPost {
        url: req.url,
        title: req.title,
        source: req.source,
        excerpt: req.excerpt,
        commentary: req.content,
        image_url: req.image,
    };
    let published =
        publish::publish_link(state.repository.as_ref(), post, Local::now().fixed_offset()).await?;

    let dry_run = state.repository.is_dry_run();
    tracing::debug!(path = %published.document_path, dry_run, "create-post done");
    Ok(Json(CreatePostResponse {
        success: true,
        filename: published.filename,
        debug_content: dry_run.then_some(published.document),
        image_info: if dry_run { published.image_path } else { None },
    }))
}
