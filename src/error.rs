use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

// ── Extraction ───────────────────────────────────────────────────────────────

/// Failure while fetching a page in static mode.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Upstream returned HTTP {0}")]
    Status(u16),
    #[error("Request failed: {0}")]
    Request(String),
}

impl FetchError {
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout)
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

/// Failure while rendering a page in a headless browser.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to launch browser: {0}")]
    Launch(String),
    #[error("Navigation timed out after {0} seconds")]
    NavigationTimeout(u64),
    #[error("Navigation failed: {0}")]
    Navigation(String),
    #[error("Page script failed: {0}")]
    Script(String),
}

// ── Image normalization ──────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ImageProcessingError {
    #[error("Failed to process image: download timed out after {0:?}")]
    Timeout(Duration),
    #[error("Failed to process image: connection error: {0}")]
    Connection(String),
    #[error("Failed to process image: HTTP {0}")]
    Status(u16),
    #[error("Failed to process image: request failed: {0}")]
    Request(String),
    #[error("Failed to process image: could not decode: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Failed to process image: could not encode: {0}")]
    Encode(#[source] image::ImageError),
}

impl ImageProcessingError {
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ImageProcessingError::Timeout(timeout)
        } else if err.is_connect() {
            ImageProcessingError::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            ImageProcessingError::Status(status.as_u16())
        } else {
            ImageProcessingError::Request(err.to_string())
        }
    }

    /// True for failures that happened before any bytes were decoded.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ImageProcessingError::Timeout(_)
                | ImageProcessingError::Connection(_)
                | ImageProcessingError::Status(_)
                | ImageProcessingError::Request(_)
        )
    }
}

// ── Auth / documents / publishing ────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Session store failed: {0}")]
    Session(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Missing required front matter field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("GitHub token not configured")]
    NotConfigured,
    #[error("GitHub API returned HTTP {status} for {path}: {message}")]
    Api {
        status: u16,
        path: String,
        message: String,
    },
    #[error("GitHub request failed: {0}")]
    Request(#[from] reqwest::Error),
}

// ── HTTP boundary ────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Image(#[from] ImageProcessingError),
    #[error("Failed to create post: {0}")]
    Publish(#[from] PublishError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) | AppError::Document(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(AuthError::Session(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Image(_) | AppError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}
