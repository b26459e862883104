use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    #[serde(default)]
    pub url: String,
}

/// Best-effort page metadata. Failures are reported in `error` rather than
/// as a transport error so the form can show the message inline.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct ExtractionResult {
    pub title: Option<String>,
    pub source: String,
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatePostResponse {
    pub success: bool,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_info: Option<String>,
}
