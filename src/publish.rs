//! Publishing link posts to the site repository.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, FixedOffset, Local};
use reqwest::StatusCode;
use serde_json::json;

use crate::document::{slugify, PostDocument};
use crate::error::{AppError, PublishError};
use crate::normalize::normalize_image;

pub const CONTENT_DIR: &str = "content/links";
pub const IMAGE_DIR: &str = "static/images";
/// Public URL prefix for files under [`IMAGE_DIR`].
pub const IMAGE_URL_PREFIX: &str = "/images";
const FALLBACK_SLUG: &str = "link";

// ── Repository collaborator ──────────────────────────────────────────────────

#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn file_exists(&self, path: &str) -> Result<bool, PublishError>;

    async fn create_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), PublishError>;

    /// Create `path`, or a timestamp-suffixed sibling if it is taken.
    /// Returns the path actually written.
    async fn create_file_or_rename(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<String, PublishError> {
        let final_path = if self.file_exists(path).await? {
            let renamed = timestamped_path(path, &Local::now().format("%Y%m%d%H%M%S").to_string());
            tracing::info!(path, renamed = %renamed, "path taken, renaming");
            renamed
        } else {
            path.to_string()
        };
        self.create_file(&final_path, content, message).await?;
        Ok(final_path)
    }

    /// Create `path` unless it already exists. Returns whether it was written.
    async fn create_file_if_absent(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<bool, PublishError> {
        if self.file_exists(path).await? {
            tracing::info!(path, "already present, skipping upload");
            return Ok(false);
        }
        self.create_file(path, content, message).await?;
        Ok(true)
    }

    /// True when nothing is actually written.
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// `dir/name.ext` -> `dir/name_{suffix}.ext`
pub fn timestamped_path(path: &str, suffix: &str) -> String {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(dot) => {
            let dot = file_start + dot;
            format!("{}_{}{}", &path[..dot], suffix, &path[dot..])
        }
        None => format!("{}_{}", path, suffix),
    }
}

// ── GitHub ───────────────────────────────────────────────────────────────────

/// GitHub contents API client for one repository and branch.
pub struct GithubRepository {
    client: reqwest::Client,
    api_url: String,
    repo: String,
    branch: String,
    token: String,
}

impl GithubRepository {
    pub fn new(
        api_url: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, PublishError> {
        let client = reqwest::ClientBuilder::new()
            .user_agent(concat!("link-poster/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            repo: repo.into(),
            branch: branch.into(),
            token: token.into(),
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!("{}/repos/{}/contents/{}", self.api_url, self.repo, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.contents_url(path))
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }
}

#[async_trait]
impl ContentRepository for GithubRepository {
    async fn file_exists(&self, path: &str) -> Result<bool, PublishError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(api_error(status, path, response).await),
        }
    }

    async fn create_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
    ) -> Result<(), PublishError> {
        let body = json!({
            "message": message,
            "content": STANDARD.encode(content),
            "branch": self.branch,
        });
        let response = self
            .request(reqwest::Method::PUT, path)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, path, response).await);
        }
        tracing::info!(repo = %self.repo, path, bytes = content.len(), "created file");
        Ok(())
    }
}

async fn api_error(status: StatusCode, path: &str, response: reqwest::Response) -> PublishError {
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(text);
    PublishError::Api {
        status: status.as_u16(),
        path: path.to_string(),
        message,
    }
}

// ── Dry run ──────────────────────────────────────────────────────────────────

/// Accepts every write and keeps nothing. Used in debug mode.
#[derive(Debug, Default)]
pub struct DryRunRepository;

#[async_trait]
impl ContentRepository for DryRunRepository {
    async fn file_exists(&self, _path: &str) -> Result<bool, PublishError> {
        Ok(false)
    }

    async fn create_file(
        &self,
        path: &str,
        content: &[u8],
        _message: &str,
    ) -> Result<(), PublishError> {
        tracing::info!(path, bytes = content.len(), "dry run: would create file");
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

// ── Publish flow ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct LinkPost {
    pub url: String,
    pub title: String,
    pub source: Option<String>,
    pub excerpt: Option<String>,
    pub commentary: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Published {
    pub filename: String,
    pub document_path: String,
    pub document: String,
    pub image_path: Option<String>,
}

/// Image file name for a post: `.png` sources stay PNG, anything else is JPEG.
pub fn image_filename(slug: &str, image_url: &str) -> String {
    let path = url::Url::parse(image_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| image_url.to_string());
    let ext = if path.to_lowercase().ends_with(".png") {
        "png"
    } else {
        "jpg"
    };
    format!("{}.{}", slug, ext)
}

/// Normalize the selected image, write it, then write the post document.
///
/// Nothing is written if the image cannot be processed, and the image is
/// written before the document that references it.
pub async fn publish_link(
    repo: &dyn ContentRepository,
    post: LinkPost,
    now: DateTime<FixedOffset>,
) -> Result<Published, AppError> {
    let title = post.title.trim().to_string();
    let url = post.url.trim().to_string();
    if title.is_empty() {
        return Err(AppError::BadRequest("Title is required".to_string()));
    }
    if url.is_empty() {
        return Err(AppError::BadRequest("URL is required".to_string()));
    }

    let mut slug = slugify(&title);
    if slug.is_empty() {
        slug = FALLBACK_SLUG.to_string();
    }

    let image = match post.image_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(image_url) => {
            let filename = image_filename(&slug, image_url);
            let bytes = normalize_image(image_url, &filename)
                .await
                .inspect_err(|e| {
                    tracing::warn!(url = image_url, network = e.is_network(), error = %e, "image processing failed")
                })?;
            Some((filename, bytes))
        }
        None => None,
    };

    let document = PostDocument {
        title: title.clone(),
        date: now.format("%Y-%m-%dT%H:%M:%S%z").to_string(),
        url,
        source: post.source,
        featured_image: image
            .as_ref()
            .map(|(filename, _)| format!("{}/{}", IMAGE_URL_PREFIX, filename)),
        excerpt: post.excerpt,
        commentary: post.commentary,
    }
    .render()?;

    let image_path = match image {
        Some((filename, bytes)) => {
            let path = format!("{}/{}", IMAGE_DIR, filename);
            repo.create_file_if_absent(&path, &bytes, &format!("Add image for: {}", title))
                .await?;
            Some(path)
        }
        None => None,
    };

    let document_path = repo
        .create_file_or_rename(
            &format!("{}/{}.md", CONTENT_DIR, slug),
            document.as_bytes(),
            &format!("Add link: {}", title),
        )
        .await?;
    let filename = document_path
        .rsplit('/')
        .next()
        .unwrap_or(&document_path)
        .to_string();

    tracing::info!(path = %document_path, image = ?image_path, "published link post");
    Ok(Published {
        filename,
        document_path,
        document,
        image_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory repository that records writes.
    #[derive(Default)]
    struct MemoryRepository {
        files: Mutex<HashMap<String, Vec<u8>>>,
        order: Mutex<Vec<String>>,
    }

    impl MemoryRepository {
        fn with_file(path: &str) -> Self {
            let repo = Self::default();
            repo.files.lock().unwrap().insert(path.to_string(), b"old".to_vec());
            repo
        }
    }

    #[async_trait]
    impl ContentRepository for MemoryRepository {
        async fn file_exists(&self, path: &str) -> Result<bool, PublishError> {
            Ok(self.files.lock().unwrap().contains_key(path))
        }

        async fn create_file(
            &self,
            path: &str,
            content: &[u8],
            _message: &str,
        ) -> Result<(), PublishError> {
            self.files.lock().unwrap().insert(path.to_string(), content.to_vec());
            self.order.lock().unwrap().push(path.to_string());
            Ok(())
        }
    }

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-05-01T09:30:00-07:00").unwrap()
    }

    fn png_body() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            40,
            20,
            image::Rgb([9, 9, 9]),
        ));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_timestamped_path() {
        assert_eq!(
            timestamped_path("content/links/post.md", "20240501093000"),
            "content/links/post_20240501093000.md"
        );
        assert_eq!(timestamped_path("a.b/post", "1"), "a.b/post_1");
    }

    #[test]
    fn test_image_filename_extension() {
        assert_eq!(image_filename("s", "https://x.test/a/B.PNG"), "s.png");
        assert_eq!(image_filename("s", "https://x.test/a/b.png?w=300"), "s.png");
        assert_eq!(image_filename("s", "https://x.test/a/b.webp"), "s.jpg");
    }

    #[tokio::test]
    async fn test_publish_without_image() {
        let repo = MemoryRepository::default();
        let post = LinkPost {
            url: "https://example.com/story".to_string(),
            title: "Hello, World! 2024".to_string(),
            source: Some("example.com".to_string()),
            commentary: Some("Nice.".to_string()),
            ..Default::default()
        };

        let published = publish_link(&repo, post, now()).await.unwrap();
        assert_eq!(published.document_path, "content/links/hello_world_2024.md");
        assert_eq!(published.filename, "hello_world_2024.md");
        assert!(published.document.contains("date: 2024-05-01T09:30:00-0700\n"));
        assert!(published.image_path.is_none());
        assert_eq!(repo.order.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_existing_document_gets_timestamp_suffix() {
        let repo = MemoryRepository::with_file("content/links/dup.md");
        let post = LinkPost {
            url: "https://example.com".to_string(),
            title: "Dup".to_string(),
            ..Default::default()
        };

        let published = publish_link(&repo, post, now()).await.unwrap();
        assert!(published.filename.starts_with("dup_"));
        assert!(published.filename.ends_with(".md"));
        assert_eq!(published.filename.len(), "dup_".len() + 14 + ".md".len());
        assert_eq!(repo.files.lock().unwrap()["content/links/dup.md"], b"old");
    }

    #[tokio::test]
    async fn test_image_written_before_document_and_existing_image_kept() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/shot.png")
            .with_status(200)
            .with_body(png_body())
            .create_async()
            .await;

        let repo = MemoryRepository::default();
        let post = LinkPost {
            url: "https://example.com".to_string(),
            title: "Shot".to_string(),
            image_url: Some(format!("{}/shot.png", server.url())),
            excerpt: Some("ignored when an image is present".to_string()),
            ..Default::default()
        };
        let published = publish_link(&repo, post, now()).await.unwrap();

        assert_eq!(published.image_path.as_deref(), Some("static/images/shot.png"));
        assert!(published.document.contains("featuredImage: \"/images/shot.png\""));
        assert!(!published.document.contains("excerpt"));
        assert_eq!(
            *repo.order.lock().unwrap(),
            vec!["static/images/shot.png", "content/links/shot.md"]
        );

        let repo = MemoryRepository::with_file("static/images/shot.png");
        let post = LinkPost {
            url: "https://example.com".to_string(),
            title: "Shot".to_string(),
            image_url: Some(format!("{}/shot.png", server.url())),
            ..Default::default()
        };
        publish_link(&repo, post, now()).await.unwrap();
        assert_eq!(repo.files.lock().unwrap()["static/images/shot.png"], b"old");
    }

    #[tokio::test]
    async fn test_failed_image_aborts_before_any_write() {
        let repo = MemoryRepository::default();
        let post = LinkPost {
            url: "https://example.com".to_string(),
            title: "Broken".to_string(),
            image_url: Some("http://127.0.0.1:1/missing.jpg".to_string()),
            ..Default::default()
        };

        let err = publish_link(&repo, post, now()).await.unwrap_err();
        assert!(matches!(err, AppError::Image(_)));
        assert!(repo.order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_title_rejected() {
        let repo = MemoryRepository::default();
        let post = LinkPost {
            url: "https://example.com".to_string(),
            title: "   ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            publish_link(&repo, post, now()).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_punctuation_only_title_uses_fallback_slug() {
        let repo = MemoryRepository::default();
        let post = LinkPost {
            url: "https://example.com".to_string(),
            title: "!!!".to_string(),
            ..Default::default()
        };
        let published = publish_link(&repo, post, now()).await.unwrap();
        assert_eq!(published.filename, "link.md");
    }

    #[tokio::test]
    async fn test_github_rename_on_collision() {
        let mut server = mockito::Server::new_async().await;
        let exists = server
            .mock("GET", "/repos/me/site/contents/content/links/post.md")
            .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let put = server
            .mock(
                "PUT",
                Matcher::Regex(r"^/repos/me/site/contents/content/links/post_\d{14}\.md$".into()),
            )
            .match_body(Matcher::PartialJson(json!({
                "branch": "main",
                "content": STANDARD.encode(b"body"),
                "message": "Add link: Post",
            })))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let repo = GithubRepository::new(server.url(), "me/site", "main", "secret").unwrap();
        let path = repo
            .create_file_or_rename("content/links/post.md", b"body", "Add link: Post")
            .await
            .unwrap();

        exists.assert_async().await;
        put.assert_async().await;
        assert!(path.starts_with("content/links/post_"));
    }

    #[tokio::test]
    async fn test_github_skips_existing_image() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/me/site/contents/static/images/a.jpg")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let put = server
            .mock("PUT", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let repo = GithubRepository::new(server.url(), "me/site", "main", "secret").unwrap();
        let written = repo
            .create_file_if_absent("static/images/a.jpg", b"img", "Add image")
            .await
            .unwrap();

        assert!(!written);
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_github_error_message_surfaces() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/me/site/contents/content/links/x.md")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"message":"Bad credentials"}"#)
            .create_async()
            .await;

        let repo = GithubRepository::new(server.url(), "me/site", "main", "wrong").unwrap();
        let err = repo.file_exists("content/links/x.md").await.unwrap_err();
        assert!(matches!(err, PublishError::Api { status: 401, .. }));
        assert!(err.to_string().contains("Bad credentials"));
    }
}
