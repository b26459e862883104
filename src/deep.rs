//! Deep extraction: render the page in headless Chromium, scroll to trigger
//! lazy loading, then harvest CSS background images and rendered `<img>`
//! elements that are large enough to be content.

use std::path::Path;
use std::time::{Duration, Instant};

use chromiumoxide::Page;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use serde::Deserialize;
use url::Url;

use crate::browser::BrowserSession;
use crate::error::RenderError;
use crate::extract::{
    document_title, meta_content, parse_page_url, source_from_url, CandidateSet,
};
use crate::models::ExtractionResult;

pub const MAX_DEEP_IMAGES: usize = 15;
pub const NAVIGATION_TIMEOUT_SECS: u64 = 15;
const READY_WAIT: Duration = Duration::from_secs(10);
const SETTLE_DELAY: Duration = Duration::from_secs(2);
const SCROLL_STEPS: usize = 8;
const SCROLL_PAUSE: Duration = Duration::from_millis(250);
const AFTER_SCROLL_DELAY: Duration = Duration::from_secs(1);
/// Rendered images narrower or shorter than this are treated as icons.
const MIN_RENDERED_PX: f64 = 50.0;

/// Value of a `background` / `background-image` declaration. HTML-escaped
/// quotes and ampersands are part of the value, not terminators.
static BACKGROUND_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)background(?:-image)?\s*:((?:&(?:quot|amp|apos|#39|#x27);|[^;{}<>])*)").unwrap()
});

static CSS_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)url\(\s*(?:&quot;|&apos;|&#39;|&#x27;|['"])?([^'"()]+?)(?:&quot;|&apos;|&#39;|&#x27;|['"])?\s*\)"#,
    )
    .unwrap()
});

const READY_STATE_SCRIPT: &str = "document.readyState";

const RENDERED_IMAGES_SCRIPT: &str = r#"
    Array.from(document.images).map(img => {
        const rect = img.getBoundingClientRect();
        return {
            src: img.getAttribute('src'),
            dataSrc: img.getAttribute('data-src'),
            dataLazySrc: img.getAttribute('data-lazy-src'),
            dataOriginal: img.getAttribute('data-original'),
            currentSrc: img.currentSrc || null,
            width: rect.width,
            height: rect.height
        };
    })
"#;

/// An `<img>` as the browser laid it out.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedImage {
    pub src: Option<String>,
    pub data_src: Option<String>,
    pub data_lazy_src: Option<String>,
    pub data_original: Option<String>,
    pub current_src: Option<String>,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

impl RenderedImage {
    /// Same attribute preference as static extraction, then whatever the
    /// browser actually loaded.
    fn effective_src(&self) -> Option<&str> {
        [
            &self.data_src,
            &self.data_lazy_src,
            &self.data_original,
            &self.src,
            &self.current_src,
        ]
        .into_iter()
        .filter_map(|attr| attr.as_deref())
        .find(|s| !s.trim().is_empty())
    }

    fn is_icon_sized(&self) -> bool {
        self.width < MIN_RENDERED_PX || self.height < MIN_RENDERED_PX
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Render `url` in a headless browser and extract metadata. The browser is
/// closed before returning on every path; failures land in `error`.
pub async fn extract_metadata_deep(url: &str, chrome_path: Option<&Path>) -> ExtractionResult {
    let page_url = match parse_page_url(url) {
        Ok(u) => u,
        Err(e) => return ExtractionResult::failed(RenderError::InvalidUrl(e).to_string()),
    };

    let session = match BrowserSession::launch(
        chrome_path,
        Duration::from_secs(NAVIGATION_TIMEOUT_SECS),
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "deep extraction could not start a browser");
            return ExtractionResult::failed(e.to_string());
        }
    };

    if let Some(profile) = session.profile_dir() {
        tracing::debug!(url = %page_url, profile = %profile.display(), "rendering page");
    }
    let outcome = scrape(&session, &page_url).await;
    session.close().await;

    match outcome {
        Ok(result) => {
            tracing::info!(
                url = %page_url,
                images = result.images.len(),
                "deep extraction finished"
            );
            result
        }
        Err(e) => {
            tracing::warn!(url = %page_url, error = %e, "deep extraction failed");
            ExtractionResult::failed(e.to_string())
        }
    }
}

// ── Rendering ────────────────────────────────────────────────────────────────

async fn scrape(session: &BrowserSession, url: &Url) -> Result<ExtractionResult, RenderError> {
    let page = session
        .browser()
        .new_page("about:blank")
        .await
        .map_err(|e| RenderError::Navigation(e.to_string()))?;

    let result = render(&page, url).await;
    if let Err(e) = page.close().await {
        tracing::debug!(error = %e, "failed to close page");
    }
    result
}

async fn render(page: &Page, url: &Url) -> Result<ExtractionResult, RenderError> {
    tokio::time::timeout(
        Duration::from_secs(NAVIGATION_TIMEOUT_SECS),
        page.goto(url.as_str()),
    )
    .await
    .map_err(|_| RenderError::NavigationTimeout(NAVIGATION_TIMEOUT_SECS))?
    .map_err(|e| RenderError::Navigation(e.to_string()))?;

    wait_for_ready(page).await;
    tokio::time::sleep(SETTLE_DELAY).await;
    scroll_to_bottom(page).await?;

    let html = page
        .content()
        .await
        .map_err(|e| RenderError::Script(e.to_string()))?;
    let rendered: Vec<RenderedImage> = page
        .evaluate(RENDERED_IMAGES_SCRIPT)
        .await
        .map_err(|e| RenderError::Script(e.to_string()))?
        .into_value()
        .map_err(|e| RenderError::Script(e.to_string()))?;

    let final_url = page
        .url()
        .await
        .ok()
        .flatten()
        .and_then(|u| Url::parse(&u).ok())
        .unwrap_or_else(|| url.clone());

    Ok(ExtractionResult {
        source: source_from_url(url),
        ..build_deep_result(&html, &final_url, &rendered)
    })
}

/// Poll `document.readyState` until the page reports `complete` or the wait
/// budget runs out. Running out is not an error.
async fn wait_for_ready(page: &Page) {
    let start = Instant::now();
    while start.elapsed() < READY_WAIT {
        let state = page
            .evaluate(READY_STATE_SCRIPT)
            .await
            .ok()
            .and_then(|r| r.into_value::<String>().ok());
        if state.as_deref() == Some("complete") {
            tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "page ready");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tracing::debug!("page never reached readyState=complete, continuing");
}

async fn scroll_to_bottom(page: &Page) -> Result<(), RenderError> {
    for _ in 0..SCROLL_STEPS {
        page.evaluate("window.scrollBy(0, window.innerHeight)")
            .await
            .map_err(|e| RenderError::Script(e.to_string()))?;
        tokio::time::sleep(SCROLL_PAUSE).await;
    }
    page.evaluate("window.scrollTo(0, document.body ? document.body.scrollHeight : 0)")
        .await
        .map_err(|e| RenderError::Script(e.to_string()))?;
    tokio::time::sleep(AFTER_SCROLL_DELAY).await;
    Ok(())
}

// ── Selection ────────────────────────────────────────────────────────────────

pub fn build_deep_result(html: &str, page_url: &Url, rendered: &[RenderedImage]) -> ExtractionResult {
    let document = Html::parse_document(html);
    let title =
        document_title(&document).or_else(|| meta_content(&document, &[("property", "og:title")]));

    let mut candidates = CandidateSet::new(MAX_DEEP_IMAGES);
    for raw in background_image_urls(html) {
        candidates.push_raw(&raw, page_url);
    }
    for img in rendered {
        if candidates.is_full() {
            break;
        }
        if img.is_icon_sized() {
            continue;
        }
        if let Some(src) = img.effective_src() {
            candidates.push_raw(src, page_url);
        }
    }

    ExtractionResult {
        title,
        source: source_from_url(page_url),
        images: candidates.into_vec(),
        error: None,
    }
}

fn background_image_urls(html: &str) -> Vec<String> {
    BACKGROUND_DECL_RE
        .captures_iter(html)
        .flat_map(|decl| {
            let value = decl.get(1).map_or("", |m| m.as_str());
            CSS_URL_RE
                .captures_iter(value)
                .map(|cap| cap[1].trim().replace("&amp;", "&"))
                .collect::<Vec<_>>()
        })
        .filter(|u| !u.is_empty())
        .collect()
}
