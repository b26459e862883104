use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::FetchError;
use crate::models::ExtractionResult;

// ── Constants ────────────────────────────────────────────────────────────────

pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const FETCH_TIMEOUT_SECS: u64 = 10;
pub const MAX_STATIC_IMAGES: usize = 10;
const MAX_IMG_ELEMENTS: usize = 10;

/// Substrings that mark a URL as site chrome rather than content.
const DENYLIST: &[&str] = &[
    "logo",
    "icon",
    "avatar",
    "placeholder",
    "blank.png",
    "loading",
    "default",
];

/// Attributes holding an `<img>` URL, lazy-load attributes first.
pub const IMG_SRC_ATTRS: &[&str] = &["data-src", "data-lazy-src", "data-original", "src"];

// ── Lazy static selectors ────────────────────────────────────────────────────

static TITLE_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

// ── Candidate collection ─────────────────────────────────────────────────────

/// Ordered, de-duplicated list of image URLs with a hard cap.
pub(crate) struct CandidateSet {
    urls: Vec<String>,
    seen: HashSet<String>,
    cap: usize,
}

impl CandidateSet {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            urls: Vec::with_capacity(cap),
            seen: HashSet::new(),
            cap,
        }
    }

    /// Resolve `raw` against `base` and append it if it is new, allowed, and
    /// there is room left.
    pub(crate) fn push_raw(&mut self, raw: &str, base: &Url) -> bool {
        match resolve_image_url(raw, base) {
            Some(url) => self.push(url),
            None => false,
        }
    }

    pub(crate) fn push(&mut self, url: String) -> bool {
        if self.is_full() || is_denied(&url) || self.seen.contains(&url) {
            return false;
        }
        self.seen.insert(url.clone());
        self.urls.push(url);
        true
    }

    pub(crate) fn is_full(&self) -> bool {
        self.urls.len() >= self.cap
    }

    pub(crate) fn into_vec(self) -> Vec<String> {
        self.urls
    }
}

pub(crate) fn is_denied(url: &str) -> bool {
    let lower = url.to_lowercase();
    DENYLIST.iter().any(|needle| lower.contains(needle))
}

/// Resolve a possibly relative URL to an absolute http(s) URL.
pub(crate) fn resolve_image_url(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let resolved = base.join(raw).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Fetch `url` and extract its title, source domain and candidate images.
/// Never fails: fetch errors are reported through `ExtractionResult::error`.
pub async fn extract_metadata(url: &str) -> ExtractionResult {
    let page = match parse_page_url(url).map_err(FetchError::InvalidUrl) {
        Ok(page) => page,
        Err(e) => return ExtractionResult::failed(e.to_string()),
    };

    match fetch_html(&page, Duration::from_secs(FETCH_TIMEOUT_SECS)).await {
        Ok((html, final_url)) => {
            // Images resolve against where we landed; the source is what was submitted.
            let result = ExtractionResult {
                source: source_from_url(&page),
                ..extract_from_html(&html, &final_url)
            };
            tracing::info!(
                url = %final_url,
                images = result.images.len(),
                has_title = result.title.is_some(),
                "extracted metadata"
            );
            result
        }
        Err(e) => {
            tracing::warn!(url = %page, error = %e, "metadata fetch failed");
            ExtractionResult::failed(e.to_string())
        }
    }
}

// ── URL validation ───────────────────────────────────────────────────────────

pub(crate) fn parse_page_url(url: &str) -> Result<Url, String> {
    let parsed = Url::parse(url.trim()).map_err(|e| format!("{}: {}", url.trim(), e))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(format!("unsupported scheme '{}'", other)),
    }
}

/// Bare authority of a page URL, without a leading `www.`.
pub(crate) fn source_from_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    let host = host.strip_prefix("www.").unwrap_or(host);
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

// ── HTTP fetch ───────────────────────────────────────────────────────────────

async fn fetch_html(url: &Url, timeout: Duration) -> Result<(String, Url), FetchError> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        reqwest::header::HeaderValue::from_static("en-US,en;q=0.9"),
    );

    let client = reqwest::ClientBuilder::new()
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()
        .map_err(|e| FetchError::Request(e.to_string()))?;

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(e, timeout))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let final_url = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|e| FetchError::from_reqwest(e, timeout))?;
    Ok((body, final_url))
}

// ── Main extraction pipeline ─────────────────────────────────────────────────

pub fn extract_from_html(html: &str, page_url: &Url) -> ExtractionResult {
    let document = Html::parse_document(html);

    let title = meta_content(&document, &[("property", "og:title")])
        .or_else(|| document_title(&document));

    let mut candidates = CandidateSet::new(MAX_STATIC_IMAGES);

    if let Some(og) = meta_content(&document, &[("property", "og:image")]) {
        candidates.push_raw(&og, page_url);
    }
    if let Some(tw) = meta_content(
        &document,
        &[("name", "twitter:image"), ("property", "twitter:image")],
    ) {
        candidates.push_raw(&tw, page_url);
    }
    for img in document.select(&IMG_SEL).take(MAX_IMG_ELEMENTS) {
        if let Some(src) = img_src(img) {
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

// ── Document helpers ─────────────────────────────────────────────────────────

/// First non-empty `content` among `<meta {attr}="{value}">` checks, in order.
pub(crate) fn meta_content(document: &Html, checks: &[(&str, &str)]) -> Option<String> {
    for (attr, value) in checks {
        let sel_str = format!("meta[{}=\"{}\"]", attr, value);
        // The parse error borrows sel_str, so turn it into an Option here.
        let sel = Selector::parse(&sel_str).ok();
        if let Some(sel) = sel {
            let found = document
                .select(&sel)
                .filter_map(|el| el.value().attr("content"))
                .map(|content| content.trim().to_string())
                .find(|content| !content.is_empty());
            if found.is_some() {
                return found;
            }
        }
    }
    None
}

pub(crate) fn document_title(document: &Html) -> Option<String> {
    document
        .select(&TITLE_SEL)
        .next()
        .map(|el| collect_text(el).trim().to_string())
        .filter(|s| !s.is_empty())
}

fn img_src<'a>(el: ElementRef<'a>) -> Option<&'a str> {
    let v = el.value();
    IMG_SRC_ATTRS
        .iter()
        .filter_map(|attr| v.attr(attr))
        .find(|s| !s.trim().is_empty())
}

/// Recursively collect all text from an element and its descendants.
fn collect_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join("")
}
