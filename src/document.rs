//! Post document generation: slug, front matter and body.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::DocumentError;

static SLUG_STRIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static SLUG_SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s_]+").unwrap());
static VIDEO_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{6,}$").unwrap());
static VIMEO_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

/// Filesystem-safe identifier for a title.
///
/// Lowercases, drops everything outside `[\w\s-]`, collapses runs of
/// whitespace, hyphens and underscores into one `_`, and trims `_`.
pub fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = SLUG_STRIP_RE.replace_all(&lower, "");
    let joined = SLUG_SEPARATOR_RE.replace_all(&stripped, "_");
    joined.trim_matches('_').to_string()
}

// ── Front matter ─────────────────────────────────────────────────────────────

/// Ordered front matter fields, serialized as YAML between `---` fences.
///
/// `title`, `date` and `externalLink` are required. String values are
/// emitted as double-quoted scalars with `\`, `"` and control characters
/// escaped, so any title survives the round trip.
#[derive(Debug, Default, Clone)]
pub struct FrontMatter {
    title: Option<String>,
    date: Option<String>,
    external_link: Option<String>,
    source_url: Option<String>,
    featured_image: Option<String>,
    excerpt: Option<String>,
}

impl FrontMatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = non_blank(title.into());
        self
    }

    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = non_blank(date.into());
        self
    }

    pub fn external_link(mut self, link: impl Into<String>) -> Self {
        self.external_link = non_blank(link.into());
        self
    }

    pub fn source_url(mut self, source: Option<String>) -> Self {
        self.source_url = source.and_then(non_blank);
        self
    }

    pub fn featured_image(mut self, path: Option<String>) -> Self {
        self.featured_image = path.and_then(non_blank);
        self
    }

    pub fn excerpt(mut self, excerpt: Option<String>) -> Self {
        self.excerpt = excerpt.and_then(non_blank);
        self
    }

    pub fn render(&self) -> Result<String, DocumentError> {
        let title = self.title.as_deref().ok_or(DocumentError::MissingField("title"))?;
        let date = self.date.as_deref().ok_or(DocumentError::MissingField("date"))?;
        let link = self
            .external_link
            .as_deref()
            .ok_or(DocumentError::MissingField("externalLink"))?;

        let mut out = String::from("---\n");
        push_field(&mut out, "title", &quote(title));
        push_field(&mut out, "date", date);
        push_field(&mut out, "externalLink", &quote(link));
        if let Some(source) = &self.source_url {
            push_field(&mut out, "sourceUrl", &quote(source));
        }
        if let Some(image) = &self.featured_image {
            push_field(&mut out, "featuredImage", &quote(image));
        }
        if let Some(excerpt) = &self.excerpt {
            push_field(&mut out, "excerpt", &quote(excerpt));
        }
        out.push_str("---\n");
        Ok(out)
    }
}

fn non_blank(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn push_field(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

/// YAML double-quoted scalar.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ── Video embeds ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoEmbed {
    YouTube(String),
    Vimeo(String),
}

impl VideoEmbed {
    /// Recognize YouTube and Vimeo watch pages.
    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = Url::parse(url.trim()).ok()?;
        let host = parsed.host_str()?.to_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let host = host.strip_prefix("m.").unwrap_or(host);
        let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());

        match host {
            "youtube.com" | "music.youtube.com" => {
                let first = segments.next()?;
                let id = match first {
                    "watch" => parsed
                        .query_pairs()
                        .find(|(k, _)| k == "v")
                        .map(|(_, v)| v.into_owned())?,
                    "shorts" | "embed" | "live" => segments.next()?.to_string(),
                    _ => return None,
                };
                valid_id(&VIDEO_ID_RE, id).map(VideoEmbed::YouTube)
            }
            "youtu.be" => {
                let id = segments.next()?.to_string();
                valid_id(&VIDEO_ID_RE, id).map(VideoEmbed::YouTube)
            }
            "vimeo.com" | "player.vimeo.com" => {
                let id = segments.find(|s| VIMEO_ID_RE.is_match(s))?.to_string();
                Some(VideoEmbed::Vimeo(id))
            }
            _ => None,
        }
    }

    /// Hugo shortcode for the embed.
    pub fn shortcode(&self) -> String {
        match self {
            VideoEmbed::YouTube(id) => format!("{{{{< youtube {} >}}}}", id),
            VideoEmbed::Vimeo(id) => format!("{{{{< vimeo {} >}}}}", id),
        }
    }
}

fn valid_id(re: &Regex, id: String) -> Option<String> {
    if re.is_match(&id) {
        Some(id)
    } else {
        None
    }
}

// ── Post document ────────────────────────────────────────────────────────────

/// Everything needed to render one link post.
#[derive(Debug, Clone)]
pub struct PostDocument {
    pub title: String,
    pub date: String,
    pub url: String,
    pub source: Option<String>,
    pub featured_image: Option<String>,
    pub excerpt: Option<String>,
    pub commentary: Option<String>,
}

impl PostDocument {
    /// Front matter, then the video embed (if the link is a video), then the
    /// commentary. The excerpt is only kept when there is no featured image.
    pub fn render(&self) -> Result<String, DocumentError> {
        let excerpt = match self.featured_image {
            Some(_) => None,
            None => self.excerpt.clone(),
        };
        let mut out = FrontMatter::new()
            .title(self.title.as_str())
            .date(self.date.as_str())
            .external_link(self.url.as_str())
            .source_url(self.source.clone())
            .featured_image(self.featured_image.clone())
            .excerpt(excerpt)
            .render()?;

        if let Some(embed) = VideoEmbed::from_url(&self.url) {
            out.push('\n');
            out.push_str(&embed.shortcode());
            out.push('\n');
        }
        if let Some(text) = self.commentary.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            out.push('\n');
            out.push_str(text);
            out.push('\n');
        }
        Ok(out)
    }
}
