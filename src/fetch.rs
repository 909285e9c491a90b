//! Fetch a web document and turn it into an article ready to archive.
//!
//! Content extraction is pluggable through [`Extractor`]. The bundled
//! [`PassthroughExtractor`] keeps the document as-is and only lifts a few
//! fields out of the head; readability-style cleanup is left to callers.

use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::error::FetchError;

/// User agent presented to document servers.
pub const CLIENT_USER_AGENT: &str = "Mozilla/5.0 (compatible; Chronicl/1.0)";
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANG: &str = "en-US,en;q=0.5";

/// Readable form of a fetched document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub title: String,
    /// Markup stored as the archive body.
    pub body: String,
    pub byline: Option<String>,
    pub site_name: Option<String>,
    pub excerpt: Option<String>,
}

/// Turns raw HTML into an [`Article`].
pub trait Extractor: Send + Sync {
    fn extract(&self, url: &Url, html: &str) -> Result<Article, FetchError>;
}

/// Keeps the whole document as the body.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughExtractor;

impl Extractor for PassthroughExtractor {
    fn extract(&self, url: &Url, html: &str) -> Result<Article, FetchError> {
        if html.trim().is_empty() {
            return Err(FetchError::Empty);
        }
        let lower = html.to_ascii_lowercase();
        let title = title_text(html, &lower)
            .or_else(|| meta_content(html, &lower, "og:title"))
            .unwrap_or_else(|| url.as_str().to_string());
        Ok(Article {
            title,
            body: html.to_string(),
            byline: meta_content(html, &lower, "author"),
            site_name: meta_content(html, &lower, "og:site_name")
                .or_else(|| url.host_str().map(str::to_string)),
            excerpt: meta_content(html, &lower, "description")
                .or_else(|| meta_content(html, &lower, "og:description")),
        })
    }
}

/// Parse a document URL, accepting only http and https.
pub fn parse_source_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw).map_err(|e| FetchError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::InvalidUrl(format!(
            "{raw}: unsupported scheme {other}"
        ))),
    }
}

/// HTTP client configured for document fetches.
pub fn http_client() -> Result<reqwest::Client, FetchError> {
    Ok(reqwest::Client::builder()
        .user_agent(CLIENT_USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()?)
}

/// Download `raw_url` and run it through `extractor`.
pub async fn fetch_article(
    client: &reqwest::Client,
    raw_url: &str,
    extractor: &dyn Extractor,
) -> Result<Article, FetchError> {
    let url = parse_source_url(raw_url)?;
    debug!(url = %url, "fetching document");
    let resp = client
        .get(url.clone())
        .header(ACCEPT, ACCEPT_HTML)
        .header(ACCEPT_LANGUAGE, ACCEPT_LANG)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    let html = resp.text().await?;
    let article = extractor.extract(&url, &html)?;
    info!(url = %url, bytes = html.len(), title = %article.title, "document fetched");
    Ok(article)
}

// `lower` is `html.to_ascii_lowercase()`, so byte offsets line up.

fn title_text(html: &str, lower: &str) -> Option<String> {
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title")?;
    let text = html[start..end].trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// `content` of the first `<meta>` whose `name` or `property` equals `key`.
fn meta_content(html: &str, lower: &str, key: &str) -> Option<String> {
    let mut from = 0;
    while let Some(pos) = lower[from..].find("<meta") {
        let start = from + pos;
        let end = start + lower[start..].find('>')?;
        let (tag, ltag) = (&html[start..end], &lower[start..end]);
        let named = attr(tag, ltag, "name").or_else(|| attr(tag, ltag, "property"));
        if named.is_some_and(|n| n.eq_ignore_ascii_case(key)) {
            if let Some(content) = attr(tag, ltag, "content").filter(|c| !c.trim().is_empty()) {
                return Some(content.trim().to_string());
            }
        }
        from = end;
    }
    None
}

fn attr(tag: &str, ltag: &str, name: &str) -> Option<String> {
    let needle = format!("{name}=");
    let mut from = 0;
    while let Some(pos) = ltag[from..].find(&needle) {
        let at = from + pos;
        from = at + needle.len();
        if at == 0 || !ltag.as_bytes()[at - 1].is_ascii_whitespace() {
            continue;
        }
        let rest = &tag[from..];
        return match rest.chars().next()? {
            q @ ('"' | '\'') => {
                let inner = &rest[1..];
                Some(inner[..inner.find(q)?].to_string())
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_ascii_whitespace() || c == '/')
                    .unwrap_or(rest.len());
                Some(rest[..end].to_string())
            }
        };
    }
    None
}
