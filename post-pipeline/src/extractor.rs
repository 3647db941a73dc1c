use crate::config::FetchConfig;
use crate::types::ArticleContent;
use async_trait::async_trait;
use regex::{Captures, Regex};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Text blocks shorter than this are navigation crumbs, captions and the like.
const MIN_BLOCK_CHARS: usize = 20;

static HIDDEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:script|style|noscript|template)\b[^>]*>.*?</(?:script|style|noscript|template)>|<!--.*?-->")
        .expect("hidden-content pattern is valid")
});
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").expect("title pattern is valid"));
static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:p|h[1-6]|li|blockquote)\b[^>]*>(.*?)</(?:p|h[1-6]|li|blockquote)>")
        .expect("block pattern is valid")
});
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"));
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#([xX]?)([0-9a-fA-F]{1,6});").expect("entity pattern is valid"));

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unreachable {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Not an HTML page ({content_type}): {url}")]
    NonHtml { url: String, content_type: String },

    #[error("Page exceeds {limit} bytes: {url}")]
    TooLarge { url: String, limit: usize },

    #[error("Timed out after {seconds}s fetching {url}")]
    Timeout { url: String, seconds: u64 },

    #[error("No readable text found at {url}")]
    Empty { url: String },

    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),
}

/// Turns an article URL into plain text. Implementations fail fast and never
/// retry; retry policy belongs to the caller.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<ArticleContent, FetchError>;
}

pub struct HttpExtractor {
    client: Client,
    config: FetchConfig,
}

impl HttpExtractor {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client, config })
    }

    fn map_request_error(&self, url: &str, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                seconds: self.config.timeout_seconds,
            }
        } else {
            FetchError::Unreachable {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(&self, url: &str) -> Result<ArticleContent, FetchError> {
        let parsed = validate_url(url)?;
        let limit = self.config.max_bytes;

        debug!("Fetching article: {}", url);

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| self.map_request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unreachable {
                url: url.to_string(),
                reason: format!("HTTP {}: {}", status, status.canonical_reason().unwrap_or("Unknown")),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        // A missing content type is tolerated; an explicit non-HTML one is not.
        if !content_type.is_empty() && !content_type.contains("html") {
            return Err(FetchError::NonHtml {
                url: url.to_string(),
                content_type,
            });
        }

        if let Some(content_length) = response.content_length() {
            if content_length as usize > limit {
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    limit,
                });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.map_request_error(url, e))?
        {
            if body.len() + chunk.len() > limit {
                warn!("Aborting fetch of {}: body exceeds {} bytes", url, limit);
                return Err(FetchError::TooLarge {
                    url: url.to_string(),
                    limit,
                });
            }
            body.extend_from_slice(&chunk);
        }

        let html = String::from_utf8_lossy(&body);
        let article = parse_article(url, &html);

        if article.text.is_empty() {
            return Err(FetchError::Empty { url: url.to_string() });
        }

        info!("Extracted article from {} ({} chars)", url, article.text.len());
        Ok(article)
    }
}

pub fn validate_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url.trim()).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(parsed)
}

/// Reduces an HTML document to its title and readable text blocks.
pub fn parse_article(url: &str, html: &str) -> ArticleContent {
    let visible = HIDDEN_RE.replace_all(html, " ");

    let title = TITLE_RE
        .captures(&visible)
        .and_then(|caps| caps.get(1))
        .map(|m| clean_fragment(m.as_str()))
        .unwrap_or_default();

    let blocks: Vec<String> = BLOCK_RE
        .captures_iter(&visible)
        .filter_map(|caps| caps.get(1))
        .map(|m| clean_fragment(m.as_str()))
        .filter(|block| block.chars().count() > MIN_BLOCK_CHARS)
        .collect();

    ArticleContent {
        url: url.to_string(),
        title,
        text: blocks.join("\n\n"),
    }
}

fn clean_fragment(fragment: &str) -> String {
    let without_tags = TAG_RE.replace_all(fragment, " ");
    let decoded = decode_entities(&without_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    let numeric = NUMERIC_ENTITY_RE.replace_all(text, |caps: &Captures| {
        let radix = if caps[1].is_empty() { 10 } else { 16 };
        u32::from_str_radix(&caps[2], radix)
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });

    numeric
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
