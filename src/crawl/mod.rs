//! Single-URL crawler: canonicalize, honor robots.txt, fetch, fall back to
//! headless rendering for client-rendered pages, extract the main content.
//!
//! Dedup inputs (etag / last-modified / checksum) are supplied to the caller;
//! whether to skip re-chunking on unchanged content is the ingestion
//! coordinator's decision, not ours.

mod renderer;
mod robots;

pub use renderer::{is_js_rendering_available, HeadlessRenderer, RendererConfig};
pub use robots::RobotsRules;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub user_agent: String,
    pub timeout: Duration,
    /// Below this many extracted chars the page is rejected.
    pub min_content_chars: usize,
    /// Below this many visible chars the plain fetch is retried through the
    /// headless renderer.
    pub render_threshold_chars: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("ragdockbot/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(20),
            min_content_chars: 200,
            render_threshold_chars: 150,
        }
    }
}

/// Everything the ingestion pipeline needs from one fetched page.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub text: String,
    pub title: Option<String>,
    pub canonical_url: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// SHA-256 over the extracted text, for content dedup.
    pub checksum: String,
}

pub struct Crawler {
    client: Client,
    config: CrawlConfig,
    robots_cache: Arc<RwLock<HashMap<String, RobotsRules>>>,
    renderer: HeadlessRenderer,
}

impl Crawler {
    pub fn new(config: CrawlConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ApiError::Internal(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            config,
            robots_cache: Arc::new(RwLock::new(HashMap::new())),
            renderer: HeadlessRenderer::new(RendererConfig::default()),
        })
    }

    /// Fetch one URL and extract its main content.
    pub async fn fetch(&self, url: &str) -> Result<CrawledPage, ApiError> {
        let canonical = canonicalize_url(url)?;
        let parsed = Url::parse(&canonical).map_err(|e| ApiError::validation(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ApiError::validation("URL has no host"))?
            .to_string();

        self.ensure_robots_loaded(&host, &parsed).await;
        {
            let cache = self.robots_cache.read().await;
            if let Some(rules) = cache.get(&host) {
                if !rules.is_allowed(parsed.path(), &self.config.user_agent) {
                    return Err(ApiError::RobotsDenied(canonical));
                }
            }
        }

        debug!("fetching {}", canonical);
        let response = self
            .client
            .get(&canonical)
            .send()
            .await
            .map_err(|e| ApiError::ProviderUnavailable(format!("fetch {}: {}", canonical, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(canonical));
        }
        if !status.is_success() {
            return Err(ApiError::ProviderUnavailable(format!(
                "HTTP {} for {}",
                status, canonical
            )));
        }

        let etag = header_string(&response, reqwest::header::ETAG);
        let last_modified = header_string(&response, reqwest::header::LAST_MODIFIED);

        let mut html = response
            .text()
            .await
            .map_err(|e| ApiError::ProviderUnavailable(format!("body: {}", e)))?;
        let mut final_url = canonical.clone();

        // Client-rendered pages serve a near-empty shell; retry once through
        // the headless browser before giving up on them.
        let visible = extract_main_text(&html);
        if visible.chars().count() < self.config.render_threshold_chars {
            match self.renderer.render(&canonical).await {
                Ok(rendered) => {
                    debug!("headless fallback rendered {}", canonical);
                    html = rendered.html;
                    final_url = canonicalize_url(&rendered.url).unwrap_or(final_url);
                }
                Err(e) => {
                    warn!("headless fallback unavailable for {}: {}", canonical, e);
                }
            }
        }

        let text = extract_main_text(&html);
        let got = text.chars().count();
        if got < self.config.min_content_chars {
            return Err(ApiError::InsufficientContent {
                got,
                min: self.config.min_content_chars,
            });
        }

        let title = extract_title(&html).or_else(|| fallback_heading_from_url(&final_url));
        let checksum = hex_sha256(text.as_bytes());

        Ok(CrawledPage {
            text,
            title,
            canonical_url: final_url,
            etag,
            last_modified,
            checksum,
        })
    }

    async fn ensure_robots_loaded(&self, host: &str, url: &Url) {
        {
            let cache = self.robots_cache.read().await;
            if cache.contains_key(host) {
                return;
            }
        }

        let robots_url = format!("{}://{}/robots.txt", url.scheme(), host);
        debug!("fetching robots.txt from {}", robots_url);

        let rules = match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => {
                let body = response.text().await.unwrap_or_default();
                RobotsRules::parse(&body)
            }
            _ => RobotsRules::allow_all(),
        };

        let mut cache = self.robots_cache.write().await;
        cache.insert(host.to_string(), rules);
    }
}

/// Lowercase scheme and host, strip the fragment, drop a trailing slash on
/// non-root paths. Only http(s) URLs are accepted.
pub fn canonicalize_url(url: &str) -> Result<String, ApiError> {
    let parsed =
        Url::parse(url.trim()).map_err(|e| ApiError::validation(format!("invalid URL: {}", e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ApiError::validation(format!(
            "only http(s) URLs are supported, got {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(ApiError::validation("URL has no host"));
    }

    let mut normalized = parsed.clone();
    normalized.set_fragment(None);
    let path = parsed.path().trim_end_matches('/');
    normalized.set_path(if path.is_empty() { "/" } else { path });

    Ok(normalized.to_string())
}

/// Readability-style extraction: prefer the page's main content container,
/// strip boilerplate, render to text.
pub fn extract_main_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let fragment = ["article", "main", "[role=\"main\"]", "body"]
        .iter()
        .filter_map(|sel| Selector::parse(sel).ok())
        .find_map(|sel| document.select(&sel).next().map(|e| e.html()))
        .unwrap_or_else(|| html.to_string());

    let text = html2text::from_read(fragment.as_bytes(), 80);
    normalize_whitespace(&text)
}

pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Last non-empty path segment, de-slugged, as a heading of last resort.
pub fn fallback_heading_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()?;
    let heading = segment
        .trim_end_matches(".html")
        .replace(['-', '_'], " ")
        .trim()
        .to_string();
    if heading.is_empty() {
        None
    } else {
        Some(heading)
    }
}

fn normalize_whitespace(text: &str) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let mut out = Vec::with_capacity(lines.len());
    let mut blank_run = 0usize;
    for line in lines {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 1 {
                out.push("");
            }
        } else {
            blank_run = 0;
            out.push(line);
        }
    }
    out.join("\n").trim().to_string()
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

pub(crate) fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
