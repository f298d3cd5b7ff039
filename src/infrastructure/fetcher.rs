use crate::domain::models::ParsedFeed;
use crate::infrastructure::parser::parse_feed_document;
use crate::infrastructure::ssrf::{is_safe_ip, validate_url, SsrfError};
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::{header, Client, StatusCode};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const MAX_REDIRECTS: usize = 10;

/// How outbound requests leave the process.
#[derive(Debug, Clone)]
pub enum EgressMode {
    /// Dial directly; every DNS lookup and literal IP is validated.
    Direct,
    /// Send everything through an egress proxy that enforces the network
    /// policy itself; in-process validation is disabled.
    Proxy(String),
    /// No validation at all. Local development and tests only.
    Permissive,
}

#[derive(Error, Debug)]
pub enum FetchError {
    /// The request would have reached a blocked address. Callers must not
    /// leak details to the client.
    #[error("request blocked")]
    Ssrf,

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

impl From<SsrfError> for FetchError {
    fn from(err: SsrfError) -> Self {
        match err {
            SsrfError::BlockedAddress => FetchError::Ssrf,
            SsrfError::InvalidUrl(msg) => FetchError::InvalidUrl(msg),
            SsrfError::InvalidScheme(scheme) => FetchError::InvalidUrl(scheme),
        }
    }
}

/// Error injected by [`SafeDnsResolver`] when a lookup lands on a blocked
/// address; recognized again when it surfaces out of reqwest's error chain.
#[derive(Debug)]
struct BlockedAddressError(String);

impl fmt::Display for BlockedAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blocked address: {}", self.0)
    }
}

impl std::error::Error for BlockedAddressError {}

/// DNS resolver that refuses any name resolving to an unsafe address.
///
/// Running inside the HTTP client means the check happens on the exact
/// lookup used for the connection, on every redirect hop, which closes the
/// DNS-rebinding window a separate pre-flight check would leave open.
#[derive(Debug, Default)]
struct SafeDnsResolver;

impl Resolve for SafeDnsResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?
                .collect();

            if addrs.is_empty() {
                return Err(Box::new(BlockedAddressError(format!(
                    "{host} resolved to no addresses"
                ))) as Box<dyn std::error::Error + Send + Sync>);
            }

            if let Some(bad) = addrs.iter().find(|addr| !is_safe_ip(&addr.ip())) {
                tracing::warn!(
                    "SSRF protection: {} resolves to blocked address {}",
                    host,
                    bad.ip()
                );
                return Err(Box::new(BlockedAddressError(host))
                    as Box<dyn std::error::Error + Send + Sync>);
            }

            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

fn is_blocked_address_error(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if inner.downcast_ref::<BlockedAddressError>().is_some() {
            return true;
        }
        if inner.to_string().contains("blocked address") {
            return true;
        }
        source = inner.source();
    }
    false
}

pub struct FeedFetcher {
    client: Client,
    validate: bool,
}

impl FeedFetcher {
    pub fn new(mode: &EgressMode) -> Result<Self, FetchError> {
        let mut builder = Client::builder()
            .user_agent("Mozilla/5.0")
            .gzip(true)
            .brotli(true)
            .timeout(Duration::from_secs(30))
            // Redirects are followed by hand so every hop gets validated
            .redirect(reqwest::redirect::Policy::none());

        let validate = match mode {
            EgressMode::Direct => {
                builder = builder.dns_resolver(Arc::new(SafeDnsResolver));
                true
            }
            EgressMode::Proxy(proxy_url) => {
                let proxy = reqwest::Proxy::all(proxy_url)
                    .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
                builder = builder.proxy(proxy);
                false
            }
            EgressMode::Permissive => false,
        };

        let client = builder
            .build()
            .map_err(|e| FetchError::Upstream(e.to_string()))?;

        Ok(Self { client, validate })
    }

    fn check_url(&self, url_str: &str) -> Result<Url, FetchError> {
        if self.validate {
            Ok(validate_url(url_str)?)
        } else {
            Url::parse(url_str).map_err(|e| FetchError::InvalidUrl(e.to_string()))
        }
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if is_blocked_address_error(&err) {
            FetchError::Ssrf
        } else {
            FetchError::Upstream(err.to_string())
        }
    }

    /// Fetch a URL following up to `max_redirects` redirects, validating the
    /// target on every hop. Returns the body and the final URL.
    pub async fn fetch(
        &self,
        url_str: &str,
        max_redirects: usize,
    ) -> Result<(Vec<u8>, Url), FetchError> {
        let mut current = self.check_url(url_str)?;

        for _ in 0..=max_redirects {
            tracing::debug!("Fetching {}", current);
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| self.classify(e))?;

            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        FetchError::Upstream("redirect without Location header".to_string())
                    })?;

                let next = current
                    .join(location)
                    .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
                current = self.check_url(next.as_str())?;
                continue;
            }

            if !response.status().is_success() {
                return Err(upstream_status_error(response.status()));
            }

            // Defense in depth: the URL we ended up on must pass on its own
            if self.validate {
                validate_url(current.as_str())?;
            }

            let body = response.bytes().await.map_err(|e| self.classify(e))?;
            return Ok((body.to_vec(), current));
        }

        Err(FetchError::TooManyRedirects)
    }

    /// Fetch a URL and parse it as a feed. If the body is not a feed, scan
    /// it as HTML for a `<link rel="alternate">` feed reference and follow
    /// that once.
    pub async fn fetch_feed(&self, url_str: &str) -> Result<ParsedFeed, FetchError> {
        let (body, final_url) = self.fetch(url_str, MAX_REDIRECTS).await?;

        match parse_feed_document(&body, final_url.as_str()) {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                let html = String::from_utf8_lossy(&body);
                let discovered = find_feed_link_in_html(&html, &final_url)
                    .ok_or_else(|| FetchError::Upstream("not a valid feed".to_string()))?;

                tracing::debug!("Discovered feed link {} on {}", discovered, final_url);
                let (body, final_url) = self.fetch(&discovered, MAX_REDIRECTS).await?;
                parse_feed_document(&body, final_url.as_str())
                    .map_err(|_| FetchError::Upstream("not a valid feed".to_string()))
            }
        }
    }
}

/// Find the first `<link rel="alternate">` with a feed media type in an HTML
/// document and resolve it against the page URL.
fn find_feed_link_in_html(html: &str, base_url: &Url) -> Option<String> {
    let html_lower = html.to_lowercase();
    let mut search_from = 0;

    while let Some(offset) = html_lower[search_from..].find("<link") {
        let tag_start = search_from + offset;
        let tag_end = match html_lower[tag_start..].find('>') {
            Some(end) => tag_start + end + 1,
            None => break,
        };

        let tag_lower = &html_lower[tag_start..tag_end];
        if has_attr_value(tag_lower, "rel", "alternate") && is_feed_media_type(tag_lower) {
            // Read href from the original slice to keep URL case intact
            let tag = &html[tag_start..tag_end];
            if let Some(href) = attr_value(tag, "href") {
                if let Ok(resolved) = base_url.join(href) {
                    return Some(resolved.to_string());
                }
            }
        }

        search_from = tag_end;
    }

    None
}

fn has_attr_value(tag_lower: &str, name: &str, value: &str) -> bool {
    tag_lower.contains(&format!("{name}=\"{value}\"")) || tag_lower.contains(&format!("{name}='{value}'"))
}

fn is_feed_media_type(tag_lower: &str) -> bool {
    tag_lower.contains("application/rss+xml")
        || tag_lower.contains("application/atom+xml")
        || tag_lower.contains("application/feed+json")
}

fn attr_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let lower = tag.to_lowercase();
    let start = lower.find(&format!("{name}="))? + name.len() + 1;
    let rest = tag.get(start..)?;
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = &rest[1..];
    inner.find(quote).map(|end| &inner[..end])
}

fn upstream_status_error(status: StatusCode) -> FetchError {
    FetchError::Upstream(format!(
        "{} - {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    ))
}
