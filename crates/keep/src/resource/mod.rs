// ABOUTME: HTTP fetch layer shared by the extractor and the archiver.
// ABOUTME: Cache first, IP deny-list in the resolver, request recorder, default headers, proxies and charset decoding.

//! Resource fetching.
//!
//! [`HttpClient`] wraps a `reqwest::Client` with the job's transport rules:
//!
//! 1. the shared [`ResourceCache`] is consulted before anything else;
//! 2. the destination is checked against the [`DenyList`]: IP literals up
//!    front and in the redirect policy, host names by the client's
//!    [`DenyListResolver`] on every connection;
//! 3. the request recorder (if any) is told about the outbound request;
//! 4. default headers are applied and the request is sent, racing the
//!    client's cancellation token.
//!
//! Successful responses are written back into the cache.

pub mod cache;
pub mod denylist;
pub mod proxy;
pub mod resolver;

use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tokio_util::sync::CancellationToken;
use url::{Host, Url};

pub use self::cache::{CachedResource, ResourceCache};
pub use self::denylist::{DenyList, DenyRule};
pub use self::proxy::ProxyTable;
pub use self::resolver::{Denied, DenyListResolver};

use crate::error::ExtractError;
use crate::options::ExtractorOptions;

/// Maximum allowed content length (10 MB).
pub const MAX_CONTENT_LENGTH: usize = 10 * 1024 * 1024;

/// Maximum number of HTTP redirects followed for one request.
pub const MAX_HTTP_REDIRECTS: usize = 10;

/// Called with every URL right before it goes to the network.
pub type RequestRecorder = Arc<dyn Fn(&Url) + Send + Sync>;

/// Result of a fetch, from the network or the cache.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    pub url: Url,
    pub final_url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub cached: bool,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Raw content type header.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Bare, lowercased MIME type without parameters.
    pub fn mime(&self) -> String {
        self.content_type().map(bare_mime).unwrap_or_default()
    }

    /// Decode the body as UTF-8 text, using charset hints from the content type.
    pub fn text_utf8(&self) -> String {
        decode_body(&self.body, self.content_type())
    }
}

struct Inner {
    client: reqwest::Client,
    headers: RwLock<HeaderMap>,
    deny: Arc<DenyList>,
    proxies: ProxyTable,
    cache: Arc<ResourceCache>,
    recorder: Option<RequestRecorder>,
}

/// The job's HTTP client. Cheap to clone; clones share headers and cache.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("deny", &self.inner.deny.len())
            .field("cache", &self.inner.cache.len())
            .finish()
    }
}

impl HttpClient {
    /// Build a client from extractor options around a shared cache.
    pub fn new(opts: &ExtractorOptions, cache: Arc<ResourceCache>) -> Result<Self, ExtractError> {
        let deny = Arc::new(opts.deny_list.clone());

        let policy_deny = Arc::clone(&deny);
        let redirect_policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_HTTP_REDIRECTS {
                return attempt.error("too many HTTP redirects");
            }
            // Host names never get here unchecked: the resolver sees them on connect.
            match literal_ip(attempt.url()).map(|ip| Denied::check(&policy_deny, ip)) {
                Some(Err(denied)) => attempt.error(denied),
                _ => attempt.follow(),
            }
        });

        let mut builder = reqwest::Client::builder()
            .redirect(redirect_policy)
            .timeout(opts.timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .deflate(true);

        if !deny.is_empty() {
            builder = builder.dns_resolver(Arc::new(DenyListResolver::new(Arc::clone(&deny))));
        }

        if !opts.proxies.is_empty() {
            let table = opts.proxies.clone();
            builder = builder.proxy(reqwest::Proxy::custom(move |url| {
                table.proxy_for(url).cloned()
            }));
        }

        let client = builder.build().map_err(|e| {
            ExtractError::fetch("", "HttpClient", Some(anyhow::anyhow!("cannot build client: {}", e)))
        })?;

        let mut headers = default_headers();
        if let Ok(value) = HeaderValue::from_str(&opts.user_agent) {
            headers.insert(reqwest::header::USER_AGENT, value);
        }
        for (name, value) in &opts.headers {
            set_header_in(&mut headers, name, value);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                headers: RwLock::new(headers),
                deny,
                proxies: opts.proxies.clone(),
                cache,
                recorder: opts.recorder.clone(),
            }),
            cancel: opts.cancel.clone(),
        })
    }

    /// A clone observing a different cancellation token.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cancel,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.inner.cache
    }

    pub fn deny_list(&self) -> &DenyList {
        &self.inner.deny
    }

    /// Set a default header for every following request. An empty value removes it.
    pub fn set_header(&self, name: &str, value: &str) {
        let mut headers = self
            .inner
            .headers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        set_header_in(&mut headers, name, value);
    }

    /// Snapshot of the current default headers.
    pub fn headers(&self) -> HeaderMap {
        self.inner
            .headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// GET a URL. Non-2xx responses are returned, not turned into errors.
    pub async fn get(&self, url: &Url) -> Result<FetchResult, ExtractError> {
        if self.cancel.is_cancelled() {
            return Err(ExtractError::cancelled(url.as_str(), "Fetch", None));
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(ExtractError::cancelled(url.as_str(), "Fetch", None))
            }
            res = self.fetch(url) => res,
        }
    }

    async fn fetch(&self, url: &Url) -> Result<FetchResult, ExtractError> {
        let url = strip_fragment(url);

        // Check scheme
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ExtractError::invalid_url(
                url.as_str(),
                "Fetch",
                Some(anyhow::anyhow!("scheme must be http or https")),
            ));
        }

        // The cache answers before any DNS or network activity
        if let Some(hit) = self.inner.cache.get(url.as_str()) {
            tracing::debug!(url = %url, "resource cache hit");
            return Ok(FetchResult {
                status: 200,
                url: url.clone(),
                final_url: url,
                headers: hit.headers,
                body: hit.body,
                cached: true,
            });
        }

        self.check_destination(&url).await?;

        if let Some(recorder) = &self.inner.recorder {
            recorder(&url);
        }

        let headers = self.headers();
        tracing::debug!(url = %url, "fetching");
        let response = self
            .inner
            .client
            .get(url.clone())
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                if let Some(denied) = Denied::find(&e) {
                    blocked(&url, denied.clone())
                } else if e.is_timeout() {
                    ExtractError::timeout(url.as_str(), "Fetch", Some(e.into()))
                } else {
                    ExtractError::fetch(url.as_str(), "Fetch", Some(anyhow::anyhow!("request failed: {}", e)))
                }
            })?;

        // Only matters for proxied requests, whose names skip the resolver
        let final_url = response.url().clone();
        if final_url != url {
            self.check_destination(&final_url).await?;
        }

        if let Some(len) = response.content_length() {
            if len as usize > MAX_CONTENT_LENGTH {
                return Err(ExtractError::fetch(
                    url.as_str(),
                    "Fetch",
                    Some(anyhow::anyhow!("content too large")),
                ));
            }
        }

        let status = response.status().as_u16();
        let response_headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            ExtractError::fetch(
                url.as_str(),
                "Fetch",
                Some(anyhow::anyhow!("failed to read body: {}", e)),
            )
        })?;

        if body.len() > MAX_CONTENT_LENGTH {
            return Err(ExtractError::fetch(
                url.as_str(),
                "Fetch",
                Some(anyhow::anyhow!("content too large")),
            ));
        }

        let result = FetchResult {
            status,
            url,
            final_url,
            headers: response_headers,
            body,
            cached: false,
        };

        if result.is_success() {
            self.inner.cache.insert(
                result.url.as_str(),
                CachedResource::new(result.headers.clone(), result.body.clone()),
            );
        }

        Ok(result)
    }

    /// Refuse a destination on the deny-list before a request is made.
    ///
    /// IP literals are checked directly. Host names are resolved here only
    /// when the request goes through a proxy; otherwise the client's
    /// resolver checks them as it connects.
    pub async fn check_destination(&self, url: &Url) -> Result<(), ExtractError> {
        let deny = &self.inner.deny;
        if deny.is_empty() {
            return Ok(());
        }

        let addrs: Vec<IpAddr> = match url.host() {
            Some(Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
            Some(Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
            Some(Host::Domain(_)) if self.inner.proxies.proxy_for(url).is_none() => {
                return Ok(());
            }
            Some(Host::Domain(host)) => {
                let port = url.port_or_known_default().unwrap_or(80);
                tokio::net::lookup_host((host, port))
                    .await
                    .map_err(|e| {
                        ExtractError::fetch(
                            url.as_str(),
                            "Fetch",
                            Some(anyhow::anyhow!("cannot resolve {}: {}", host, e)),
                        )
                    })?
                    .map(|sa| sa.ip())
                    .collect()
            }
            None => {
                return Err(ExtractError::invalid_url(
                    url.as_str(),
                    "Fetch",
                    Some(anyhow::anyhow!("missing host")),
                ))
            }
        };

        for ip in addrs {
            Denied::check(deny, ip).map_err(|denied| blocked(url, denied))?;
        }
        Ok(())
    }
}

fn literal_ip(url: &Url) -> Option<IpAddr> {
    match url.host()? {
        Host::Ipv4(ip) => Some(IpAddr::V4(ip)),
        Host::Ipv6(ip) => Some(IpAddr::V6(ip)),
        Host::Domain(_) => None,
    }
}

fn blocked(url: &Url, denied: Denied) -> ExtractError {
    tracing::warn!(url = %url, ip = %denied.ip, rule = %denied.rule, "destination blocked");
    ExtractError::blocked(url.as_str(), "Fetch", Some(denied.into()))
}

/// Headers sent with every request unless overridden.
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in [
        (
            "user-agent",
            "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
        ),
        (
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
        ("accept-language", "en-US,en;q=0.8"),
        ("cache-control", "max-age=0"),
        ("upgrade-insecure-requests", "1"),
    ] {
        headers.insert(name, HeaderValue::from_static(value));
    }
    headers
}

fn set_header_in(headers: &mut HeaderMap, name: &str, value: &str) {
    let Ok(name) = HeaderName::from_bytes(name.trim().as_bytes()) else {
        tracing::warn!(header = name, "ignoring invalid header name");
        return;
    };
    if value.is_empty() {
        headers.remove(&name);
        return;
    }
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, "ignoring invalid header value"),
    }
}

/// Returns a copy of `url` without its fragment.
pub fn strip_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

/// Lowercased MIME type with parameters removed.
pub fn bare_mime(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Decode body bytes to a String using charset from content-type header or detection.
pub fn decode_body(body: &[u8], content_type: Option<&str>) -> String {
    if let Some(charset) = content_type.and_then(extract_charset) {
        if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
            let (decoded, _, _) = encoding.decode(body);
            return decoded.into_owned();
        }
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(body, true);
    let encoding = detector.guess(None, true);
    let (decoded, _, _) = encoding.decode(body);
    decoded.into_owned()
}

/// Decode an HTML body: header charset, then a `<meta>` declaration in the
/// first 3 KiB, then detection. Returns the text and the charset label used.
pub fn decode_html(body: &[u8], content_type: Option<&str>) -> (String, String) {
    let label = content_type
        .and_then(extract_charset)
        .or_else(|| meta_charset(body));

    if let Some(label) = label {
        if let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) {
            let (decoded, _, _) = encoding.decode(body);
            return (decoded.into_owned(), encoding.name().to_lowercase());
        }
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(body, true);
    let encoding = detector.guess(None, true);
    let (decoded, _, _) = encoding.decode(body);
    (decoded.into_owned(), encoding.name().to_lowercase())
}

/// Extract charset value from a Content-Type header.
pub fn extract_charset(content_type: &str) -> Option<String> {
    let lower = content_type.to_lowercase();
    for part in lower.split(';') {
        let trimmed = part.trim();
        if let Some(charset) = trimmed.strip_prefix("charset=") {
            let charset = charset.trim_matches('"').trim_matches('\'');
            if !charset.is_empty() {
                return Some(charset.to_string());
            }
        }
    }
    None
}

fn meta_charset(body: &[u8]) -> Option<String> {
    static META_CHARSET: once_cell::sync::Lazy<regex::bytes::Regex> =
        once_cell::sync::Lazy::new(|| {
            regex::bytes::Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#)
                .expect("static regex")
        });

    let head = &body[..body.len().min(3072)];
    let caps = META_CHARSET.captures(head)?;
    let label = std::str::from_utf8(caps.get(1)?.as_bytes()).ok()?;
    Some(label.to_lowercase())
}
