// ABOUTME: The Drop record: one fetched or synthesized resource tracked by an extraction job.
// ABOUTME: Holds identity (fragment-free URL, domain), content, enrichment metadata and pictures.

//! Drops.
//!
//! A [`Drop`] is created from a URL whose fragment is removed immediately, so
//! two Drops are the same resource iff their URLs compare equal. Its body is
//! loaded once through the job's [`HttpClient`]; everything else is filled in
//! by processors.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use url::Url;

use crate::error::ExtractError;
use crate::resource::{decode_html, strip_fragment, HttpClient};

static AUTHOR_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?i)by(\s*:)?\s+").unwrap());
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Document types treated as media rather than readable articles.
const MEDIA_TYPES: &[&str] = &["photo", "video", "audio", "music"];

/// Load state of a Drop. Failed Drops stay in the job's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropState {
    Pending,
    Loaded,
    Failed,
}

/// Multi-valued raw metadata (`graph.title`, `html.author`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropMeta(BTreeMap<String, Vec<String>>);

impl DropMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append values to a key. Empty strings are ignored.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.trim().is_empty() {
            return;
        }
        self.0.entry(key.into()).or_default().push(value.trim().to_string());
    }

    /// Replace every value of a key.
    pub fn set(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.0.insert(key.into(), values);
    }

    pub fn get(&self, key: &str) -> &[String] {
        self.0.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Values of the first key that has any.
    pub fn lookup(&self, keys: &[&str]) -> &[String] {
        keys.iter()
            .map(|k| self.get(k))
            .find(|v| !v.is_empty())
            .unwrap_or(&[])
    }

    /// First value of the first key that has any, or "".
    pub fn lookup_get(&self, keys: &[&str]) -> &str {
        self.lookup(keys).first().map(String::as_str).unwrap_or("")
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Structured data blocks found in a page (`json-ld`, `json`, `meta`, `link`).
pub type DropProperties = BTreeMap<String, serde_json::Value>;

/// An image attached to a Drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picture {
    pub href: String,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub bytes: Bytes,
}

/// One resource tracked by the extractor.
#[derive(Debug, Clone)]
pub struct Drop {
    url: Url,
    domain: String,
    site: String,
    content_type: String,
    charset: String,
    headers: HeaderMap,
    body: Bytes,
    state: DropState,
    authors: Vec<String>,

    pub html: String,
    pub text: String,
    pub title: String,
    pub description: String,
    pub site_name: String,
    pub lang: String,
    pub text_direction: String,
    pub document_type: String,
    pub date: Option<DateTime<Utc>>,
    pub meta: DropMeta,
    pub properties: DropProperties,
    pub pictures: BTreeMap<String, Picture>,
}

impl Drop {
    /// Create a Drop. The URL fragment is dropped.
    pub fn new(url: &Url) -> Self {
        let mut drop = Self {
            url: strip_fragment(url),
            domain: String::new(),
            site: String::new(),
            content_type: String::new(),
            charset: String::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            state: DropState::Pending,
            authors: Vec::new(),
            html: String::new(),
            text: String::new(),
            title: String::new(),
            description: String::new(),
            site_name: String::new(),
            lang: String::new(),
            text_direction: String::new(),
            document_type: String::new(),
            date: None,
            meta: DropMeta::new(),
            properties: DropProperties::new(),
            pictures: BTreeMap::new(),
        };
        drop.refresh_identity();
        drop
    }

    /// Parse `raw` as an absolute http(s) URL and create a Drop for it.
    pub fn parse(raw: &str) -> Result<Self, ExtractError> {
        let url = Url::parse(raw.trim()).map_err(|e| {
            ExtractError::invalid_url(raw, "NewDrop", Some(anyhow::anyhow!("{}", e)))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ExtractError::invalid_url(
                raw,
                "NewDrop",
                Some(anyhow::anyhow!("scheme must be http or https")),
            ));
        }
        Ok(Self::new(&url))
    }

    fn refresh_identity(&mut self) {
        let host = self.url.host_str().unwrap_or_default().to_lowercase();
        self.domain = match self.url.host() {
            Some(url::Host::Domain(_)) => psl::domain_str(&host)
                .map(str::to_string)
                .unwrap_or_else(|| host.trim_start_matches("www.").to_string()),
            _ => host.clone(),
        };
        self.site = host;
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Replace the URL (after redirects). The fragment is dropped.
    pub fn set_url(&mut self, url: &Url) {
        self.url = strip_fragment(url);
        self.refresh_identity();
    }

    /// Registrable domain, e.g. `example.co.uk`.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Full host name.
    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as text (lossy for binary bodies).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Pre-supply or replace the body. Control characters are removed.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        let body: Bytes = body.into();
        self.body = match std::str::from_utf8(&body) {
            Ok(text) => Bytes::from(strip_control_chars(text)),
            Err(_) => body,
        };
    }

    pub fn state(&self) -> DropState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == DropState::Loaded
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = DropState::Failed;
    }

    /// Override the content type, e.g. when a hook supplies HTML for a media Drop.
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = content_type.into();
    }

    pub fn is_html(&self) -> bool {
        matches!(
            self.content_type.as_str(),
            "text/html" | "application/xhtml+xml"
        )
    }

    pub fn is_media(&self) -> bool {
        MEDIA_TYPES.contains(&self.document_type.as_str())
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    /// Replace the author list.
    pub fn set_authors<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.authors.clear();
        self.add_authors(names);
    }

    /// Add authors, dropping a leading "by"/"by:", collapsing spaces and
    /// ignoring case-insensitive duplicates. The list stays sorted.
    pub fn add_authors<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = AUTHOR_PREFIX.replace(name.as_ref().trim(), "");
            let name = SPACES.replace_all(name.trim(), " ").to_string();
            if name.is_empty() {
                continue;
            }
            let lower = name.to_lowercase();
            if self.authors.iter().any(|a| a.to_lowercase() == lower) {
                continue;
            }
            self.authors.push(name);
        }
        self.authors.sort();
    }

    /// Fetch the body unless one was pre-supplied, and classify it.
    pub async fn load(&mut self, client: &HttpClient) -> Result<(), ExtractError> {
        if self.has_body() {
            self.content_type = "text/html".to_string();
            self.charset = "utf-8".to_string();
            self.state = DropState::Loaded;
            return Ok(());
        }

        let res = client.get(&self.url).await?;
        if !res.is_success() {
            return Err(ExtractError::fetch(
                self.url.as_str(),
                "Load",
                Some(anyhow::anyhow!("invalid status code ({})", res.status)),
            ));
        }

        self.set_url(&res.final_url);
        self.content_type = res.mime();
        if self.content_type.is_empty() {
            self.content_type = crate::sniff::detect_mime(&res.body)
                .unwrap_or("application/octet-stream")
                .to_string();
        }
        self.headers = res.headers.clone();

        match self.content_type.as_str() {
            "text/html" | "application/xhtml+xml" => {
                let (text, charset) = decode_html(&res.body, res.content_type());
                self.charset = charset;
                self.body = Bytes::from(strip_control_chars(&text));
            }
            "text/plain" => {
                let (text, charset) = decode_html(&res.body, res.content_type());
                self.charset = charset;
                self.content_type = "text/html".to_string();
                let title = file_title(&self.url);
                self.body = Bytes::from(format!(
                    "<html><head><title>{}</title></head><body><pre>{}</pre></body></html>",
                    ammonia::clean_text(&title),
                    ammonia::clean_text(&strip_control_chars(&text)),
                ));
            }
            ct if ct.starts_with("image/") => {
                self.document_type = "photo".to_string();
                self.title = file_title(&self.url);
                self.meta.add("x.picture_url", self.url.as_str());
                self.body = res.body;
            }
            _ => {
                self.body = res.body;
            }
        }

        self.state = DropState::Loaded;
        Ok(())
    }
}

/// Title derived from the last path segment, falling back to the URL.
fn file_title(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut s| s.next_back().map(str::to_string))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| url.to_string())
}

/// Remove control characters other than tab, newline and carriage return.
pub fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}
