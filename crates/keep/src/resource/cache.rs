// ABOUTME: Job-scoped resource cache consulted by the fetch layer before any network call.
// ABOUTME: Entries are keyed by URL and follow write-once-wins semantics under a RwLock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use reqwest::header::HeaderMap;

/// A cached response: body plus the headers it was served with.
#[derive(Debug, Clone)]
pub struct CachedResource {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResource {
    pub fn new(headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Content type header value, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// URL-keyed cache. The first writer for a key wins; entries are never
/// replaced or evicted for the lifetime of the cache.
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: RwLock<HashMap<String, CachedResource>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<CachedResource> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(url)
    }

    /// Insert unless the URL is already cached. Returns true if this call stored the entry.
    pub fn insert(&self, url: impl Into<String>, resource: CachedResource) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let url = url.into();
        if entries.contains_key(&url) {
            return false;
        }
        entries.insert(url, resource);
        true
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn urls(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut urls: Vec<String> = entries.keys().cloned().collect();
        urls.sort();
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_writer_wins() {
        let cache = ResourceCache::new();
        assert!(cache.insert("http://x/a", CachedResource::new(HeaderMap::new(), "one")));
        assert!(!cache.insert("http://x/a", CachedResource::new(HeaderMap::new(), "two")));

        let entry = cache.get("http://x/a").unwrap();
        assert_eq!(entry.body, Bytes::from_static(b"one"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn content_type_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            "text/html; charset=utf-8".parse().unwrap(),
        );
        let entry = CachedResource::new(headers, "<p>hi</p>");
        assert_eq!(entry.content_type(), Some("text/html; charset=utf-8"));
    }
}
