// ABOUTME: Configuration for extraction jobs: ExtractorOptions and the fluent ExtractorBuilder.
// ABOUTME: Covers transport settings, safety ceilings, hook timeout, cancellation and pre-seeded resources.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::ExtractError;
use crate::extractor::Extractor;
use crate::process::Processor;
use crate::resource::{CachedResource, DenyList, ProxyTable, RequestRecorder};

/// Default ceiling for single-page/redirect restarts.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Default ceiling for appended pages.
pub const DEFAULT_MAX_PAGES: usize = 100;

/// Default wall-clock budget for one content script hook.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration options for one extraction job.
#[derive(Clone)]
pub struct ExtractorOptions {
    pub timeout: Duration,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub deny_list: DenyList,
    pub proxies: ProxyTable,
    pub max_redirects: usize,
    pub max_pages: usize,
    pub hook_timeout: Duration,
    pub cancel: CancellationToken,
    pub recorder: Option<RequestRecorder>,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0"
                .to_string(),
            headers: Vec::new(),
            deny_list: DenyList::new(),
            proxies: ProxyTable::new(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            max_pages: DEFAULT_MAX_PAGES,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
            cancel: CancellationToken::new(),
            recorder: None,
        }
    }
}

impl fmt::Debug for ExtractorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorOptions")
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("headers", &self.headers)
            .field("deny_list", &self.deny_list)
            .field("proxies", &self.proxies)
            .field("max_redirects", &self.max_redirects)
            .field("max_pages", &self.max_pages)
            .field("hook_timeout", &self.hook_timeout)
            .field("recorder", &self.recorder.is_some())
            .finish()
    }
}

/// Builder for constructing an [`Extractor`] for one URL.
pub struct ExtractorBuilder {
    url: String,
    opts: ExtractorOptions,
    processors: Vec<Arc<dyn Processor>>,
    resources: Vec<(String, CachedResource)>,
    body: Option<Bytes>,
}

impl ExtractorBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            opts: ExtractorOptions::default(),
            processors: Vec::new(),
            resources: Vec::new(),
            body: None,
        }
    }

    /// Replace all options at once.
    pub fn options(mut self, opts: ExtractorOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Set the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.timeout = timeout;
        self
    }

    /// Set the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.opts.user_agent = user_agent.into();
        self
    }

    /// Add a default header to all requests.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.opts.headers.push((key.into(), value.into()));
        self
    }

    /// Refuse destinations resolving into these networks.
    pub fn deny_list(mut self, deny: DenyList) -> Self {
        self.opts.deny_list = deny;
        self
    }

    /// Route matching hosts through proxies.
    pub fn proxies(mut self, proxies: ProxyTable) -> Self {
        self.opts.proxies = proxies;
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.opts.max_redirects = max;
        self
    }

    pub fn max_pages(mut self, max: usize) -> Self {
        self.opts.max_pages = max;
        self
    }

    pub fn hook_timeout(mut self, timeout: Duration) -> Self {
        self.opts.hook_timeout = timeout;
        self
    }

    /// Tie the job to an external cancellation token.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.opts.cancel = cancel;
        self
    }

    /// Observe every URL right before it is requested from the network.
    pub fn on_request<F>(mut self, recorder: F) -> Self
    where
        F: Fn(&Url) + Send + Sync + 'static,
    {
        self.opts.recorder = Some(Arc::new(recorder));
        self
    }

    /// Append a processor to the chain.
    pub fn processor<P: Processor + 'static>(mut self, processor: P) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    /// Append already shared processors to the chain.
    pub fn processors<I>(mut self, processors: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Processor>>,
    {
        self.processors.extend(processors);
        self
    }

    /// Pre-seed the resource cache: fetching `url` will not touch the network.
    pub fn cached_resource(
        mut self,
        url: impl Into<String>,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Self {
        self.resources
            .push((url.into(), CachedResource::new(headers, body)));
        self
    }

    /// Use these bytes as the first page's HTML instead of fetching it.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Build the Extractor with the configured options.
    pub fn build(self) -> Result<Extractor, ExtractError> {
        let mut extractor = Extractor::new(&self.url, self.opts, self.processors)?;
        for (url, resource) in self.resources {
            extractor.cache().insert(url, resource);
        }
        if let Some(body) = self.body {
            if let Some(drop) = extractor.drops_mut().first_mut() {
                drop.set_body(body);
            }
        }
        Ok(extractor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = ExtractorOptions::default();
        assert_eq!(opts.max_redirects, DEFAULT_MAX_REDIRECTS);
        assert_eq!(opts.max_pages, DEFAULT_MAX_PAGES);
        assert_eq!(opts.hook_timeout, Duration::from_secs(10));
        assert!(opts.deny_list.is_empty());
        assert!(!opts.cancel.is_cancelled());
    }

    #[test]
    fn builder_rejects_bad_url() {
        let err = ExtractorBuilder::new("not a url").build().unwrap_err();
        assert!(err.is_invalid_url());
    }

    #[test]
    fn builder_seeds_cache_and_body() {
        let ex = ExtractorBuilder::new("http://example.net/page1#intro")
            .max_pages(3)
            .cached_resource("http://example.net/img.png", HeaderMap::new(), "png")
            .body("<p>hello</p>")
            .build()
            .unwrap();

        assert_eq!(ex.options().max_pages, 3);
        assert!(ex.cache().contains("http://example.net/img.png"));
        assert_eq!(ex.drops().len(), 1);
        assert_eq!(ex.drops()[0].url().as_str(), "http://example.net/page1");
        assert!(ex.drops()[0].has_body());
    }
}
