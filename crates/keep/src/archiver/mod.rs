// ABOUTME: Offline archiver that resolves, validates and inlines every resource a page references.
// ABOUTME: Downloads run concurrently under a cancellable semaphore, results go to a private cache.

//! Page snapshots.
//!
//! An [`Archiver`] turns an HTML document into a self-contained one. Each
//! document goes through three phases:
//!
//! 1. parse and collect references (synchronous);
//! 2. resolve the distinct references concurrently, recursing into CSS and
//!    embedded HTML;
//! 3. parse again, rewrite the references through the URL processor and
//!    serialize.
//!
//! A failing resource is reported as an [`ArchiveEvent::Error`] and keeps
//! its original reference. Only cancellation fails the archive.

pub mod events;
pub mod processors;
pub mod refs;
mod step;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use dom_query::Document;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use self::events::{ArchiveEvent, EventHandler};
pub use self::processors::{
    data_url, DataUrlProcessor, ImageProcessor, LocalNameUrlProcessor, ReadThrough, UrlProcessor,
};
pub use self::refs::RefKind;
pub use self::step::ArchivePage;

use crate::error::ExtractError;
use crate::resource::{bare_mime, decode_body, strip_fragment, HttpClient};
use crate::sniff;

/// Default number of concurrent downloads.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Embedded documents are archived up to this depth.
pub const MAX_EMBED_DEPTH: usize = 3;

/// A downloaded, processed resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub data: Bytes,
    pub content_type: String,
}

/// Result of an archive session.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    pub html: String,
    /// Every resource resolved during the session, by URL.
    pub resources: BTreeMap<String, Asset>,
}

/// Which kinds of references are archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveFlags {
    pub images: bool,
    pub stylesheets: bool,
    /// Frames and objects, archived recursively when they are HTML.
    pub embeds: bool,
}

impl Default for ArchiveFlags {
    fn default() -> Self {
        Self {
            images: true,
            stylesheets: true,
            embeds: false,
        }
    }
}

struct Session {
    client: HttpClient,
    flags: ArchiveFlags,
    cache: RwLock<HashMap<String, Asset>>,
    semaphore: Semaphore,
    max_concurrent: usize,
    cancel: CancellationToken,
    request_timeout: Duration,
    image_processor: Arc<dyn ImageProcessor>,
    url_processor: Arc<dyn UrlProcessor>,
    handler: Option<EventHandler>,
    events: Mutex<Vec<ArchiveEvent>>,
    failures: Mutex<Vec<ExtractError>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// An archive session. Clones share the cache, events and semaphore.
#[derive(Clone)]
pub struct Archiver {
    session: Arc<Session>,
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver")
            .field("flags", &self.session.flags)
            .field("max_concurrent", &self.session.max_concurrent)
            .field("resources", &self.resource_count())
            .finish()
    }
}

/// Builder for [`Archiver`].
pub struct ArchiverBuilder {
    client: HttpClient,
    flags: ArchiveFlags,
    max_concurrent: usize,
    cancel: Option<CancellationToken>,
    request_timeout: Duration,
    image_processor: Arc<dyn ImageProcessor>,
    url_processor: Arc<dyn UrlProcessor>,
    handler: Option<EventHandler>,
}

impl ArchiverBuilder {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            flags: ArchiveFlags::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            cancel: None,
            request_timeout: Duration::from_secs(30),
            image_processor: Arc::new(ReadThrough),
            url_processor: Arc::new(DataUrlProcessor),
            handler: None,
        }
    }

    pub fn flags(mut self, flags: ArchiveFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Maximum concurrent downloads. Zero is treated as one.
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    /// Defaults to a child of the client's cancellation token.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn image_processor<P: ImageProcessor + 'static>(mut self, processor: P) -> Self {
        self.image_processor = Arc::new(processor);
        self
    }

    pub fn url_processor<P: UrlProcessor + 'static>(mut self, processor: P) -> Self {
        self.url_processor = Arc::new(processor);
        self
    }

    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ArchiveEvent) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Archiver {
        let cancel = self
            .cancel
            .unwrap_or_else(|| self.client.cancellation().child_token());
        Archiver {
            session: Arc::new(Session {
                client: self.client,
                flags: self.flags,
                cache: RwLock::new(HashMap::new()),
                semaphore: Semaphore::new(self.max_concurrent),
                max_concurrent: self.max_concurrent,
                cancel,
                request_timeout: self.request_timeout,
                image_processor: self.image_processor,
                url_processor: self.url_processor,
                handler: self.handler,
                events: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }
}

impl Archiver {
    pub fn builder(client: HttpClient) -> ArchiverBuilder {
        ArchiverBuilder::new(client)
    }

    /// Archive `html`, resolving references against `base`.
    pub async fn archive(&self, html: &str, base: &Url) -> Result<Archive, ExtractError> {
        let s = &self.session;
        s.emit(ArchiveEvent::Info {
            message: format!("archive start {}", base),
        });

        let html = s.process_html(html.to_string(), base.clone(), 0).await?;

        // Partial output is never returned
        if s.cancel.is_cancelled() {
            return Err(ExtractError::cancelled(base.as_str(), "Archive", None));
        }

        Ok(Archive {
            html,
            resources: self.resources(),
        })
    }

    /// Resolve one resource, through the session cache.
    pub async fn resolve(
        &self,
        raw: &str,
        base: &Url,
        kind: RefKind,
    ) -> Result<Option<Asset>, ExtractError> {
        self.session.process_url(raw, base, kind, 0).await
    }

    /// Snapshot of the session cache.
    pub fn resources(&self) -> BTreeMap<String, Asset> {
        self.session
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn resource_count(&self) -> usize {
        self.session
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Every event emitted so far, in order.
    pub fn events(&self) -> Vec<ArchiveEvent> {
        self.session
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the resource failures recorded so far.
    pub fn take_errors(&self) -> Vec<ExtractError> {
        std::mem::take(
            &mut *self
                .session
                .failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Highest number of downloads observed in flight at once.
    pub fn peak_downloads(&self) -> usize {
        self.session.peak.load(Ordering::SeqCst)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.session.cancel
    }
}

impl Session {
    fn emit(&self, event: ArchiveEvent) {
        tracing::debug!(target: "digests_keep::archiver", %event);
        if let Some(handler) = &self.handler {
            handler(&event);
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Report a resource failure and hand the error back.
    fn fail(&self, url: String, err: ExtractError) -> ExtractError {
        self.emit(ArchiveEvent::Error {
            url,
            error: err.to_string(),
        });
        if !err.is_cancelled() {
            self.failures
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(err.clone());
        }
        err
    }

    fn cached(&self, key: &str) -> Option<Asset> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Insert unless present; the first writer wins.
    fn store(&self, key: String, asset: Asset) -> Asset {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.entry(key).or_insert(asset).clone()
    }

    fn process_html(&self, html: String, base: Url, depth: usize) -> BoxFuture<'_, Result<String, ExtractError>> {
        async move {
            self.emit(ArchiveEvent::StartHtml {
                url: base.to_string(),
            });

            let (base, wanted) = {
                let doc = Document::from(html.as_str());
                let base = refs::document_base(&doc, &base);
                (base.clone(), distinct(&base, refs::collect_html(&doc, self.flags)))
            };

            let resolved = self.resolve_all(&base, wanted, depth).await?;

            let doc = Document::from(html.as_str());
            let lookup = |raw: &str| lookup_in(&resolved, &base, raw);
            refs::rewrite_html(&doc, self.flags, &lookup);
            Ok(doc.html().to_string())
        }
        .boxed()
    }

    fn process_css(&self, css: String, base: Url, depth: usize) -> BoxFuture<'_, Result<String, ExtractError>> {
        async move {
            let wanted = distinct(&base, refs::collect_css(&css));
            let resolved = self.resolve_all(&base, wanted, depth).await?;
            let lookup = |raw: &str| lookup_in(&resolved, &base, raw);
            Ok(refs::rewrite_css(&css, &lookup))
        }
        .boxed()
    }

    /// Resolve references concurrently. Returns the rewritten value per URL.
    async fn resolve_all(
        &self,
        base: &Url,
        wanted: Vec<(Url, RefKind)>,
        depth: usize,
    ) -> Result<HashMap<String, String>, ExtractError> {
        let results = join_all(wanted.into_iter().map(|(url, kind)| async move {
            let res = self.process_url(url.as_str(), base, kind, depth).await;
            (url, res)
        }))
        .await;

        let mut out = HashMap::new();
        for (url, res) in results {
            match res {
                Ok(Some(asset)) => {
                    out.insert(url.to_string(), self.url_processor.rewrite(&url, &asset));
                }
                Ok(None) => {}
                Err(err) if err.is_cancelled() => return Err(err),
                Err(_) => {}
            }
        }
        Ok(out)
    }

    fn process_url<'a>(
        &'a self,
        raw: &'a str,
        parent: &'a Url,
        kind: RefKind,
        depth: usize,
    ) -> BoxFuture<'a, Result<Option<Asset>, ExtractError>> {
        async move {
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with("data:") || raw.starts_with('#') {
                return Ok(None);
            }

            let url = match parent.join(raw) {
                Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => {
                    strip_fragment(&u)
                }
                _ => {
                    let err = ExtractError::invalid_url(
                        raw,
                        "Archive",
                        Some(anyhow::anyhow!("can't parse URL")),
                    );
                    return Err(self.fail(raw.to_string(), err));
                }
            };
            let key = url.to_string();

            if let Some(asset) = self.cached(&key) {
                self.emit(ArchiveEvent::FetchUrl {
                    url: key.clone(),
                    parent: parent.to_string(),
                    cached: true,
                });
                // The entry may have been stored for a stylesheet or icon reference.
                if kind == RefKind::Image && !sniff::is_valid_image(&asset.data) {
                    return Err(self.fail(key, not_an_image(&url)));
                }
                return Ok(Some(asset));
            }
            self.emit(ArchiveEvent::FetchUrl {
                url: key.clone(),
                parent: parent.to_string(),
                cached: false,
            });

            match self.download(&url, kind, depth).await {
                Ok(asset) => Ok(Some(self.store(key, asset))),
                Err(err) => Err(self.fail(key, err)),
            }
        }
        .boxed()
    }

    async fn download(&self, url: &Url, kind: RefKind, depth: usize) -> Result<Asset, ExtractError> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(ExtractError::cancelled(url.as_str(), "Archive", None));
            }
            permit = self.semaphore.acquire() => permit.map_err(|e| {
                ExtractError::archive(url.as_str(), "Archive", Some(anyhow::Error::new(e)))
            })?,
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.emit(ArchiveEvent::DownloadStart {
            url: url.to_string(),
        });

        let res = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExtractError::cancelled(url.as_str(), "Archive", None)),
            res = tokio::time::timeout(self.request_timeout, self.client.get(url)) => match res {
                Ok(res) => res,
                Err(_) => Err(ExtractError::timeout(url.as_str(), "Archive", None)),
            },
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.emit(ArchiveEvent::DownloadDone {
            url: url.to_string(),
        });
        drop(permit);

        let res = res?;
        if !res.is_success() {
            return Err(ExtractError::fetch(
                url.as_str(),
                "Archive",
                Some(anyhow::anyhow!("invalid status code ({})", res.status)),
            ));
        }

        let mut content_type = res.mime();
        if content_type.is_empty() || content_type == "application/octet-stream" {
            content_type = sniff::detect_mime(&res.body)
                .map(str::to_string)
                .or_else(|| sniff::detect_by_extension(url.path()))
                .unwrap_or_else(|| "text/plain".to_string());
        }

        if kind == RefKind::Image && !sniff::is_valid_image(&res.body) {
            return Err(not_an_image(url));
        }

        let base = res.final_url.clone();
        let (data, content_type) = match content_type.as_str() {
            "text/html" if kind == RefKind::Embed && depth < MAX_EMBED_DEPTH => {
                let text = decode_body(&res.body, res.content_type());
                let html = self.process_html(text, base, depth + 1).await?;
                (Bytes::from(html), content_type)
            }
            "text/css" => {
                let text = decode_body(&res.body, res.content_type());
                let css = self.process_css(text, base, depth).await?;
                (Bytes::from(css), content_type)
            }
            ct if ct.starts_with("image/") => self
                .image_processor
                .process(url, res.body.clone(), ct)
                .map_err(|e| ExtractError::archive(url.as_str(), "ImageProcessor", Some(e)))?,
            _ => (res.body.clone(), content_type),
        };

        Ok(Asset {
            data,
            content_type: bare_mime(&content_type),
        })
    }
}

/// Resolve and dedupe references. A URL used by several elements keeps its
/// strictest kind.
fn distinct(base: &Url, references: Vec<refs::Reference>) -> Vec<(Url, RefKind)> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<(Url, RefKind)> = Vec::new();

    for r in references {
        let raw = r.raw.trim();
        if raw.is_empty() || raw.starts_with("data:") || raw.starts_with('#') {
            continue;
        }
        let Ok(url) = base.join(raw) else { continue };
        let url = strip_fragment(&url);
        match seen.get(url.as_str()) {
            Some(&i) => out[i].1 = out[i].1.max(r.kind),
            None => {
                seen.insert(url.to_string(), out.len());
                out.push((url, r.kind));
            }
        }
    }
    out
}

fn lookup_in(resolved: &HashMap<String, String>, base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") || raw.starts_with('#') {
        return None;
    }
    let url = strip_fragment(&base.join(raw).ok()?);
    resolved.get(url.as_str()).cloned()
}

fn not_an_image(url: &Url) -> ExtractError {
    ExtractError::fetch(url.as_str(), "Archive", Some(anyhow::anyhow!("not an image")))
}
