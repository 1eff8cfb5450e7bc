// ABOUTME: The Extractor orchestrates one extraction job over a growing list of Drops.
// ABOUTME: Runs every stage of the processor chain per Drop and enforces the redirect and page ceilings.

//! Extraction jobs.
//!
//! [`Extractor::run`] walks the Drop list in order. For every unvisited Drop
//! it loads the body, runs the `Body`, `Dom`, `PostProcess` and `Finish`
//! stages, then renders the DOM back into the Drop. `Start` runs at position 0
//! whenever a pass (re)starts. Once every Drop is processed the final HTML and
//! text are assembled and `Done` runs once.
//!
//! Processors ask for structural changes through the message. The Extractor
//! applies them between stages and owns the counters that bound them:
//!
//! * each applied replacement counts against `max_redirects`;
//! * each appended Drop counts against `max_pages`.
//!
//! Exceeding either aborts the job with a fatal error.

use std::collections::HashSet;
use std::sync::Arc;

use dom_query::Document;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::archiver::Archive;
use crate::drop::Drop;
use crate::error::ExtractError;
use crate::log::JobLog;
use crate::options::{ExtractorBuilder, ExtractorOptions};
use crate::process::{DropRequest, Next, ProcessMessage, Processor, Stage};
use crate::resource::{HttpClient, ResourceCache};
use crate::values::Values;

/// What the walk does after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Restart,
}

/// One extraction job.
pub struct Extractor {
    drops: Vec<Drop>,
    visited: HashSet<String>,
    processors: Vec<Arc<dyn Processor>>,
    client: HttpClient,
    cache: Arc<ResourceCache>,
    opts: ExtractorOptions,
    errors: Vec<ExtractError>,
    log: JobLog,
    values: Values,
    html: String,
    text: String,
    archive: Option<Archive>,
    redirects: usize,
    pages: usize,
}

impl Extractor {
    /// Start building a job for `url`.
    pub fn builder(url: impl Into<String>) -> ExtractorBuilder {
        ExtractorBuilder::new(url)
    }

    /// Create a job for `url` with the given options and processors.
    pub fn new(
        url: &str,
        opts: ExtractorOptions,
        processors: Vec<Arc<dyn Processor>>,
    ) -> Result<Self, ExtractError> {
        let drop = Drop::parse(url)?;
        let cache = Arc::new(ResourceCache::new());
        let client = HttpClient::new(&opts, Arc::clone(&cache))?;

        Ok(Self {
            drops: vec![drop],
            visited: HashSet::new(),
            processors,
            client,
            cache,
            opts,
            errors: Vec::new(),
            log: JobLog::new(),
            values: Values::new(),
            html: String::new(),
            text: String::new(),
            archive: None,
            redirects: 0,
            pages: 0,
        })
    }

    pub fn options(&self) -> &ExtractorOptions {
        &self.opts
    }

    pub fn drops(&self) -> &[Drop] {
        &self.drops
    }

    pub fn drops_mut(&mut self) -> &mut [Drop] {
        &mut self.drops
    }

    /// The first Drop of the job.
    pub fn drop(&self) -> Option<&Drop> {
        self.drops.first()
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.opts.cancel
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Values {
        &mut self.values
    }

    pub fn errors(&self) -> &[ExtractError] {
        &self.errors
    }

    pub fn logs(&self) -> &[String] {
        self.log.lines()
    }

    pub(crate) fn log_mut(&mut self) -> &mut JobLog {
        &mut self.log
    }

    /// Final HTML of all Drops, separated by page markers.
    pub fn html(&self) -> &str {
        &self.html
    }

    /// Plain text of all Drops.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn archive(&self) -> Option<&Archive> {
        self.archive.as_ref()
    }

    pub fn set_archive(&mut self, archive: Archive) {
        self.archive = Some(archive);
    }

    /// Number of replacements applied so far.
    pub fn redirects(&self) -> usize {
        self.redirects
    }

    /// Number of Drops appended so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// True when `url` (fragment ignored) was already processed in this job.
    pub fn is_visited(&self, url: &Url) -> bool {
        let mut url = url.clone();
        url.set_fragment(None);
        self.visited.contains(url.as_str())
    }

    /// Append an error to the error list and the log.
    pub fn add_error(&mut self, err: ExtractError) {
        self.log.error(
            err.user_message(),
            &[("err", &err), ("url", &err.url.as_str())],
        );
        self.errors.push(err);
    }

    /// Run the job. Drop-scoped failures are collected in [`errors`](Self::errors);
    /// only safety limits and cancellation return an error.
    pub async fn run(&mut self) -> Result<(), ExtractError> {
        let chain = self.processors.clone();
        let mut position = 0;
        let mut fresh_pass = true;

        while position < self.drops.len() {
            self.check_cancelled()?;

            if fresh_pass {
                fresh_pass = false;
                let mut no_dom = None;
                if self.run_stage(&chain, Stage::Start, 0, &mut no_dom).await? == Flow::Restart {
                    position = 0;
                    fresh_pass = true;
                    continue;
                }
            }

            let key = self.drops[position].url().to_string();
            if !self.visited.insert(key) {
                position += 1;
                continue;
            }

            match self.process_drop(&chain, position).await? {
                Flow::Restart => {
                    position = 0;
                    fresh_pass = true;
                }
                Flow::Continue => position += 1,
            }
        }

        if !self.drops.iter().any(Drop::is_loaded) {
            self.log.warn("no drop could be loaded", &[]);
            return Ok(());
        }

        self.assemble();

        let mut no_dom = None;
        self.run_stage(&chain, Stage::Done, 0, &mut no_dom).await?;
        self.log.info("extraction done", &[("drops", &self.drops.len())]);
        Ok(())
    }

    async fn process_drop(
        &mut self,
        chain: &[Arc<dyn Processor>],
        position: usize,
    ) -> Result<Flow, ExtractError> {
        let url = self.drops[position].url().to_string();
        self.log.info("start", &[("idx", &position), ("url", &url)]);

        let client = self.client.clone();
        if let Err(err) = self.drops[position].load(&client).await {
            if err.is_cancelled() {
                return Err(self.fail(err));
            }
            self.drops[position].mark_failed();
            self.add_error(err);
            return Ok(Flow::Continue);
        }

        // The final URL after HTTP redirects counts as visited too
        let loaded = self.drops[position].url().to_string();
        self.visited.insert(loaded);

        let mut dom = None;
        if self.run_stage(chain, Stage::Body, position, &mut dom).await? == Flow::Restart {
            return Ok(Flow::Restart);
        }

        if self.drops[position].is_html() {
            let body = self.drops[position].body_text();
            if body.trim().is_empty() {
                self.add_error(ExtractError::parse(
                    url.as_str(),
                    "Parse",
                    Some(anyhow::anyhow!("empty document")),
                ));
            } else {
                dom = Some(Document::from(body.as_str()));
            }
        }

        for stage in [Stage::Dom, Stage::PostProcess] {
            if self.run_stage(chain, stage, position, &mut dom).await? == Flow::Restart {
                return Ok(Flow::Restart);
            }
        }

        if let Some(doc) = dom.take() {
            let body = doc.select("body");
            let html = if !body.is_empty() {
                body.inner_html().to_string()
            } else {
                doc.html().to_string()
            };
            self.drops[position].html = html;
        }

        let mut no_dom = None;
        self.run_stage(chain, Stage::Finish, position, &mut no_dom).await
    }

    /// Run the chain for one stage, then apply the requests it made.
    async fn run_stage(
        &mut self,
        chain: &[Arc<dyn Processor>],
        stage: Stage,
        position: usize,
        dom: &mut Option<Document>,
    ) -> Result<Flow, ExtractError> {
        tracing::debug!(stage = %stage, position, "running stage");

        let (requests, abort) = {
            let mut m = ProcessMessage::new(self, stage, position, dom.take());
            let mut next = Next::start(chain.len());
            while let Some(i) = next.index() {
                if m.cancellation().is_cancelled() {
                    m.cancel(ExtractError::cancelled("", stage.to_string(), None));
                    break;
                }
                next = chain[i].process(&mut m, Next::after(i, chain.len())).await;
            }
            *dom = m.dom.take();
            (std::mem::take(&mut m.requests), m.abort.take())
        };

        if let Some(err) = abort {
            return Err(self.fail(err));
        }
        self.apply(position, requests)
    }

    fn apply(&mut self, position: usize, requests: Vec<DropRequest>) -> Result<Flow, ExtractError> {
        let mut flow = Flow::Continue;

        for request in requests {
            match request {
                DropRequest::Replace(url) => {
                    if self.drops.len() > 1 {
                        self.add_error(ExtractError::new(
                            crate::error::ErrorCode::Parse,
                            url.as_str(),
                            "ReplaceDrop",
                            Some(anyhow::anyhow!(
                                "cannot replace a drop when there are more than one"
                            )),
                        ));
                        continue;
                    }
                    if self.redirects >= self.opts.max_redirects {
                        let err =
                            ExtractError::too_many_redirects(url.as_str(), self.opts.max_redirects);
                        return Err(self.fail(err));
                    }
                    self.redirects += 1;
                    self.log.info(
                        "replacing drop",
                        &[("position", &position), ("url", &url.as_str())],
                    );
                    let drop = Drop::new(&url);
                    // A replacement is always loaded, even when seen before,
                    // so loops run into the redirect ceiling.
                    self.visited.remove(drop.url().as_str());
                    self.drops[0] = drop;
                    flow = Flow::Restart;
                }
                DropRequest::Append(url) => {
                    let drop = Drop::new(&url);
                    let known = self.visited.contains(drop.url().as_str())
                        || self.drops.iter().any(|d| d.url() == drop.url());
                    if known {
                        self.log.debug("drop already known", &[("url", &drop.url().as_str())]);
                        continue;
                    }
                    if self.pages >= self.opts.max_pages {
                        let err = ExtractError::too_many_pages(url.as_str(), self.opts.max_pages);
                        return Err(self.fail(err));
                    }
                    self.pages += 1;
                    self.log.info("adding drop", &[("url", &drop.url().as_str())]);
                    self.drops.push(drop);
                }
            }
        }
        Ok(flow)
    }

    /// Join the Drops into the job's final HTML and text.
    fn assemble(&mut self) {
        let loaded: Vec<&Drop> = self.drops.iter().filter(|d| d.is_loaded()).collect();

        self.html = if loaded.len() == 1 {
            loaded[0].html.clone()
        } else {
            loaded
                .iter()
                .enumerate()
                .map(|(i, d)| format!("<!-- page {} -->\n{}", i + 1, d.html.trim()))
                .collect::<Vec<_>>()
                .join("\n")
        };

        self.text = loaded
            .iter()
            .map(|d| d.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
    }

    fn check_cancelled(&mut self) -> Result<(), ExtractError> {
        if self.opts.cancel.is_cancelled() {
            let url = self.drops.first().map(|d| d.url().to_string()).unwrap_or_default();
            return Err(self.fail(ExtractError::cancelled(url, "Run", None)));
        }
        Ok(())
    }

    /// Record a fatal error and hand it back for returning.
    fn fail(&mut self, err: ExtractError) -> ExtractError {
        self.add_error(err.clone());
        err
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("drops", &self.drops.len())
            .field("processors", &self.processors.len())
            .field("errors", &self.errors.len())
            .finish()
    }
}
