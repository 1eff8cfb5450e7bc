// ABOUTME: Processor chain primitives: stages, the Next continuation, the Processor trait and ProcessMessage.
// ABOUTME: Processors inspect and mutate the current Drop/DOM and request structural changes through the message.

//! The processor chain.
//!
//! A processor is called once per (Drop, Stage) pair with a [`ProcessMessage`]
//! and the continuation [`Next`] pointing at the following processor. It
//! returns `next` to pass control on, or [`Next::stop`] to skip the remainder
//! of the chain for this stage.
//!
//! Processors never alter the Drop list directly: [`ProcessMessage::replace_drop`]
//! and [`ProcessMessage::add_drop`] record requests that the
//! [`Extractor`](crate::Extractor) applies, and counts, after the stage.

use std::fmt;

use async_trait::async_trait;
use dom_query::Document;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::drop::Drop;
use crate::error::ExtractError;
use crate::extractor::Extractor;
use crate::log::JobLog;
use crate::resource::HttpClient;
use crate::values::Values;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Job initialization, position 0 of a fresh pass only.
    Start,
    /// The Drop body is loaded.
    Body,
    /// The DOM is available for enrichment.
    Dom,
    /// Finishing touches on the final DOM.
    PostProcess,
    /// Per-Drop wrap-up.
    Finish,
    /// Once, after every Drop was processed.
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Start => "start",
            Stage::Body => "body",
            Stage::Dom => "dom",
            Stage::PostProcess => "postprocess",
            Stage::Finish => "finish",
            Stage::Done => "done",
        })
    }
}

/// Continuation handed to a processor: the index of the processor to run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Next(Option<usize>);

impl Next {
    /// The stop sentinel: nothing else runs for this stage.
    pub fn stop() -> Self {
        Next(None)
    }

    pub fn is_stop(&self) -> bool {
        self.0.is_none()
    }

    pub(crate) fn start(len: usize) -> Self {
        Next((len > 0).then_some(0))
    }

    pub(crate) fn after(index: usize, len: usize) -> Self {
        Next((index + 1 < len).then_some(index + 1))
    }

    pub(crate) fn index(&self) -> Option<usize> {
        self.0
    }
}

/// One step of the extraction pipeline.
#[async_trait(?Send)]
pub trait Processor {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next;
}

/// Structural change requested by a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DropRequest {
    Replace(Url),
    Append(Url),
}

/// State threaded through the chain for one (Drop, Stage) pair.
pub struct ProcessMessage<'a> {
    extractor: &'a mut Extractor,
    stage: Stage,
    position: usize,
    /// The parsed document. Present during `Dom` and `PostProcess` for HTML Drops.
    pub dom: Option<Document>,
    pub(crate) requests: Vec<DropRequest>,
    pub(crate) abort: Option<ExtractError>,
}

impl<'a> ProcessMessage<'a> {
    pub(crate) fn new(
        extractor: &'a mut Extractor,
        stage: Stage,
        position: usize,
        dom: Option<Document>,
    ) -> Self {
        Self {
            extractor,
            stage,
            position,
            dom,
            requests: Vec::new(),
            abort: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Index of the current Drop in the job's list.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn extractor(&self) -> &Extractor {
        &*self.extractor
    }

    pub fn extractor_mut(&mut self) -> &mut Extractor {
        &mut *self.extractor
    }

    /// The Drop being processed.
    pub fn drop(&self) -> &Drop {
        &self.extractor.drops()[self.position]
    }

    pub fn drop_mut(&mut self) -> &mut Drop {
        let position = self.position;
        &mut self.extractor.drops_mut()[position]
    }

    pub fn client(&self) -> &HttpClient {
        self.extractor.client()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.extractor.cancellation()
    }

    pub fn values(&self) -> &Values {
        self.extractor.values()
    }

    pub fn values_mut(&mut self) -> &mut Values {
        self.extractor.values_mut()
    }

    pub fn log(&mut self) -> &mut JobLog {
        self.extractor.log_mut()
    }

    /// Record a non-fatal error.
    pub fn add_error(&mut self, err: ExtractError) {
        self.extractor.add_error(err);
    }

    /// Ask for the current Drop to be replaced by `url` and the walk restarted
    /// from Start. Callers usually return [`Next::stop`] right after.
    pub fn replace_drop(&mut self, url: &Url) {
        self.requests.push(DropRequest::Replace(url.clone()));
    }

    /// Ask for a new Drop to be appended to the job.
    pub fn add_drop(&mut self, url: &Url) {
        self.requests.push(DropRequest::Append(url.clone()));
    }

    /// Abort the whole job after this stage.
    pub fn cancel(&mut self, err: ExtractError) {
        self.abort.get_or_insert(err);
    }

    /// Run a closure against the DOM if there is one.
    pub fn with_dom<R>(&self, f: impl FnOnce(&Document) -> R) -> Option<R> {
        self.dom.as_ref().map(f)
    }
}
