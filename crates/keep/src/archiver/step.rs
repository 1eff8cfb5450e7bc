// ABOUTME: Processor that archives the assembled job HTML once every Drop is done.
// ABOUTME: Resource failures become job errors; cancellation aborts the job.

use async_trait::async_trait;

use super::{ArchiveFlags, Archiver, LocalNameUrlProcessor, DEFAULT_MAX_CONCURRENT};
use crate::process::{Next, ProcessMessage, Processor, Stage};

/// Runs an archive session over the final HTML during [`Stage::Done`].
#[derive(Debug, Clone)]
pub struct ArchivePage {
    flags: ArchiveFlags,
    max_concurrent: usize,
    local_names: bool,
}

impl Default for ArchivePage {
    fn default() -> Self {
        Self {
            flags: ArchiveFlags::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            local_names: false,
        }
    }
}

impl ArchivePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: ArchiveFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Reference resources by local file name instead of inlining them.
    pub fn local_names(mut self, yes: bool) -> Self {
        self.local_names = yes;
        self
    }
}

#[async_trait(?Send)]
impl Processor for ArchivePage {
    fn name(&self) -> &str {
        "archive"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Done {
            return next;
        }
        let html = m.extractor().html().to_string();
        if html.trim().is_empty() {
            return next;
        }
        let Some(base) = m.extractor().drop().map(|d| d.url().clone()) else {
            return next;
        };

        let mut builder = Archiver::builder(m.client().clone())
            .flags(self.flags)
            .max_concurrent(self.max_concurrent)
            .cancellation(m.cancellation().child_token())
            .request_timeout(m.extractor().options().timeout);
        if self.local_names {
            builder = builder.url_processor(LocalNameUrlProcessor::default());
        }
        let archiver = builder.build();

        m.log().info("archiving", &[("url", &base.as_str())]);
        match archiver.archive(&html, &base).await {
            Ok(archive) => {
                for err in archiver.take_errors() {
                    m.add_error(err);
                }
                m.log()
                    .info("archive done", &[("resources", &archive.resources.len())]);
                m.extractor_mut().set_archive(archive);
            }
            Err(err) if err.is_cancelled() => m.cancel(err),
            Err(err) => m.add_error(err),
        }
        next
    }
}
