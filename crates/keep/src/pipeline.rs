// ABOUTME: The default processor chain: scripts and site config, metadata, content, links and archive.
// ABOUTME: Pipeline is a small builder producing the shared processors an Extractor runs.

use std::sync::Arc;

use crate::archiver::ArchivePage;
use crate::contents::{
    CleanDom, ConvertPictures, ExtractInlineSvgs, ExtractLinks, FetchLinks, Readability, Text,
};
use crate::meta::{ExtractFavicon, ExtractMeta, ExtractOembed, ExtractPicture, SetDropProperties};
use crate::process::Processor;
use crate::scripts::{
    ContentScript, ExtractAuthor, ExtractBody, ExtractDate, ExtractTitle, FindContentPage,
    FindNextPage, GoToNextPage, LoadScripts, LoadSiteConfig, ProcessMeta, ReplaceStrings,
    SiteConfigRegistry, StripTags,
};

/// Builds the standard extraction chain.
///
/// ```no_run
/// use digests_keep::{Extractor, Pipeline};
///
/// # async fn run() -> Result<(), digests_keep::ExtractError> {
/// let mut ex = Extractor::builder("https://example.net/article")
///     .processors(Pipeline::new().fetch_links(true).processors())
///     .build()?;
/// ex.run().await?;
/// println!("{}", ex.html());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    scripts: Vec<Arc<dyn ContentScript>>,
    site_configs: Arc<SiteConfigRegistry>,
    fetch_links: bool,
    archive: Option<ArchivePage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script<S: ContentScript + 'static>(mut self, script: S) -> Self {
        self.scripts.push(Arc::new(script));
        self
    }

    pub fn site_configs(mut self, registry: SiteConfigRegistry) -> Self {
        self.site_configs = Arc::new(registry);
        self
    }

    /// Resolve the content links once extraction is done.
    pub fn fetch_links(mut self, yes: bool) -> Self {
        self.fetch_links = yes;
        self
    }

    /// Archive the final HTML as the last step.
    pub fn archive(mut self, step: ArchivePage) -> Self {
        self.archive = Some(step);
        self
    }

    /// The chain, in run order.
    pub fn processors(&self) -> Vec<Arc<dyn Processor>> {
        let mut chain: Vec<Arc<dyn Processor>> = vec![
            Arc::new(LoadScripts::new(self.scripts.clone())),
            Arc::new(LoadSiteConfig::shared(self.site_configs.clone())),
            Arc::new(ReplaceStrings),
            Arc::new(ExtractMeta),
            Arc::new(ExtractOembed),
            Arc::new(SetDropProperties),
            Arc::new(ProcessMeta),
            Arc::new(ExtractFavicon),
            Arc::new(ExtractPicture),
            Arc::new(FindContentPage),
            Arc::new(FindNextPage),
            Arc::new(ExtractTitle),
            Arc::new(ExtractAuthor),
            Arc::new(ExtractDate),
            Arc::new(ExtractBody),
            Arc::new(StripTags),
            Arc::new(GoToNextPage),
            Arc::new(ConvertPictures),
            Arc::new(ExtractInlineSvgs),
            Arc::new(Readability),
            Arc::new(CleanDom),
            Arc::new(ExtractLinks),
            Arc::new(Text),
        ];
        if self.fetch_links {
            chain.push(Arc::new(FetchLinks));
        }
        if let Some(step) = &self.archive {
            chain.push(Arc::new(step.clone()));
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chain_order() {
        let names: Vec<String> = Pipeline::new()
            .fetch_links(true)
            .archive(ArchivePage::new())
            .processors()
            .iter()
            .map(|p| p.name().to_string())
            .collect();

        let pos = |n: &str| names.iter().position(|x| x == n).unwrap();
        assert!(pos("load-scripts") < pos("load-site-config"));
        assert!(pos("extract-meta") < pos("extract-oembed"));
        assert!(pos("extract-oembed") < pos("process-meta"));
        assert!(pos("find-content-page") < pos("find-next-page"));
        assert!(pos("extract-inline-svgs") < pos("readability"));
        assert!(pos("readability") < pos("clean-dom"));
        assert_eq!(names.last().map(String::as_str), Some("archive"));
        assert_eq!(names[names.len() - 2], "fetch-links");
    }

    #[test]
    fn optional_steps_are_off_by_default() {
        let names: Vec<String> = Pipeline::new()
            .processors()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert!(!names.iter().any(|n| n == "fetch-links" || n == "archive"));
    }
}
