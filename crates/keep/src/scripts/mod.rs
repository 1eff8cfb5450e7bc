// ABOUTME: Customization layer: content script hooks, their runtime and the site config processors.
// ABOUTME: Every hook call is bounded by a timeout and the job's cancellation token.

//! Content scripts and site configuration.
//!
//! A [`ContentScript`] customizes extraction for some destinations through
//! three hooks:
//!
//! * `load` decides whether the script is active for the job's URL;
//! * `set_config` may change the [`SiteConfig`] before any DOM processing;
//! * `process_meta` may adjust title, authors, description, type, body HTML
//!   and whether readability runs, once metadata is extracted.
//!
//! Hooks run on a copy of what they change. The copy is committed only when
//! the hook returns `Ok` within the hook timeout, so a failing script never
//! leaves partial edits behind.

pub mod processors;
pub mod selectors;
pub mod siteconfig;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use self::processors::{
    ExtractAuthor, ExtractBody, ExtractDate, ExtractTitle, FindContentPage, FindNextPage, GoToNextPage,
    LoadScripts, LoadSiteConfig, NextPage, ProcessMeta, ReplaceStrings, StripTags,
};
pub use self::siteconfig::{FilterTest, SiteConfig, SiteConfigRegistry};

use crate::drop::{DropMeta, DropProperties};
use crate::error::ExtractError;

/// Document types a hook may set.
pub const SCRIPT_DOCUMENT_TYPES: &[&str] = &["article", "photo", "video"];

/// Values a `process_meta` hook can read and change.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaUpdate {
    pub url: Url,
    pub domain: String,
    pub title: String,
    pub description: String,
    pub site_name: String,
    pub authors: Vec<String>,
    pub document_type: String,
    pub meta: DropMeta,
    pub properties: DropProperties,
    /// Whether generic readability extraction runs for this Drop.
    pub readability: bool,
    /// Replacement body HTML. It is sanitized before use.
    pub html: Option<String>,
}

impl MetaUpdate {
    pub fn set_type(&mut self, document_type: &str) -> anyhow::Result<()> {
        if !SCRIPT_DOCUMENT_TYPES.contains(&document_type) {
            anyhow::bail!("\"{}\" is not a valid type", document_type);
        }
        self.document_type = document_type.to_string();
        Ok(())
    }
}

/// A destination-specific customization.
#[async_trait]
pub trait ContentScript: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the script applies to a job starting at `url`.
    async fn load(&self, _url: &Url) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn set_config(&self, _url: &Url, _config: &mut SiteConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process_meta(&self, _update: &mut MetaUpdate) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The content scripts active for one job.
#[derive(Clone)]
pub struct ScriptRuntime {
    scripts: Vec<Arc<dyn ContentScript>>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("scripts", &self.names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ScriptRuntime {
    /// Run every script's `load` hook and keep the ones that accept `url`.
    /// Scripts whose hook fails are left out and their errors returned.
    pub async fn start(
        scripts: &[Arc<dyn ContentScript>],
        url: &Url,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> (Self, Vec<ExtractError>) {
        let mut runtime = Self {
            scripts: Vec::new(),
            timeout,
            cancel,
        };
        let mut errors = Vec::new();

        for script in scripts {
            let res = runtime.call(script.name(), "load", url, script.load(url)).await;
            match res {
                Ok(true) => runtime.scripts.push(Arc::clone(script)),
                Ok(false) => {}
                Err(err) => errors.push(err),
            }
        }
        (runtime, errors)
    }

    pub fn names(&self) -> Vec<&str> {
        self.scripts.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Let every script adjust `config`.
    pub async fn set_config(&self, url: &Url, config: &mut SiteConfig) -> Vec<ExtractError> {
        let mut errors = Vec::new();
        for script in &self.scripts {
            let mut draft = config.clone();
            let res = self
                .call(script.name(), "set_config", url, script.set_config(url, &mut draft))
                .await;
            match res {
                Ok(()) => *config = draft,
                Err(err) => errors.push(err),
            }
        }
        errors
    }

    /// Let every script adjust `update`.
    pub async fn process_meta(&self, update: &mut MetaUpdate) -> Vec<ExtractError> {
        let mut errors = Vec::new();
        let url = update.url.clone();
        for script in &self.scripts {
            let mut draft = update.clone();
            let res = self
                .call(script.name(), "process_meta", &url, script.process_meta(&mut draft))
                .await;
            match res {
                Ok(()) => *update = draft,
                Err(err) => errors.push(err),
            }
        }
        errors
    }

    async fn call<T>(
        &self,
        script: &str,
        hook: &str,
        url: &Url,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, ExtractError> {
        let op = format!("{}.{}", script, hook);
        if self.cancel.is_cancelled() {
            return Err(ExtractError::cancelled(url.as_str(), op, None));
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExtractError::cancelled(url.as_str(), op, None)),
            res = tokio::time::timeout(self.timeout, fut) => match res {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(ExtractError::hook(url.as_str(), op, Some(e))),
                Err(_) => Err(ExtractError::hook(
                    url.as_str(),
                    op,
                    Some(anyhow::anyhow!("timed out after {:?}", self.timeout)),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Only(&'static str);

    #[async_trait]
    impl ContentScript for Only {
        fn name(&self) -> &str {
            "only"
        }

        async fn load(&self, url: &Url) -> anyhow::Result<bool> {
            Ok(url.host_str() == Some(self.0))
        }

        async fn set_config(&self, _url: &Url, config: &mut SiteConfig) -> anyhow::Result<()> {
            config.body_selectors.push("#story".into());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl ContentScript for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn set_config(&self, _url: &Url, config: &mut SiteConfig) -> anyhow::Result<()> {
            config.strip_selectors.push(".half-done".into());
            anyhow::bail!("boom")
        }

        async fn process_meta(&self, update: &mut MetaUpdate) -> anyhow::Result<()> {
            update.title = "partial".into();
            Err(anyhow::anyhow!("nope"))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl ContentScript for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn process_meta(&self, update: &mut MetaUpdate) -> anyhow::Result<()> {
            update.title = "too late".into();
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    fn update(url: &Url) -> MetaUpdate {
        MetaUpdate {
            url: url.clone(),
            domain: "example.com".into(),
            title: "Title".into(),
            description: String::new(),
            site_name: String::new(),
            authors: Vec::new(),
            document_type: "article".into(),
            meta: DropMeta::new(),
            properties: DropProperties::new(),
            readability: true,
            html: None,
        }
    }

    #[tokio::test]
    async fn load_filters_scripts() {
        let scripts: Vec<Arc<dyn ContentScript>> =
            vec![Arc::new(Only("example.com")), Arc::new(Only("other.org"))];
        let url = Url::parse("https://example.com/a").unwrap();
        let (rt, errors) =
            ScriptRuntime::start(&scripts, &url, Duration::from_secs(1), CancellationToken::new()).await;
        assert!(errors.is_empty());
        assert_eq!(rt.len(), 1);

        let mut cfg = SiteConfig::default();
        assert!(rt.set_config(&url, &mut cfg).await.is_empty());
        assert_eq!(cfg.body_selectors, vec!["#story"]);
    }

    #[tokio::test]
    async fn failing_hooks_are_skipped() {
        let scripts: Vec<Arc<dyn ContentScript>> =
            vec![Arc::new(Broken), Arc::new(Only("example.com"))];
        let url = Url::parse("https://example.com/a").unwrap();
        let (rt, _) =
            ScriptRuntime::start(&scripts, &url, Duration::from_secs(1), CancellationToken::new()).await;
        assert_eq!(rt.names(), vec!["broken", "only"]);

        let mut cfg = SiteConfig::default();
        let errors = rt.set_config(&url, &mut cfg).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, crate::error::ErrorCode::Hook);
        assert!(cfg.strip_selectors.is_empty());
        assert_eq!(cfg.body_selectors, vec!["#story"]);

        let mut up = update(&url);
        let errors = rt.process_meta(&mut up).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(up.title, "Title");
    }

    #[tokio::test]
    async fn hooks_time_out() {
        let scripts: Vec<Arc<dyn ContentScript>> = vec![Arc::new(Sleepy)];
        let url = Url::parse("https://example.com/a").unwrap();
        let (rt, _) = ScriptRuntime::start(
            &scripts,
            &url,
            Duration::from_millis(50),
            CancellationToken::new(),
        )
        .await;

        let started = std::time::Instant::now();
        let mut up = update(&url);
        let errors = rt.process_meta(&mut up).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("timed out"));
        assert_eq!(up.title, "Title");
    }

    #[tokio::test]
    async fn cancellation_interrupts_hooks() {
        let scripts: Vec<Arc<dyn ContentScript>> = vec![Arc::new(Sleepy)];
        let url = Url::parse("https://example.com/a").unwrap();
        let cancel = CancellationToken::new();
        let (rt, _) =
            ScriptRuntime::start(&scripts, &url, Duration::from_secs(60), cancel.clone()).await;

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let mut up = update(&url);
        let errors = rt.process_meta(&mut up).await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_cancelled());
    }

    #[test]
    fn set_type_is_validated() {
        let url = Url::parse("https://example.com/a").unwrap();
        let mut up = update(&url);
        assert!(up.set_type("video").is_ok());
        assert!(up.set_type("podcast").is_err());
        assert_eq!(up.document_type, "video");
    }
}
