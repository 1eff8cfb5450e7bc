// ABOUTME: Processors driven by content scripts and site config rules: loading, hooks, body selection and paging.
// ABOUTME: Structural changes (single-page replacement, next pages) go through the message's Drop requests.

use std::sync::Arc;

use async_trait::async_trait;
use dom_query::{Document, Selection};
use url::Url;

use super::selectors;
use super::{ContentScript, MetaUpdate, ScriptRuntime, SiteConfig, SiteConfigRegistry, SCRIPT_DOCUMENT_TYPES};
use crate::contents::{readability_enabled, set_readability};
use crate::error::ExtractError;
use crate::meta::parse_date;
use crate::process::{Next, ProcessMessage, Processor, Stage};
use crate::resource::strip_fragment;

/// Next page URL found on the current Drop, consumed by [`GoToNextPage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextPage(pub Url);

/// A list from the job's site config, or an empty list without one.
fn config_list(m: &ProcessMessage<'_>, pick: impl Fn(&SiteConfig) -> &Vec<String>) -> Vec<String> {
    m.values()
        .get::<SiteConfig>()
        .map(|cfg| pick(cfg).clone())
        .unwrap_or_default()
}

/// Record hook errors. Returns false when the job was cancelled.
fn report_hook_errors(m: &mut ProcessMessage<'_>, errors: Vec<ExtractError>) -> bool {
    for err in errors {
        if err.is_cancelled() {
            m.cancel(err);
            return false;
        }
        m.add_error(err);
    }
    true
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Link target of the first element matching `css`: its href, or its text.
fn link_target(doc: &Document, css: &str) -> Option<String> {
    let found = selectors::select(doc, css)?;
    let first = Selection::from(*found.nodes().first()?);
    let href = first
        .attr("href")
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| first.text().trim().to_string());
    (!href.is_empty()).then_some(href)
}

/// Trimmed texts of every element matching `css`.
fn texts(doc: &Document, css: &str) -> Vec<String> {
    selectors::select(doc, css)
        .map(|sel| {
            sel.nodes()
                .iter()
                .map(|n| collapse(&Selection::from(*n).text()))
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Starts the content scripts that accept the job's URL.
#[derive(Clone, Default)]
pub struct LoadScripts {
    scripts: Vec<Arc<dyn ContentScript>>,
}

impl LoadScripts {
    pub fn new(scripts: Vec<Arc<dyn ContentScript>>) -> Self {
        Self { scripts }
    }

    pub fn script<S: ContentScript + 'static>(mut self, script: S) -> Self {
        self.scripts.push(Arc::new(script));
        self
    }
}

#[async_trait(?Send)]
impl Processor for LoadScripts {
    fn name(&self) -> &str {
        "load-scripts"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Start || m.position() > 0 {
            return next;
        }
        let url = m.drop().url().clone();
        let timeout = m.extractor().options().hook_timeout;
        let cancel = m.cancellation().clone();

        let (runtime, errors) = ScriptRuntime::start(&self.scripts, &url, timeout, cancel).await;
        if !report_hook_errors(m, errors) {
            return Next::stop();
        }
        m.log().debug("content scripts ready", &[("scripts", &runtime.len())]);
        m.values_mut().insert(runtime);
        next
    }
}

/// Finds the site config of the job's first Drop, lets the scripts adjust
/// it and installs its HTTP headers.
#[derive(Debug, Clone, Default)]
pub struct LoadSiteConfig {
    registry: Arc<SiteConfigRegistry>,
}

impl LoadSiteConfig {
    pub fn new(registry: SiteConfigRegistry) -> Self {
        Self::shared(Arc::new(registry))
    }

    pub fn shared(registry: Arc<SiteConfigRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait(?Send)]
impl Processor for LoadSiteConfig {
    fn name(&self) -> &str {
        "load-site-config"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Start || m.position() > 0 {
            return next;
        }
        let url = m.drop().url().clone();
        let mut cfg = self.registry.config_for(&url);
        if cfg.files().is_empty() {
            m.log().debug("no site configuration found", &[]);
        } else {
            let files = cfg.files().join(", ");
            m.log().debug("site configuration loaded", &[("files", &files)]);
        }

        if let Some(runtime) = m.values().get::<ScriptRuntime>().cloned() {
            let errors = runtime.set_config(&url, &mut cfg).await;
            if !report_hook_errors(m, errors) {
                return Next::stop();
            }
        }

        for (name, value) in &cfg.http_headers {
            m.client().set_header(name, value);
            m.log().debug("site config custom header", &[("name", name), ("value", value)]);
        }
        m.values_mut().insert(cfg);
        next
    }
}

/// Runs the scripts' `process_meta` hooks and commits what they changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMeta;

#[async_trait(?Send)]
impl Processor for ProcessMeta {
    fn name(&self) -> &str {
        "process-meta"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom || m.position() > 0 {
            return next;
        }
        let Some(runtime) = m.values().get::<ScriptRuntime>().cloned() else {
            return next;
        };
        if runtime.is_empty() {
            return next;
        }

        let (readability, _) = readability_enabled(m.values());
        let d = m.drop();
        let before = MetaUpdate {
            url: d.url().clone(),
            domain: d.domain().to_string(),
            title: d.title.clone(),
            description: d.description.clone(),
            site_name: d.site_name.clone(),
            authors: d.authors().to_vec(),
            document_type: d.document_type.clone(),
            meta: d.meta.clone(),
            properties: d.properties.clone(),
            readability,
            html: None,
        };
        let mut update = before.clone();
        let errors = runtime.process_meta(&mut update).await;
        if !report_hook_errors(m, errors) {
            return Next::stop();
        }
        if update == before {
            return next;
        }

        if update.document_type != before.document_type
            && !SCRIPT_DOCUMENT_TYPES.contains(&update.document_type.as_str())
        {
            m.log().warn("ignoring invalid type", &[("type", &update.document_type)]);
            update.document_type = before.document_type.clone();
        }
        if update.readability != before.readability {
            set_readability(m.values_mut(), update.readability);
        }

        let html = update.html.take();
        let d = m.drop_mut();
        d.title = update.title;
        d.description = update.description;
        d.site_name = update.site_name;
        d.set_authors(&update.authors);
        d.document_type = update.document_type;
        d.meta = update.meta;
        d.properties = update.properties;

        if let Some(html) = html {
            let body = ammonia::clean(&html);
            d.set_content_type("text/html");
            m.dom = Some(Document::from(
                format!("<html><head></head><body>{}</body></html>", body).as_str(),
            ));
            m.log().debug("body replaced by content script", &[("bytes", &body.len())]);
        }
        m.log().debug("process_meta applied", &[]);
        next
    }
}

/// Applies the site config's `replace_strings` to the raw body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceStrings;

#[async_trait(?Send)]
impl Processor for ReplaceStrings {
    fn name(&self) -> &str {
        "replace-strings"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Body || !m.drop().is_html() {
            return next;
        }
        let rules = m
            .values()
            .get::<SiteConfig>()
            .map(|cfg| cfg.replace_strings.clone())
            .unwrap_or_default();
        if rules.is_empty() {
            return next;
        }

        let mut body = m.drop().body_text();
        for [from, to] in &rules {
            if from.is_empty() {
                continue;
            }
            body = body.replace(from.as_str(), to);
            m.log().debug("site config replace_string", &[("from", from), ("to", to)]);
        }
        m.drop_mut().set_body(body);
        next
    }
}

/// Follows the site config's single-page link, replacing the Drop.
#[derive(Debug, Clone, Copy, Default)]
pub struct FindContentPage;

#[async_trait(?Send)]
impl Processor for FindContentPage {
    fn name(&self) -> &str {
        "find-content-page"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom || m.drop().is_media() {
            return next;
        }
        let base = m.drop().url().clone();

        for css in config_list(m, |c| &c.single_page_link_selectors) {
            let Some(href) = m.with_dom(|doc| link_target(doc, &css)).flatten() else {
                continue;
            };
            let Ok(url) = base.join(&href) else {
                continue;
            };
            let url = strip_fragment(&url);

            if m.extractor().is_visited(&url) {
                m.log().debug("single page already visited", &[("url", &url.as_str())]);
                continue;
            }
            m.log().info("site config found single page link", &[("url", &url.as_str())]);
            m.replace_drop(&url);
            return Next::stop();
        }
        next
    }
}

/// Remembers the site config's next-page link. The last match wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct FindNextPage;

#[async_trait(?Send)]
impl Processor for FindNextPage {
    fn name(&self) -> &str {
        "find-next-page"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom {
            return next;
        }
        let base = m.drop().url().clone();

        for css in config_list(m, |c| &c.next_page_link_selectors) {
            let Some(href) = m.with_dom(|doc| link_target(doc, &css)).flatten() else {
                continue;
            };
            let Ok(url) = base.join(&href) else {
                continue;
            };
            let url = strip_fragment(&url);
            m.log().debug("site config found next page", &[("url", &url.as_str())]);
            m.values_mut().insert(NextPage(url));
        }
        next
    }
}

/// Appends the remembered next page as a new Drop.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoToNextPage;

#[async_trait(?Send)]
impl Processor for GoToNextPage {
    fn name(&self) -> &str {
        "go-to-next-page"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Finish {
            return next;
        }
        let Some(NextPage(url)) = m.values_mut().remove::<NextPage>() else {
            return next;
        };
        if m.extractor().is_visited(&url) {
            m.log().debug("next page already visited", &[("url", &url.as_str())]);
            return next;
        }
        m.log().info("go to next page", &[("url", &url.as_str())]);
        m.add_drop(&url);
        next
    }
}

/// Sets the title from the site config's title selectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractTitle;

#[async_trait(?Send)]
impl Processor for ExtractTitle {
    fn name(&self) -> &str {
        "extract-title"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom || m.position() > 0 {
            return next;
        }
        for css in config_list(m, |c| &c.title_selectors) {
            let found = m.with_dom(|doc| texts(doc, &css)).unwrap_or_default();
            if let Some(title) = found.into_iter().next() {
                m.log().debug("site config title", &[("title", &title)]);
                m.drop_mut().title = title;
                break;
            }
        }
        next
    }
}

/// Adds authors found with the site config's author selectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractAuthor;

#[async_trait(?Send)]
impl Processor for ExtractAuthor {
    fn name(&self) -> &str {
        "extract-author"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom || m.position() > 0 {
            return next;
        }
        for css in config_list(m, |c| &c.author_selectors) {
            let found = m.with_dom(|doc| texts(doc, &css)).unwrap_or_default();
            for author in &found {
                m.log().debug("site config author", &[("author", author)]);
            }
            m.drop_mut().add_authors(found);
        }
        next
    }
}

/// Sets the publish date from the site config's date selectors, unless a
/// date is already known.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractDate;

#[async_trait(?Send)]
impl Processor for ExtractDate {
    fn name(&self) -> &str {
        "extract-date"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom || m.position() > 0 || m.drop().date.is_some() {
            return next;
        }
        for css in config_list(m, |c| &c.date_selectors) {
            let found = m.with_dom(|doc| texts(doc, &css)).unwrap_or_default();
            if let Some(date) = found.iter().find_map(|t| parse_date(t)) {
                m.log().debug("site config date", &[("date", &date.to_rfc3339())]);
                m.drop_mut().date = Some(date);
                break;
            }
        }
        next
    }
}

/// Replaces the body with the first site config body match, enclosed in
/// `<section class="article" id="article">`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractBody;

fn select_body(doc: &Document, css: &str) -> Option<String> {
    let found = selectors::select(doc, css)?;
    let node = found.nodes().first()?;
    if !node.children().iter().any(|c| c.is_element()) {
        return None;
    }
    let content = Selection::from(*node).html();
    let head = doc.select("head");
    let head = if head.is_empty() {
        "<head></head>".to_string()
    } else {
        head.html().to_string()
    };
    Some(format!(
        "<html>{}<body><section class=\"article\" id=\"article\">{}</section></body></html>",
        head, content
    ))
}

#[async_trait(?Send)]
impl Processor for ExtractBody {
    fn name(&self) -> &str {
        "extract-body"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom {
            return next;
        }
        for css in config_list(m, |c| &c.body_selectors) {
            if let Some(html) = m.with_dom(|doc| select_body(doc, &css)).flatten() {
                m.log().debug("site config body found", &[("selector", &css)]);
                m.dom = Some(Document::from(html.as_str()));
                break;
            }
        }
        next
    }
}

/// Removes elements named by `strip`, `strip_id_or_class` and
/// `strip_image_src` rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct StripTags;

impl StripTags {
    fn rules(cfg: &SiteConfig) -> Vec<String> {
        let quoted = |v: &str| !v.is_empty() && !v.contains(['"', '\\']);
        let mut rules = cfg.strip_selectors.clone();
        rules.extend(
            cfg.strip_id_or_class
                .iter()
                .filter(|v| quoted(v.as_str()))
                .map(|v| format!("[id=\"{0}\"], [class~=\"{0}\"]", v)),
        );
        rules.extend(
            cfg.strip_image_src
                .iter()
                .filter(|v| quoted(v.as_str()))
                .map(|v| format!("img[src*=\"{}\"]", v)),
        );
        rules
    }
}

#[async_trait(?Send)]
impl Processor for StripTags {
    fn name(&self) -> &str {
        "strip-tags"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom {
            return next;
        }
        let rules = m.values().get::<SiteConfig>().map(Self::rules).unwrap_or_default();
        let Some(doc) = m.dom.as_ref() else {
            return next;
        };

        let mut removed = Vec::new();
        for css in rules {
            if let Some(sel) = selectors::select(doc, &css) {
                let count = sel.nodes().len();
                sel.remove();
                removed.push((css, count));
            }
        }
        for (css, count) in removed {
            m.log().debug("site config strip", &[("selector", &css), ("nodes", &count)]);
        }
        next
    }
}
