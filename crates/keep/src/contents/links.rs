// ABOUTME: Collects the distinct http(s) links of the extracted content and optionally resolves them.
// ABOUTME: Resolution loads each link with bounded concurrency to learn its type and page title.

use async_trait::async_trait;
use dom_query::{Document, Selection};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use url::Url;

use crate::drop::Drop;
use crate::meta::parse_meta;
use crate::process::{Next, ProcessMessage, Processor, Stage};
use crate::resource::{strip_fragment, HttpClient};

/// Links loaded at the same time by [`resolve_links`].
pub const LINK_CONCURRENCY: usize = 10;

/// A link found in the content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Link {
    pub url: String,
    pub domain: String,
    pub content_type: String,
    pub is_page: bool,
    pub title: String,
}

/// Job value holding every link found so far, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Links(pub Vec<Link>);

impl Links {
    pub fn contains(&self, url: &str) -> bool {
        self.0.iter().any(|l| l.url == url)
    }
}

fn content_links(doc: &Document, base: &Url) -> Vec<Url> {
    let mut out: Vec<Url> = Vec::new();
    for node in doc.select("body a[href]").nodes() {
        let Some(href) = Selection::from(*node).attr("href") else {
            continue;
        };
        let Ok(url) = base.join(href.trim()) else {
            continue;
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            continue;
        }
        let url = strip_fragment(&url);
        if !out.contains(&url) {
            out.push(url);
        }
    }
    out
}

/// Lists the links of each Drop's content into the [`Links`] job value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractLinks;

#[async_trait(?Send)]
impl Processor for ExtractLinks {
    fn name(&self) -> &str {
        "extract-links"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom {
            return next;
        }
        let base = m.drop().url().clone();
        let Some(found) = m.with_dom(|doc| content_links(doc, &base)) else {
            return next;
        };
        let first = m.extractor().drops().first().map(|d| d.url().clone());

        if !m.values().contains::<Links>() {
            m.values_mut().insert(Links::default());
        }
        let mut added = 0;
        if let Some(links) = m.values_mut().get_mut::<Links>() {
            for url in found {
                if Some(&url) == first.as_ref() || links.contains(url.as_str()) {
                    continue;
                }
                let mut link = Link {
                    url: url.to_string(),
                    ..Link::default()
                };
                link.domain = Drop::new(&url).domain().to_string();
                links.0.push(link);
                added += 1;
            }
        }
        m.log().debug("links extracted", &[("count", &added)]);
        next
    }
}

async fn resolve_one(client: &HttpClient, mut link: Link) -> Link {
    let Ok(url) = Url::parse(&link.url) else {
        return link;
    };
    let mut d = Drop::new(&url);
    if let Err(err) = d.load(client).await {
        tracing::debug!(url = %link.url, err = %err, "cannot resolve link");
        return link;
    }
    link.content_type = d.content_type().to_string();
    link.is_page = d.is_html();
    if link.is_page {
        let meta = parse_meta(&Document::from(d.body_text().as_str()));
        link.title = meta
            .lookup_get(&["graph.title", "twitter.title", "html.title"])
            .trim()
            .to_string();
    }
    link
}

/// Load every link, at most [`LINK_CONCURRENCY`] at a time, and fill its
/// content type, page flag and title. Links that fail to load are returned
/// unchanged. Order is preserved.
pub async fn resolve_links(client: &HttpClient, links: Vec<Link>) -> Vec<Link> {
    stream::iter(links)
        .map(|link| resolve_one(client, link))
        .buffered(LINK_CONCURRENCY)
        .collect()
        .await
}

/// Resolves the [`Links`] job value once extraction is done.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchLinks;

#[async_trait(?Send)]
impl Processor for FetchLinks {
    fn name(&self) -> &str {
        "fetch-links"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Done {
            return next;
        }
        let Some(Links(links)) = m.values_mut().remove::<Links>() else {
            return next;
        };
        let client = m.client().clone();
        let count = links.len();
        let resolved = resolve_links(&client, links).await;
        m.values_mut().insert(Links(resolved));
        m.log().debug("links resolved", &[("count", &count)]);
        next
    }
}
