// ABOUTME: oEmbed processor: follows the page's JSON oEmbed link and stores the response as oembed.* metadata.
// ABOUTME: Video pages without an oEmbed link get an iframe built from their OpenGraph video properties.

use async_trait::async_trait;
use dom_query::Document;
use serde_json::{Map, Value};
use url::Url;

use crate::drop::DropMeta;
use crate::error::ExtractError;
use crate::process::{Next, ProcessMessage, Processor, Stage};
use crate::resource::HttpClient;

/// Response fields kept as `oembed.<field>` metadata.
const FIELDS: &[&str] = &[
    "type",
    "version",
    "title",
    "author_name",
    "author_url",
    "provider_name",
    "provider_url",
    "cache_age",
    "thumbnail_url",
    "thumbnail_width",
    "thumbnail_height",
    "url",
    "width",
    "height",
    "html",
];

/// The document's JSON oEmbed endpoint, resolved against `base`.
pub fn oembed_link(doc: &Document, base: &Url) -> Option<Url> {
    let href = doc
        .select(r#"link[href][type="application/json+oembed"]"#)
        .attr("href")?;
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    base.join(href).ok()
}

/// Fetch an oEmbed response and return its known fields as metadata pairs.
/// Numbers are kept as their JSON text.
pub async fn load_oembed(
    client: &HttpClient,
    url: &Url,
) -> Result<Vec<(String, String)>, ExtractError> {
    let res = client.get(url).await?;
    if !res.is_success() {
        return Err(ExtractError::fetch(
            url.as_str(),
            "Oembed",
            Some(anyhow::anyhow!("invalid status code ({})", res.status)),
        ));
    }
    let doc: Map<String, Value> = serde_json::from_slice(&res.body)
        .map_err(|e| ExtractError::parse(url.as_str(), "Oembed", Some(e.into())))?;

    Ok(FIELDS
        .iter()
        .filter_map(|field| {
            let value = match doc.get(*field)? {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            };
            Some((format!("oembed.{}", field), value))
        })
        .collect())
}

/// An embed player for `graph.type = video*` pages, from `og:video` properties.
pub fn graph_video_embed(meta: &DropMeta) -> Option<String> {
    if !meta.lookup_get(&["graph.type"]).starts_with("video") {
        return None;
    }
    let src = meta.lookup_get(&["graph.video:secure_url", "graph.video:url"]);
    let width = meta.lookup_get(&["graph.video:width"]);
    let height = meta.lookup_get(&["graph.video:height"]);
    if src.is_empty() || width.is_empty() || height.is_empty() {
        return None;
    }
    Some(format!(
        r#"<iframe src="{}" width="{}" height="{}" frameborder="0" allowfullscreen></iframe>"#,
        src.replace('"', "&quot;"),
        width.replace('"', "&quot;"),
        height.replace('"', "&quot;"),
    ))
}

/// Loads the first Drop's oEmbed resource into its metadata. Runs after
/// [`ExtractMeta`](super::ExtractMeta).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOembed;

#[async_trait(?Send)]
impl Processor for ExtractOembed {
    fn name(&self) -> &str {
        "extract-oembed"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom || m.position() > 0 {
            return next;
        }
        let base = m.drop().url().clone();
        let Some(link) = m.with_dom(|doc| oembed_link(doc, &base)) else {
            return next;
        };

        let Some(url) = link else {
            if let Some(html) = graph_video_embed(&m.drop().meta) {
                m.log().debug("oembed from opengraph video", &[]);
                m.drop_mut().meta.add("oembed.html", html);
            }
            return next;
        };

        m.log().debug("loading oembed", &[("url", &url.as_str())]);
        let client = m.client().clone();
        match load_oembed(&client, &url).await {
            Ok(fields) => {
                let d = m.drop_mut();
                for (key, value) in fields {
                    d.meta.add(key, value);
                }
            }
            Err(err) if err.is_cancelled() => m.cancel(err),
            Err(err) => m.log().warn("oembed error", &[("err", &err)]),
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::Extractor;
    use crate::meta::ExtractMeta;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn fills_oembed_meta_from_the_link() {
        let server = MockServer::start();
        let endpoint = server.mock(|when, then| {
            when.method(GET).path("/oembed").query_param("format", "json");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    r#"{"type": "video", "version": "1.0", "title": "Waves",
                        "author_name": "Sea Films", "provider_name": "Tube",
                        "thumbnail_url": "https://img.example.net/w.jpg",
                        "thumbnail_width": 480, "width": 640, "height": null,
                        "html": "<iframe src=\"https://tube.example.net/e/1\"></iframe>"}"#,
                );
        });

        let page = r#"<html><head>
            <link rel="alternate" type="application/json+oembed" href="/oembed?format=json">
            </head><body><p>x</p></body></html>"#;
        let mut ex = Extractor::builder(server.url("/watch"))
            .body(page)
            .processor(ExtractMeta)
            .processor(ExtractOembed)
            .build()
            .unwrap();
        ex.run().await.unwrap();

        endpoint.assert_hits(1);
        let meta = &ex.drops()[0].meta;
        assert_eq!(meta.lookup_get(&["oembed.type"]), "video");
        assert_eq!(meta.lookup_get(&["oembed.title"]), "Waves");
        assert_eq!(meta.lookup_get(&["oembed.author_name"]), "Sea Films");
        assert_eq!(meta.lookup_get(&["oembed.provider_name"]), "Tube");
        assert_eq!(meta.lookup_get(&["oembed.thumbnail_url"]), "https://img.example.net/w.jpg");
        assert_eq!(meta.lookup_get(&["oembed.thumbnail_width"]), "480");
        assert_eq!(meta.lookup_get(&["oembed.width"]), "640");
        assert!(meta.get("oembed.height").is_empty());
        assert!(meta.lookup_get(&["oembed.html"]).starts_with("<iframe"));
    }

    #[tokio::test]
    async fn bad_oembed_response_is_only_logged() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/oembed");
            then.status(200).body("not json");
        });

        let page = r#"<html><head>
            <link type="application/json+oembed" href="/oembed">
            </head><body></body></html>"#;
        let mut ex = Extractor::builder(server.url("/watch"))
            .body(page)
            .processor(ExtractOembed)
            .build()
            .unwrap();
        ex.run().await.unwrap();

        assert!(ex.errors().is_empty());
        assert!(ex.logs().iter().any(|l| l.contains("oembed error")));
        assert!(ex.drops()[0].meta.get("oembed.type").is_empty());
    }

    #[tokio::test]
    async fn video_pages_fall_back_to_opengraph() {
        let page = r#"<html><head>
            <meta property="og:type" content="video.other">
            <meta property="og:video:url" content="http://player.example.net/v/9">
            <meta property="og:video:secure_url" content="https://player.example.net/v/9">
            <meta property="og:video:width" content="1280">
            <meta property="og:video:height" content="720">
            </head><body></body></html>"#;
        let mut ex = Extractor::builder("http://example.net/v/9")
            .body(page)
            .processor(ExtractMeta)
            .processor(ExtractOembed)
            .build()
            .unwrap();
        ex.run().await.unwrap();

        assert_eq!(
            ex.drops()[0].meta.lookup_get(&["oembed.html"]),
            r#"<iframe src="https://player.example.net/v/9" width="1280" height="720" frameborder="0" allowfullscreen></iframe>"#
        );
    }

    #[test]
    fn no_embed_for_articles() {
        let mut meta = DropMeta::new();
        meta.add("graph.type", "article");
        meta.add("graph.video:url", "https://player.example.net/v/9");
        assert_eq!(graph_video_embed(&meta), None);
    }
}
