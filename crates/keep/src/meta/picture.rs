// ABOUTME: Picture processors: the Drop's lead image and its site icon, loaded through the job client.
// ABOUTME: Every picture must sniff as an image; failures are logged and never abort the job.

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::drop::Picture;
use crate::error::ExtractError;
use crate::process::{Next, ProcessMessage, Processor, Stage};
use crate::resource::HttpClient;
use crate::sniff;

/// Metadata keys holding the lead image, in order of preference.
const PICTURE_KEYS: &[&str] = &["x.picture_url", "graph.image", "twitter.image", "schema.image"];

/// Icons tried before giving up.
const MAX_ICON_ATTEMPTS: usize = 3;

/// Fetch `url` and check that it is an image.
pub async fn load_picture(client: &HttpClient, url: &Url) -> Result<Picture, ExtractError> {
    let res = client.get(url).await?;
    if !res.is_success() {
        return Err(ExtractError::fetch(
            url.as_str(),
            "LoadPicture",
            Some(anyhow::anyhow!("invalid status code ({})", res.status)),
        ));
    }
    if !sniff::is_valid_image(&res.body) {
        return Err(ExtractError::parse(
            url.as_str(),
            "LoadPicture",
            Some(anyhow::anyhow!("not an image")),
        ));
    }

    let mime = sniff::detect_mime(&res.body)
        .map(str::to_string)
        .unwrap_or_else(|| res.mime());
    let (width, height) = sniff::image_size(&res.body).unwrap_or((0, 0));
    Ok(Picture {
        href: res.final_url.to_string(),
        mime,
        width,
        height,
        bytes: res.body,
    })
}

/// Loads the first Drop's lead image as the `image` and `thumbnail` pictures.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractPicture;

#[async_trait(?Send)]
impl Processor for ExtractPicture {
    fn name(&self) -> &str {
        "extract-picture"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Finish || m.position() > 0 {
            return next;
        }
        let d = m.drop();
        let href = d.meta.lookup_get(PICTURE_KEYS).to_string();
        if href.is_empty() {
            return next;
        }
        let url = match d.url().join(&href) {
            Ok(url) => url,
            Err(err) => {
                m.log().warn("invalid picture URL", &[("href", &href), ("err", &err)]);
                return next;
            }
        };

        m.log().debug("loading picture", &[("href", &url.as_str())]);
        let client = m.client().clone();
        match load_picture(&client, &url).await {
            Ok(picture) => {
                m.log().debug(
                    "picture loaded",
                    &[("width", &picture.width), ("height", &picture.height)],
                );
                let d = m.drop_mut();
                d.pictures.insert("thumbnail".to_string(), picture.clone());
                d.pictures.insert("image".to_string(), picture);
            }
            Err(err) => {
                m.log().warn("cannot load picture", &[("err", &err), ("url", &url.as_str())]);
            }
        }
        next
    }
}

/// Icon candidates from the Drop's `link` properties, largest first, then
/// `/favicon.ico`.
pub fn icon_candidates(base: &Url, links: Option<&Value>) -> Vec<Url> {
    let mut found: Vec<(u32, Url)> = Vec::new();
    for link in links.and_then(Value::as_array).into_iter().flatten() {
        let attr = |name: &str| link.get(name).and_then(Value::as_str).unwrap_or_default();
        let rel = attr("@rel").to_lowercase();
        if !rel.split_whitespace().any(|r| r == "icon" || r == "apple-touch-icon") {
            continue;
        }
        let Ok(url) = base.join(attr("@href").trim()) else {
            continue;
        };
        if attr("@href").trim().is_empty() || found.iter().any(|(_, u)| *u == url) {
            continue;
        }
        let size = match attr("@sizes").to_lowercase().as_str() {
            "any" => u32::MAX,
            sizes => sizes
                .split_whitespace()
                .filter_map(|s| s.split_once('x').and_then(|(w, _)| w.parse().ok()))
                .max()
                .unwrap_or(if rel.contains("apple-touch-icon") { 180 } else { 16 }),
        };
        found.push((size, url));
    }
    found.sort_by(|a, b| b.0.cmp(&a.0));

    let mut out: Vec<Url> = found.into_iter().map(|(_, u)| u).collect();
    if let Ok(fallback) = base.join("/favicon.ico") {
        if !out.contains(&fallback) {
            out.push(fallback);
        }
    }
    out
}

/// Loads the first Drop's site icon as the `icon` picture.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractFavicon;

#[async_trait(?Send)]
impl Processor for ExtractFavicon {
    fn name(&self) -> &str {
        "extract-favicon"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Finish || m.position() > 0 || m.drop().is_media() {
            return next;
        }
        let candidates = icon_candidates(m.drop().url(), m.drop().properties.get("link"));
        let client = m.client().clone();

        for url in candidates.into_iter().take(MAX_ICON_ATTEMPTS) {
            match load_picture(&client, &url).await {
                Ok(icon) => {
                    m.log().debug("icon loaded", &[("url", &url.as_str())]);
                    m.drop_mut().pictures.insert("icon".to_string(), icon);
                    break;
                }
                Err(err) if err.is_cancelled() => {
                    m.cancel(err);
                    break;
                }
                Err(err) => m.log().debug("cannot load icon", &[("err", &err)]),
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::Extractor;
    use crate::meta::{ExtractMeta, SetDropProperties};
    use crate::sniff::tests::PNG_1X1;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn icons_are_ordered_by_size() {
        let base = Url::parse("http://example.net/a/b").unwrap();
        let links = json!([
            {"@rel": "stylesheet", "@href": "/s.css"},
            {"@rel": "icon", "@href": "/small.png", "@sizes": "16x16"},
            {"@rel": "apple-touch-icon", "@href": "/touch.png"},
            {"@rel": "shortcut icon", "@href": "/big.png", "@sizes": "32x32 64x64"},
        ]);
        let urls: Vec<String> = icon_candidates(&base, Some(&links))
            .into_iter()
            .map(|u| u.path().to_string())
            .collect();
        assert_eq!(urls, vec!["/touch.png", "/big.png", "/small.png", "/favicon.ico"]);

        let only_fallback = icon_candidates(&base, None);
        assert_eq!(only_fallback.len(), 1);
    }

    #[tokio::test]
    async fn loads_image_thumbnail_and_icon() {
        let server = MockServer::start();
        let cover = server.mock(|when, then| {
            when.method(GET).path("/cover.png");
            then.status(200).header("content-type", "image/png").body(PNG_1X1);
        });
        server.mock(|when, then| {
            when.method(GET).path("/icon.png");
            then.status(200).body(PNG_1X1);
        });

        let page = r#"<html><head>
            <meta property="og:image" content="/cover.png">
            <link rel="icon" href="/icon.png">
            </head><body><p>x</p></body></html>"#;
        let mut ex = Extractor::builder(server.url("/post"))
            .body(page)
            .processor(ExtractMeta)
            .processor(SetDropProperties)
            .processor(ExtractPicture)
            .processor(ExtractFavicon)
            .build()
            .unwrap();
        ex.run().await.unwrap();

        cover.assert_hits(1);
        let d = &ex.drops()[0];
        let image = &d.pictures["image"];
        assert_eq!(image.mime, "image/png");
        assert_eq!((image.width, image.height), (1, 1));
        assert_eq!(image.href, server.url("/cover.png"));
        assert_eq!(d.pictures["thumbnail"], *image);
        assert_eq!(d.pictures["icon"].mime, "image/png");
        assert!(ex.errors().is_empty());
    }

    #[tokio::test]
    async fn non_image_picture_is_ignored() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/cover.png");
            then.status(200).header("content-type", "image/png").body("<html>nope</html>");
        });

        let page = r#"<html><head><meta property="og:image" content="/cover.png"></head><body></body></html>"#;
        let mut ex = Extractor::builder(server.url("/post"))
            .body(page)
            .processor(ExtractMeta)
            .processor(ExtractPicture)
            .build()
            .unwrap();
        ex.run().await.unwrap();

        assert!(ex.drops()[0].pictures.is_empty());
        assert!(ex.logs().iter().any(|l| l.contains("cannot load picture")));
    }
}
