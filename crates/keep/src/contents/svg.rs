// ABOUTME: Moves inline <svg> elements into the job's resource cache and references them with <img>.
// ABOUTME: The archiver then inlines them like any other image.

use async_trait::async_trait;
use dom_query::{Document, Selection};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use sha2::{Digest, Sha256};
use url::Url;

use crate::process::{Next, ProcessMessage, Processor, Stage};
use crate::resource::{CachedResource, ResourceCache};

const SVG_NS: &str = "http://www.w3.org/2000/svg";

/// Path prefix of the URLs inline SVGs are cached under.
pub const INLINE_SVG_PATH: &str = "/__keep/inline-svg/";

/// Standalone SVG document for an inline `<svg>` node.
fn svg_document(svg: &Selection) -> String {
    if svg.attr("xmlns").is_none() {
        svg.set_attr("xmlns", SVG_NS);
    }
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", svg.html())
}

/// Cache every top-level `<svg>` of `doc` under a URL on `base`'s host and
/// replace it with an `<img>`. The URL is derived from the content, so the
/// same drawing on several pages is stored once. Returns the number of
/// replaced elements.
pub fn extract_inline_svgs(doc: &Document, base: &Url, cache: &ResourceCache) -> usize {
    let svgs = doc.select("svg");
    let mut count = 0;
    for node in svgs.nodes() {
        let in_svg = node
            .ancestors_it(None)
            .any(|a| a.node_name().is_some_and(|n| n.eq_ignore_ascii_case("svg")));
        if in_svg {
            continue;
        }

        let svg = Selection::from(*node);
        let body = svg_document(&svg);
        let hash = hex::encode(Sha256::digest(body.as_bytes()));
        let Ok(src) = base.join(&format!("{}{}.svg", INLINE_SVG_PATH, &hash[..16])) else {
            continue;
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/svg+xml"));
        cache.insert(src.as_str(), CachedResource::new(headers, body));

        svg.replace_with_html(format!(r#"<img src="{}">"#, src));
        count += 1;
    }
    count
}

/// Converts inline SVG images to cached resources during the Dom stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractInlineSvgs;

#[async_trait(?Send)]
impl Processor for ExtractInlineSvgs {
    fn name(&self) -> &str {
        "extract-inline-svgs"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom {
            return next;
        }
        let base = m.drop().url().clone();
        let cache = m.extractor().cache().clone();
        let Some(count) = m.with_dom(|doc| extract_inline_svgs(doc, &base, &cache)) else {
            return next;
        };
        if count > 0 {
            m.log().debug("inline svg extracted", &[("count", &count)]);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sniff;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"<html><body>
        <p>Logo: <svg viewBox="0 0 10 10"><circle cx="5" cy="5" r="4"/><svg><rect width="1" height="1"/></svg></svg></p>
        <p>Again: <svg viewBox="0 0 10 10"><circle cx="5" cy="5" r="4"/><svg><rect width="1" height="1"/></svg></svg></p>
        </body></html>"#;

    #[test]
    fn replaces_svg_with_cached_image() {
        let doc = Document::from(PAGE);
        let cache = ResourceCache::new();
        let base = Url::parse("https://example.net/post/1").unwrap();

        assert_eq!(extract_inline_svgs(&doc, &base, &cache), 2);
        assert!(doc.select("svg").is_empty());

        let srcs: Vec<String> = doc
            .select("img")
            .nodes()
            .iter()
            .filter_map(|n| Selection::from(*n).attr("src").map(|s| s.to_string()))
            .collect();
        assert_eq!(srcs.len(), 2);
        assert_eq!(srcs[0], srcs[1]);
        assert!(srcs[0].starts_with("https://example.net/__keep/inline-svg/"));

        assert_eq!(cache.len(), 1);
        let entry = cache.get(&srcs[0]).unwrap();
        assert_eq!(entry.headers[CONTENT_TYPE], "image/svg+xml");
        let body = String::from_utf8_lossy(&entry.body);
        assert!(body.starts_with("<?xml"));
        assert!(body.contains(r#"xmlns="http://www.w3.org/2000/svg""#));
        assert!(body.contains("viewBox"));
        assert!(body.contains("<rect"));
        assert!(sniff::is_valid_image(&entry.body));
    }
}
