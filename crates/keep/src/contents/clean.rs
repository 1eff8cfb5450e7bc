// ABOUTME: Sanitizes the Drop's DOM with an ammonia policy suited to archived articles.
// ABOUTME: Scripts, event handlers and unknown tags go; article structure and image sets stay.

use async_trait::async_trait;
use dom_query::Document;

use crate::process::{Next, ProcessMessage, Processor, Stage};

/// Sanitize an article body fragment.
///
/// Starts from ammonia's default policy and adds:
/// - `section` elements with their `class`
/// - `id` and `dir` on every element
/// - `srcset` and `sizes` on images
pub fn sanitize_article(html: &str) -> String {
    let mut builder = ammonia::Builder::default();
    builder.add_tags(["section", "main", "picture", "source"]);
    builder.add_generic_attributes(["id", "dir"]);
    builder.add_tag_attributes("section", ["class"]);
    builder.add_tag_attributes("img", ["srcset", "sizes"]);
    builder.add_tag_attributes("source", ["srcset", "sizes", "type", "media"]);
    builder.clean(html).to_string()
}

/// Runs [`sanitize_article`] over the body of the DOM.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanDom;

#[async_trait(?Send)]
impl Processor for CleanDom {
    fn name(&self) -> &str {
        "clean-dom"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom {
            return next;
        }
        let Some((head, body)) = m.with_dom(|doc| {
            (
                doc.select("head").inner_html().to_string(),
                doc.select("body").inner_html().to_string(),
            )
        }) else {
            return next;
        };

        let clean = sanitize_article(&body);
        m.dom = Some(Document::from(
            format!("<html><head>{}</head><body>{}</body></html>", head, clean).as_str(),
        ));
        m.log().debug("DOM cleaned", &[]);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::Extractor;
    use pretty_assertions::assert_eq;

    #[test]
    fn keeps_article_structure() {
        let html = r#"<section class="article" id="article"><p dir="rtl" onclick="x()">Hi</p><img src="/a.png" srcset="/a.png 1x" onerror="y()"></section>"#;
        let out = sanitize_article(html);
        assert!(out.contains(r#"<section class="article" id="article">"#));
        assert!(out.contains(r#"<p dir="rtl">Hi</p>"#));
        assert!(out.contains(r#"srcset="/a.png 1x""#));
        assert!(!out.contains("onclick"));
        assert!(!out.contains("onerror"));
    }

    #[test]
    fn drops_scripts_and_their_content() {
        assert_eq!(sanitize_article("<p>a</p><script>alert(1)</script>"), "<p>a</p>");
    }

    #[tokio::test]
    async fn processor_cleans_the_body() {
        let page = r#"<html><head><title>T</title></head><body>
            <section><p style="color:red">text</p><form><input name="q"></form></section>
            </body></html>"#;
        let mut ex = Extractor::builder("http://example.net/")
            .body(page)
            .processor(CleanDom)
            .build()
            .unwrap();
        ex.run().await.unwrap();

        let html = &ex.drops()[0].html;
        assert!(html.contains("<section><p>text</p>"));
        assert!(!html.contains("<form"));
        assert!(!html.contains("<input"));
        assert!(!html.contains("style="));
    }
}
