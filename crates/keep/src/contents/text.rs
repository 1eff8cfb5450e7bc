// ABOUTME: Plain text rendering of HTML: block elements on their own lines, collapsed whitespace.
// ABOUTME: The Text processor stores it on each HTML Drop during PostProcess.

use async_trait::async_trait;
use dom_query::{Document, NodeRef};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::process::{Next, ProcessMessage, Processor, Stage};

static SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n[\s\n]*").unwrap());

const BLOCKS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "div", "dl", "dt", "figcaption", "figure",
    "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p",
    "pre", "section", "table", "tr", "ul",
];

fn walk(node: &NodeRef, out: &mut String) {
    for child in node.children() {
        if child.is_text() {
            out.push_str(&child.text());
            continue;
        }
        if !child.is_element() {
            continue;
        }
        let name = child.node_name().map(|n| n.to_lowercase()).unwrap_or_default();
        match name.as_str() {
            "script" | "style" | "template" | "noscript" => {}
            "br" => out.push('\n'),
            "td" | "th" => {
                walk(&child, out);
                out.push(' ');
            }
            tag if BLOCKS.contains(&tag) => {
                out.push_str("\n\n");
                walk(&child, out);
                out.push_str("\n\n");
            }
            _ => walk(&child, out),
        }
    }
}

/// Convert HTML to text. Paragraphs are separated by one blank line.
pub fn html_to_text(html: &str) -> String {
    let doc = Document::from(html);
    let body = doc.select("body");
    let mut raw = String::new();
    if let Some(node) = body.nodes().first() {
        walk(node, &mut raw);
    }

    let spaced = SPACES_RE.replace_all(&raw, " ");
    let lines: Vec<&str> = spaced.split('\n').map(str::trim).collect();
    let joined = lines.join("\n");
    BLANK_LINES_RE.replace_all(&joined, "\n\n").trim().to_string()
}

/// Renders each HTML Drop's DOM to text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Text;

#[async_trait(?Send)]
impl Processor for Text {
    fn name(&self) -> &str {
        "text"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::PostProcess || !m.drop().is_html() {
            return next;
        }
        let Some(text) = m.with_dom(|doc| html_to_text(&doc.select("body").html())) else {
            return next;
        };
        m.drop_mut().text = text;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::Extractor;
    use pretty_assertions::assert_eq;

    #[test]
    fn collapses_whitespace() {
        assert_eq!(html_to_text("<p>Hello   world</p>"), "Hello world");
        assert_eq!(html_to_text("   <p>  trimmed  </p>   "), "trimmed");
        assert_eq!(
            html_to_text("<div><span>One</span> <em>Two</em> <strong>Three</strong></div>"),
            "One Two Three"
        );
    }

    #[test]
    fn blocks_are_paragraphs() {
        let html = "<section><h1>Title</h1><div><p>First</p>\n\n\n<p>Second<br>line</p></div></section>";
        assert_eq!(html_to_text(html), "Title\n\nFirst\n\nSecond\nline");
    }

    #[test]
    fn skips_scripts() {
        assert_eq!(html_to_text("<p>a</p><script>var x = 1;</script><style>p{}</style>"), "a");
    }

    #[tokio::test]
    async fn processor_sets_drop_text() {
        let mut ex = Extractor::builder("http://example.net/")
            .body("<html><body><p>one</p><p>two</p></body></html>")
            .processor(Text)
            .build()
            .unwrap();
        ex.run().await.unwrap();

        assert_eq!(ex.drops()[0].text, "one\n\ntwo");
        assert_eq!(ex.text(), "one\n\ntwo");
    }
}
