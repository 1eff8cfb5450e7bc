// ABOUTME: Readability-style main content isolation: paragraph scoring, top candidate, sibling merge.
// ABOUTME: Post-processes the article: embeds removed, best srcset candidate as src, content enclosed in <section>.

use async_trait::async_trait;
use dom_query::{Document, NodeRef, Selection};
use once_cell::sync::Lazy;
use regex::Regex;

use super::readability_enabled;
use super::srcset;
use crate::process::{Next, ProcessMessage, Processor, Stage};

/// Widest srcset candidate kept as `src`.
pub const MAX_IMAGE_WIDTH: u32 = 3072;

static UNLIKELY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ad-break|ad-banner|adbox|advert|agegate|banner|combx|comment|community|cookie|disqus|extra|foot|header|legends|menu|modal|nav|outbrain|pager|pagination|popup|promo|related|remark|replies|rss|share|shoutbox|sidebar|skyscraper|social|sponsor|subscribe|taboola|tools|widget").unwrap()
});
static MAYBE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)and|article|body|column|content|main|shadow|story|post|entry").unwrap());
static POSITIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)article|body|content|entry|hentry|h-entry|main|page|pagination|post|story|text|blog").unwrap()
});
static NEGATIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)-ad-|hidden|^hid$|banner|combx|comment|com-|contact|foot|footer|footnote|masthead|media|meta|outbrain|promo|related|scroll|share|shoutbox|sidebar|skyscraper|sponsor|shopping|tags|tool|widget").unwrap()
});

/// Elements that never hold article content.
const NOISE: &str = "script, style, template, nav, aside, footer, form, button, iframe[src*='ads']";
const EMBEDS: &str = "object, embed, iframe, video, audio";

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tag(node: &NodeRef) -> String {
    node.node_name().map(|n| n.to_lowercase()).unwrap_or_default()
}

/// Class and id weight: positive hints add, negative hints subtract.
fn class_weight(sel: &Selection) -> i32 {
    let mut weight = 0;
    for attr in ["class", "id"] {
        let Some(value) = sel.attr(attr) else {
            continue;
        };
        if NEGATIVE_RE.is_match(&value) {
            weight -= 25;
        }
        if POSITIVE_RE.is_match(&value) {
            weight += 25;
        }
    }
    weight
}

/// Ratio of link text to all text.
pub fn link_density(sel: &Selection) -> f64 {
    let total = collapse(&sel.text()).len();
    if total == 0 {
        return 0.0;
    }
    let links: usize = sel
        .select("a")
        .nodes()
        .iter()
        .map(|a| collapse(&Selection::from(*a).text()).len())
        .sum();
    links as f64 / total as f64
}

/// Base score of a candidate container by tag.
fn tag_score(tag: &str) -> f64 {
    match tag {
        "article" => 10.0,
        "div" | "section" | "main" => 5.0,
        "pre" | "td" | "blockquote" => 3.0,
        "address" | "ol" | "ul" | "dl" | "dd" | "dt" | "li" | "form" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    }
}

/// Paragraph score: commas, length in 100 char chunks (max 3), plus one.
fn paragraph_score(text: &str) -> f64 {
    1.0 + text.matches(',').count() as f64 + (text.len() / 100).min(3) as f64
}

fn has_sentence_end(text: &str) -> bool {
    text.trim_end().ends_with(['.', '!', '?', ':', ';'])
}

/// Remove noise and unlikely candidates before scoring.
fn strip_unlikely(doc: &Document) {
    doc.select(NOISE).remove();
    for node in doc.select("[class], [id]").nodes() {
        let sel = Selection::from(*node);
        if matches!(tag(node).as_str(), "html" | "body" | "article" | "main" | "a") {
            continue;
        }
        let hints = format!(
            "{} {}",
            sel.attr("class").map(|c| c.to_string()).unwrap_or_default(),
            sel.attr("id").map(|c| c.to_string()).unwrap_or_default()
        );
        if UNLIKELY_RE.is_match(&hints) && !MAYBE_RE.is_match(&hints) {
            sel.remove();
        }
    }
}

/// Find the main content of `doc` and return its HTML. The document is
/// modified in the process. Returns None when no paragraph scored.
pub fn find_content(doc: &Document) -> Option<String> {
    strip_unlikely(doc);

    let mut scores: Vec<(NodeRef, f64)> = Vec::new();
    fn add<'a>(scores: &mut Vec<(NodeRef<'a>, f64)>, node: NodeRef<'a>, amount: f64) {
        if let Some(entry) = scores.iter_mut().find(|(n, _)| n.id == node.id) {
            entry.1 += amount;
            return;
        }
        let base = tag_score(&tag(&node)) + class_weight(&Selection::from(node)) as f64;
        scores.push((node, base + amount));
    }

    for node in doc.select("p, pre, td").nodes() {
        let text = collapse(&Selection::from(*node).text());
        if text.len() < 25 {
            continue;
        }
        let score = paragraph_score(&text);
        let Some(parent) = node.parent().filter(|p| p.is_element()) else {
            continue;
        };
        add(&mut scores, parent, score);
        if let Some(grand) = parent.parent().filter(|p| p.is_element()) {
            add(&mut scores, grand, score / 2.0);
        }
    }

    let mut best: Option<(NodeRef, f64)> = None;
    for (node, score) in &scores {
        if matches!(tag(node).as_str(), "html" | "body") && scores.len() > 1 {
            continue;
        }
        let adjusted = score * (1.0 - link_density(&Selection::from(*node)));
        if best.as_ref().map_or(true, |(_, s)| adjusted > *s) {
            best = Some((*node, adjusted));
        }
    }
    let (top, top_score) = best?;

    // Siblings that look like more of the same article.
    let Some(parent) = top.parent() else {
        return Some(Selection::from(top).html().to_string());
    };
    let threshold = (top_score * 0.2).max(10.0);
    let top_class = Selection::from(top).attr("class").map(|c| c.to_string());
    let mut parts = Vec::new();

    for sibling in parent.children() {
        if !sibling.is_element() {
            continue;
        }
        let sel = Selection::from(sibling);
        let include = if sibling.id == top.id {
            true
        } else {
            let mut score = scores
                .iter()
                .find(|(n, _)| n.id == sibling.id)
                .map(|(_, s)| *s)
                .unwrap_or(0.0);
            if top_class.is_some() && sel.attr("class").map(|c| c.to_string()) == top_class {
                score += top_score * 0.2;
            }
            let density = link_density(&sel);
            let text = collapse(&sel.text());
            score >= threshold
                || (tag(&sibling) == "p"
                    && ((text.len() > 80 && density < 0.25)
                        || (text.len() <= 80 && density == 0.0 && has_sentence_end(&text))))
        };
        if include {
            parts.push(sel.html().to_string());
        }
    }

    Some(if parts.len() == 1 {
        parts.remove(0)
    } else {
        format!("<div>{}</div>", parts.join(""))
    })
}

/// Keep the best srcset candidate as `src`. Returns the number of images
/// changed.
pub fn fix_images(doc: &Document) -> usize {
    let mut count = 0;
    for node in doc.select("[srcset]").nodes() {
        let sel = Selection::from(*node);
        let Some(set) = sel.attr("srcset") else {
            continue;
        };
        let candidates = srcset::parse(&set);
        let Some(best) = srcset::best(&candidates, MAX_IMAGE_WIDTH) else {
            continue;
        };
        sel.set_attr("src", &best.url);
        sel.remove_attr("srcset");
        sel.remove_attr("width");
        sel.remove_attr("height");
        count += 1;
    }
    count
}

/// First node holding more than one piece of content, walking down
/// single-child wrappers.
fn first_content_node<'a>(node: NodeRef<'a>) -> NodeRef<'a> {
    let mut count = 0;
    let mut only = None;
    for child in node.children() {
        if child.is_element() {
            count += 1;
            only = Some(child);
        } else if child.is_text() && !child.text().trim().is_empty() {
            count += 1;
        }
    }
    match only {
        Some(child) if count == 1 => first_content_node(child),
        _ => node,
    }
}

/// Body HTML of `doc` with the content enclosed in a single `<section>`.
pub fn enclose_article(doc: &Document) -> String {
    let body = doc.select("body");
    let Some(body_node) = body.nodes().first().copied() else {
        return String::new();
    };
    let node = first_content_node(body_node);
    let sel = Selection::from(node);

    if node.id == body_node.id {
        return format!("<section>{}</section>", sel.inner_html());
    }
    match tag(&node).as_str() {
        "section" => sel.html().to_string(),
        "div" | "article" | "main" => {
            let mut attrs = String::new();
            for attr in ["id", "class"] {
                if let Some(v) = sel.attr(attr) {
                    attrs.push_str(&format!(" {}=\"{}\"", attr, v.replace('"', "&quot;")));
                }
            }
            format!("<section{}>{}</section>", attrs, sel.inner_html())
        }
        _ => format!("<section>{}</section>", sel.html()),
    }
}

/// Isolates the main content of the Drop. Media Drops lose their content
/// unless readability was set explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readability;

#[async_trait(?Send)]
impl Processor for Readability {
    fn name(&self) -> &str {
        "readability"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom || m.dom.is_none() {
            return next;
        }
        let (enabled, forced) = readability_enabled(m.values());
        if m.drop().is_media() && !forced {
            m.log().debug("media drop, content reset", &[]);
            m.dom = None;
            return next;
        }

        let Some(doc) = m.dom.take() else {
            return next;
        };
        let head = doc.select("head").inner_html().to_string();
        let content = if enabled {
            find_content(&doc)
        } else {
            Some(doc.select("body").inner_html().to_string())
        };
        let Some(content) = content else {
            m.log().error("could not extract content", &[]);
            return next;
        };
        if enabled {
            m.log().debug("readability on contents", &[]);
        } else {
            m.log().info("readability is disabled by flag", &[]);
        }

        let article = Document::from(format!("<html><body>{}</body></html>", content).as_str());
        article.select(EMBEDS).remove();
        let images = fix_images(&article);
        if images > 0 {
            m.log().debug("images fixed", &[("count", &images)]);
        }
        let body = enclose_article(&article);

        m.dom = Some(Document::from(
            format!("<html><head>{}</head><body>{}</body></html>", head, body).as_str(),
        ));
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contents::set_readability;
    use crate::extractor::Extractor;
    use crate::process::ProcessMessage;
    use pretty_assertions::assert_eq;

    fn para(words: &str) -> String {
        format!("<p>{}, and then some more words to make it long enough to count as a real paragraph.</p>", words)
    }

    fn article_page() -> String {
        format!(
            r#"<html><head><title>T</title></head><body>
            <div class="menu"><a href="/a">Home</a> <a href="/b">About</a></div>
            <nav><a href="/x">x</a></nav>
            <div id="main-content">
              <h1>The title</h1>
              {}{}{}
              <figure><img srcset="/s.jpg 320w, /m.jpg 1024w, /xl.jpg 4000w" width="10" height="10"></figure>
              <iframe src="https://video.example/embed"></iframe>
            </div>
            <div class="sidebar-links"><a href="/c">one</a><a href="/d">two</a></div>
            <footer>copyright</footer>
            </body></html>"#,
            para("First"),
            para("Second"),
            para("Third")
        )
    }

    #[test]
    fn finds_main_content() {
        let doc = Document::from(article_page().as_str());
        let html = find_content(&doc).unwrap();
        assert!(html.contains("First"));
        assert!(html.contains("Third"));
        assert!(!html.contains("About"));
        assert!(!html.contains("copyright"));
        assert!(!html.contains("sidebar"));
    }

    #[test]
    fn no_paragraphs_no_content() {
        let doc = Document::from("<html><body><div>tiny</div></body></html>");
        assert!(find_content(&doc).is_none());
    }

    #[test]
    fn best_srcset_candidate_becomes_src() {
        let doc = Document::from(r#"<body><img srcset="/s.jpg 320w, /m.jpg 1024w, /xl.jpg 4000w" width="1"></body>"#);
        assert_eq!(fix_images(&doc), 1);
        let img = doc.select("img");
        assert_eq!(img.attr("src").unwrap().to_string(), "/m.jpg");
        assert!(img.attr("srcset").is_none());
        assert!(img.attr("width").is_none());
    }

    #[test]
    fn single_wrappers_become_a_section() {
        let doc = Document::from(r#"<body><div><div id="x" class="c"><p>a</p><p>b</p></div></div></body>"#);
        assert_eq!(enclose_article(&doc), r#"<section id="x" class="c"><p>a</p><p>b</p></section>"#);

        let doc = Document::from("<body><p>a</p><p>b</p></body>");
        assert_eq!(enclose_article(&doc), "<section><p>a</p><p>b</p></section>");
    }

    #[tokio::test]
    async fn processor_isolates_the_article() {
        let mut ex = Extractor::builder("http://example.net/post")
            .body(article_page())
            .processor(Readability)
            .build()
            .unwrap();
        ex.run().await.unwrap();

        let html = &ex.drops()[0].html;
        assert!(html.starts_with("<section"));
        assert!(html.contains("Second"));
        assert!(html.contains(r#"src="/m.jpg""#));
        assert!(!html.contains("<iframe"));
        assert!(!html.contains("Home"));
    }

    struct KeepFlag(bool);

    #[async_trait(?Send)]
    impl Processor for KeepFlag {
        fn name(&self) -> &str {
            "flag"
        }

        async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
            if m.stage() == Stage::Dom {
                set_readability(m.values_mut(), self.0);
            }
            next
        }
    }

    #[tokio::test]
    async fn disabled_keeps_the_whole_body() {
        let mut ex = Extractor::builder("http://example.net/post")
            .body(article_page())
            .processor(KeepFlag(false))
            .processor(Readability)
            .build()
            .unwrap();
        ex.run().await.unwrap();

        let html = &ex.drops()[0].html;
        assert!(html.contains("Home"));
        assert!(html.contains("copyright"));
        assert!(!html.contains("<iframe"));
    }
}
