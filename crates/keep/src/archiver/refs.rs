// ABOUTME: Collects resource references from HTML and CSS and rewrites them once resolved.
// ABOUTME: Both passes are synchronous so no DOM is held across an await point.

use dom_query::{Document, Selection};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use url::Url;

use super::ArchiveFlags;
use crate::contents::srcset;

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)\s"']*))\s*\)"#).unwrap()
});

static CSS_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)@import\s+(?:"([^"]*)"|'([^']*)')"#).unwrap());

/// How a referenced resource is used, which decides its validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefKind {
    /// Any resource read through by content type.
    Resource,
    /// A frame or object that is archived recursively when it is HTML.
    Embed,
    /// Referenced by an `<img>`: the bytes must sniff as an image.
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub raw: String,
    pub kind: RefKind,
}

/// Attribute holding one URL, per selector.
const IMAGE_ATTRS: &[(&str, &str, RefKind)] = &[
    ("img[src]", "src", RefKind::Image),
    ("source[src]", "src", RefKind::Resource),
    ("video[poster]", "poster", RefKind::Resource),
    ("input[type=image][src]", "src", RefKind::Resource),
    ("link[rel~=icon][href]", "href", RefKind::Resource),
];

const SRCSET_ATTRS: &[(&str, RefKind)] = &[
    ("img[srcset]", RefKind::Image),
    ("source[srcset]", RefKind::Resource),
];

const STYLESHEET_ATTRS: &[(&str, &str, RefKind)] =
    &[("link[rel~=stylesheet][href]", "href", RefKind::Resource)];

const EMBED_ATTRS: &[(&str, &str, RefKind)] = &[
    ("iframe[src]", "src", RefKind::Embed),
    ("frame[src]", "src", RefKind::Embed),
    ("object[data]", "data", RefKind::Embed),
    ("embed[src]", "src", RefKind::Embed),
];

/// Returns the document base: `<base href>` resolved against `base`, or `base`.
pub fn document_base(doc: &Document, base: &Url) -> Url {
    doc.select("base[href]")
        .attr("href")
        .and_then(|href| base.join(href.trim()).ok())
        .unwrap_or_else(|| base.clone())
}

fn single_attrs(flags: ArchiveFlags) -> Vec<(&'static str, &'static str, RefKind)> {
    let mut out = Vec::new();
    if flags.images {
        out.extend_from_slice(IMAGE_ATTRS);
    }
    if flags.stylesheets {
        out.extend_from_slice(STYLESHEET_ATTRS);
    }
    if flags.embeds {
        out.extend_from_slice(EMBED_ATTRS);
    }
    out
}

/// Every resource reference of an HTML document, in document order.
pub fn collect_html(doc: &Document, flags: ArchiveFlags) -> Vec<Reference> {
    let mut refs = Vec::new();

    for (selector, attr, kind) in single_attrs(flags) {
        for sel in doc.select(selector).iter() {
            if let Some(value) = sel.attr(attr) {
                refs.push(Reference {
                    raw: value.trim().to_string(),
                    kind,
                });
            }
        }
    }

    if flags.images {
        for (selector, kind) in SRCSET_ATTRS {
            for sel in doc.select(selector).iter() {
                let value = sel.attr("srcset").unwrap_or_default();
                for candidate in srcset::parse(&value) {
                    refs.push(Reference {
                        raw: candidate.url,
                        kind: *kind,
                    });
                }
            }
        }
    }

    if flags.stylesheets {
        for sel in doc.select("style").iter() {
            refs.extend(collect_css(&sel.text()));
        }
        for sel in doc.select("[style]").iter() {
            refs.extend(collect_css(&sel.attr("style").unwrap_or_default()));
        }
    }

    refs
}

/// `url(...)` and `@import` references of a stylesheet.
pub fn collect_css(css: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    for re in [&*CSS_URL, &*CSS_IMPORT] {
        for caps in re.captures_iter(css) {
            if let Some(raw) = first_group(&caps) {
                refs.push(Reference {
                    raw: raw.trim().to_string(),
                    kind: RefKind::Resource,
                });
            }
        }
    }
    refs
}

fn first_group<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    (1..caps.len()).find_map(|i| caps.get(i)).map(|m| m.as_str())
}

/// Rewrite every collected reference of `doc` with `lookup`. References
/// `lookup` returns `None` for are left as they are.
pub fn rewrite_html(doc: &Document, flags: ArchiveFlags, lookup: &dyn Fn(&str) -> Option<String>) {
    for (selector, attr, _) in single_attrs(flags) {
        for sel in doc.select(selector).iter() {
            let Some(value) = sel.attr(attr) else { continue };
            if let Some(new) = lookup(value.trim()) {
                sel.set_attr(attr, &new);
            }
        }
    }

    if flags.images {
        for (selector, _) in SRCSET_ATTRS {
            for sel in doc.select(selector).iter() {
                let value = sel.attr("srcset").unwrap_or_default();
                let mut candidates = srcset::parse(&value);
                for c in candidates.iter_mut() {
                    if let Some(new) = lookup(&c.url) {
                        c.url = new;
                    }
                }
                sel.set_attr("srcset", &srcset::render(&candidates));
            }
        }
    }

    if flags.stylesheets {
        for sel in doc.select("style").iter() {
            rewrite_style_element(&sel, lookup);
        }
        for sel in doc.select("[style]").iter() {
            let value = sel.attr("style").unwrap_or_default();
            let new = rewrite_css(&value, lookup);
            if new != &*value {
                sel.set_attr("style", &new);
            }
        }
    }
}

fn rewrite_style_element(sel: &Selection, lookup: &dyn Fn(&str) -> Option<String>) {
    let css = sel.text();
    let new = rewrite_css(&css, lookup);
    if new == &*css {
        return;
    }
    let media = sel
        .attr("media")
        .map(|m| format!(" media=\"{}\"", m.replace('"', "&quot;")))
        .unwrap_or_default();
    sel.replace_with_html(format!("<style{}>{}</style>", media, new));
}

/// Rewrite `url(...)` and `@import` references of a stylesheet.
pub fn rewrite_css(css: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let out = CSS_URL.replace_all(css, |caps: &Captures| match first_group(caps) {
        Some(raw) => match lookup(raw.trim()) {
            Some(new) => format!("url(\"{}\")", new),
            None => caps[0].to_string(),
        },
        None => caps[0].to_string(),
    });
    CSS_IMPORT
        .replace_all(&out, |caps: &Captures| match first_group(caps) {
            Some(raw) => match lookup(raw.trim()) {
                Some(new) => format!("@import \"{}\"", new),
                None => caps[0].to_string(),
            },
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raws(refs: &[Reference]) -> Vec<&str> {
        refs.iter().map(|r| r.raw.as_str()).collect()
    }

    #[test]
    fn collects_by_flags() {
        let doc = Document::from(
            r#"<html><head><link rel="stylesheet" href="/s.css"><link rel="shortcut icon" href="/f.ico">
            <style>body { background: url('/bg.png') }</style></head>
            <body><img src="a.png" srcset="a1.png 1x, a2.png 2x"><iframe src="/frame.html"></iframe>
            <div style="background-image: url(d.jpg)"></div></body></html>"#,
        );

        let all = collect_html(
            &doc,
            ArchiveFlags {
                images: true,
                stylesheets: true,
                embeds: true,
            },
        );
        let mut found = raws(&all);
        found.sort();
        assert_eq!(
            found,
            vec!["/bg.png", "/f.ico", "/frame.html", "/s.css", "a.png", "a1.png", "a2.png", "d.jpg"]
        );
        assert!(all.iter().any(|r| r.raw == "a.png" && r.kind == RefKind::Image));
        assert!(all.iter().any(|r| r.raw == "/frame.html" && r.kind == RefKind::Embed));

        let images_only = collect_html(
            &doc,
            ArchiveFlags {
                images: true,
                stylesheets: false,
                embeds: false,
            },
        );
        let mut found = raws(&images_only);
        found.sort();
        assert_eq!(found, vec!["/f.ico", "a.png", "a1.png", "a2.png"]);
    }

    #[test]
    fn css_references() {
        let css = r#"@import "base.css"; @import url(print.css); .a { background: url( "x.png" ) } .b { src: url(data:font/woff;base64,AAA) }"#;
        let refs = collect_css(css);
        let mut found = raws(&refs);
        found.sort();
        assert_eq!(found, vec!["base.css", "data:font/woff;base64,AAA", "print.css", "x.png"]);

        let out = rewrite_css(css, &|raw| (raw == "x.png").then(|| "data:image/png;base64,AA".to_string()));
        assert!(out.contains(r#"url("data:image/png;base64,AA")"#));
        assert!(out.contains(r#"@import "base.css""#));
    }

    #[test]
    fn rewrites_attributes_and_srcset() {
        let doc = Document::from(r#"<body><img src="a.png" srcset="a.png 1x, b.png 2x"><img src="keep.png"></body>"#);
        rewrite_html(&doc, ArchiveFlags::default(), &|raw| match raw {
            "a.png" => Some("A".to_string()),
            "b.png" => Some("B".to_string()),
            _ => None,
        });
        let html = doc.select("body").inner_html().to_string();
        assert!(html.contains(r#"src="A""#));
        assert!(html.contains(r#"srcset="A 1x, B 2x""#));
        assert!(html.contains(r#"src="keep.png""#));
    }

    #[test]
    fn honours_base_element() {
        let doc = Document::from(r#"<html><head><base href="/assets/"></head><body></body></html>"#);
        let base = Url::parse("http://x/page/").unwrap();
        assert_eq!(document_base(&doc, &base).as_str(), "http://x/assets/");

        let doc = Document::from("<p>no base</p>");
        assert_eq!(document_base(&doc, &base), base);
    }
}
