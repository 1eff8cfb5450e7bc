// ABOUTME: Metadata processors: raw <meta>/itemprop collection into DropMeta and the fields derived from it.
// ABOUTME: Also hosts the shared date parser used by every processor that reads publish dates.

//! Page metadata.
//!
//! [`ExtractMeta`] collects raw metadata into [`DropMeta`] under namespaced
//! keys and derives the Drop's title, description, site name, authors,
//! language, direction, date and document type from them:
//!
//! | Source                         | Key              |
//! |--------------------------------|------------------|
//! | `<title>`, `<html lang dir>`   | `html.title`, `html.lang`, `html.dir` |
//! | `<meta name="description">`    | `html.description` |
//! | `<meta property="og:title">`   | `graph.title`    |
//! | `<meta property="article:author">` | `graph.author` |
//! | `<meta name="twitter:image">`  | `twitter.image`  |
//! | `<span itemprop="author">`     | `schema.author`  |

pub mod oembed;
pub mod picture;
pub mod properties;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dom_query::{Document, Selection};

pub use self::oembed::{load_oembed, ExtractOembed};
pub use self::picture::{load_picture, ExtractFavicon, ExtractPicture};
pub use self::properties::{parse_props, SetDropProperties};

use crate::drop::{Drop, DropMeta};
use crate::process::{Next, ProcessMessage, Processor, Stage};

/// Longest text kept for an itemprop value read from element text.
const MAX_SCHEMA_TEXT: usize = 300;

/// Parse a date string, trying RFC 3339 first, then a few loose date-only
/// formats, then `dateparser`. Returns None when nothing matches.
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Date-only formats are read as UTC midnight so the day never shifts.
    const LOOSE_PATTERNS: &[&str] = &[
        "%Y-%m-%d",
        "%b %e, %Y",
        "%e %b %Y",
        "%b %d, %Y",
        "%d %b %Y",
        "%B %e, %Y",
        "%e %B %Y",
        "%B %d, %Y",
        "%d %B %Y",
    ];
    for pat in LOOSE_PATTERNS {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(s, pat) {
            let naive = date.and_hms_opt(0, 0, 0)?;
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }

    dateparser::parse(s).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Primary language subtag: `en-US` and `en_GB` both give `en`.
pub fn normalize_lang(lang: &str) -> String {
    let primary = lang
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if (2..=3).contains(&primary.len()) && primary.chars().all(|c| c.is_ascii_alphabetic()) {
        primary
    } else {
        String::new()
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// DropMeta key for a `<meta>` name or property, if we keep it.
fn meta_key(name: &str) -> Option<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }
    if let Some(rest) = name.strip_prefix("og:") {
        return Some(format!("graph.{}", rest));
    }
    if let Some(rest) = name.strip_prefix("article:") {
        return Some(format!("graph.{}", rest));
    }
    if let Some(rest) = name.strip_prefix("twitter:") {
        return Some(format!("twitter.{}", rest));
    }
    if name.contains(':') {
        return None;
    }
    Some(format!("html.{}", name))
}

/// Collect the raw metadata of a document.
pub fn parse_meta(doc: &Document) -> DropMeta {
    let mut meta = DropMeta::new();

    meta.add("html.title", collapse(&doc.select("head title").text()));

    let root = doc.select("html");
    if let Some(lang) = root.attr("lang") {
        meta.add("html.lang", lang.to_string());
    }
    if let Some(dir) = root.attr("dir") {
        meta.add("html.dir", dir.to_lowercase());
    }

    for node in doc.select("meta[content]").nodes() {
        let sel = Selection::from(*node);
        let Some(name) = sel.attr("property").or_else(|| sel.attr("name")) else {
            continue;
        };
        if let Some(key) = meta_key(&name) {
            let content = sel.attr("content").map(|c| c.to_string()).unwrap_or_default();
            meta.add(key, content);
        }
    }

    for node in doc.select("[itemprop]").nodes() {
        let sel = Selection::from(*node);
        if sel.attr("itemscope").is_some() {
            continue;
        }
        let Some(prop) = sel.attr("itemprop") else {
            continue;
        };
        let value = sel
            .attr("content")
            .or_else(|| sel.attr("datetime"))
            .map(|v| v.to_string())
            .unwrap_or_else(|| collapse(&sel.text()));
        if value.chars().count() > MAX_SCHEMA_TEXT {
            continue;
        }
        for prop in prop.split_whitespace() {
            meta.add(format!("schema.{}", prop), value.clone());
        }
    }

    meta
}

/// Fill the Drop's descriptive fields from its metadata. Fields already set
/// (by the loader or an earlier pass) are kept.
pub fn apply_meta(d: &mut Drop) {
    if d.title.is_empty() {
        d.title = d
            .meta
            .lookup_get(&["graph.title", "twitter.title", "schema.headline", "html.title"])
            .to_string();
    }
    if d.description.is_empty() {
        d.description = d
            .meta
            .lookup_get(&["graph.description", "twitter.description", "html.description"])
            .to_string();
    }
    if d.site_name.is_empty() {
        d.site_name = d
            .meta
            .lookup_get(&["graph.site_name", "html.application-name"])
            .to_string();
        if d.site_name.is_empty() {
            d.site_name = d.domain().to_string();
        }
    }

    let authors: Vec<String> = d
        .meta
        .lookup(&["schema.author", "html.author", "graph.author"])
        .iter()
        .filter(|a| !a.starts_with("http://") && !a.starts_with("https://"))
        .cloned()
        .collect();
    d.add_authors(authors);

    if d.lang.is_empty() {
        d.lang = normalize_lang(d.meta.lookup_get(&["html.lang", "graph.locale", "html.language"]));
    }
    if d.text_direction.is_empty() {
        let dir = d.meta.lookup_get(&["html.dir"]);
        if dir == "rtl" || dir == "ltr" {
            d.text_direction = dir.to_string();
        }
    }

    if d.date.is_none() {
        d.date = d
            .meta
            .lookup(&[
                "graph.published_time",
                "schema.datePublished",
                "html.date",
                "html.dc.date",
            ])
            .iter()
            .find_map(|v| parse_date(v));
    }

    if d.document_type.is_empty() {
        let og_type = d.meta.lookup_get(&["graph.type"]).to_lowercase();
        d.document_type = if og_type.starts_with("video") {
            "video"
        } else if og_type.starts_with("music") {
            "music"
        } else {
            "article"
        }
        .to_string();
    }
}

/// Collects metadata of the first Drop and derives its descriptive fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractMeta;

#[async_trait(?Send)]
impl Processor for ExtractMeta {
    fn name(&self) -> &str {
        "extract-meta"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom || m.position() > 0 {
            return next;
        }
        let Some(meta) = m.with_dom(parse_meta) else {
            return next;
        };
        m.log().debug("metadata extracted", &[("keys", &meta.len())]);

        let d = m.drop_mut();
        for (key, values) in meta.iter() {
            for value in values {
                d.meta.add(key.clone(), value.clone());
            }
        }
        apply_meta(d);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::Extractor;
    use chrono::Datelike;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"<html lang="fr-FR" dir="RTL"><head>
        <title>  Plain   title </title>
        <meta name="description" content="Plain description">
        <meta property="og:title" content="Graph title">
        <meta property="og:type" content="video.movie">
        <meta property="article:published_time" content="2024-03-05T10:00:00Z">
        <meta name="twitter:image" content="/img/cover.png">
        <meta name="author" content="By Jane Doe">
        <meta property="fb:app_id" content="123">
        </head><body>
        <span itemprop="author">Zed</span>
        <div itemscope itemprop="publisher"><span itemprop="name">Daily</span></div>
        </body></html>"#;

    #[test]
    fn dates_in_several_formats() {
        let rfc = parse_date("2024-01-05T08:00:00+02:00").unwrap();
        assert_eq!(rfc.to_rfc3339(), "2024-01-05T06:00:00+00:00");

        for s in ["Jan 5, 2024", "5 January 2024", "2024-01-05"] {
            let dt = parse_date(s).unwrap();
            assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 1, 5), "{}", s);
        }
        assert!(parse_date("").is_none());
        assert!(parse_date("not a date at all").is_none());
    }

    #[test]
    fn language_is_primary_subtag() {
        assert_eq!(normalize_lang("en-US"), "en");
        assert_eq!(normalize_lang("pt_BR"), "pt");
        assert_eq!(normalize_lang("x"), "");
    }

    #[test]
    fn raw_meta_keys() {
        let meta = parse_meta(&Document::from(PAGE));
        assert_eq!(meta.lookup_get(&["html.title"]), "Plain title");
        assert_eq!(meta.lookup_get(&["html.dir"]), "rtl");
        assert_eq!(meta.lookup_get(&["graph.title"]), "Graph title");
        assert_eq!(meta.lookup_get(&["graph.published_time"]), "2024-03-05T10:00:00Z");
        assert_eq!(meta.lookup_get(&["twitter.image"]), "/img/cover.png");
        assert_eq!(meta.lookup_get(&["schema.author"]), "Zed");
        assert_eq!(meta.lookup_get(&["schema.name"]), "Daily");
        assert!(meta.get("schema.publisher").is_empty());
        assert!(meta.get("fb.app_id").is_empty());
    }

    #[tokio::test]
    async fn processor_fills_drop_fields() {
        let mut ex = Extractor::builder("http://example.net/post")
            .body(PAGE)
            .processor(ExtractMeta)
            .build()
            .unwrap();
        ex.run().await.unwrap();

        let d = &ex.drops()[0];
        assert_eq!(d.title, "Graph title");
        assert_eq!(d.description, "Plain description");
        assert_eq!(d.site_name, "example.net");
        assert_eq!(d.authors(), &["Zed"]);
        assert_eq!(d.lang, "fr");
        assert_eq!(d.text_direction, "rtl");
        assert_eq!(d.document_type, "video");
        assert_eq!(d.date.map(|dt| dt.day()), Some(5));
    }
}
