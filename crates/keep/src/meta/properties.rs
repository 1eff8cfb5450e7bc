// ABOUTME: Raw structured properties of a page: JSON-LD and JSON script blocks, meta and link elements.
// ABOUTME: Stored on the Drop for content scripts and the favicon loader.

use async_trait::async_trait;
use dom_query::{Document, NodeRef, Selection};
use serde_json::{Map, Value};

use crate::drop::DropProperties;
use crate::process::{Next, ProcessMessage, Processor, Stage};

/// Collect `json-ld`, `json`, `meta` and `link` blocks. A key is present only
/// when at least one block was parsed.
pub fn parse_props(doc: &Document) -> DropProperties {
    let mut props = DropProperties::new();
    let blocks = [
        ("json-ld", "script[type='application/ld+json']", json_node as fn(&NodeRef) -> Option<Value>),
        ("json", "script[type='application/json']", json_node),
        ("meta", "head meta", node_to_map),
        ("link", "link", node_to_map),
    ];

    for (key, css, parse) in blocks {
        let list: Vec<Value> = doc.select(css).nodes().iter().filter_map(parse).collect();
        if !list.is_empty() {
            props.insert(key.to_string(), Value::Array(list));
        }
    }
    props
}

fn json_node(node: &NodeRef) -> Option<Value> {
    serde_json::from_str(Selection::from(*node).text().trim()).ok()
}

/// Attributes as `@name` entries, plus `#text` when the element has text.
fn node_to_map(node: &NodeRef) -> Option<Value> {
    let mut map = Map::new();
    for attr in node.attrs() {
        map.insert(
            format!("@{}", attr.name.local),
            Value::String(attr.value.to_string()),
        );
    }
    let text = Selection::from(*node).text();
    if !text.trim().is_empty() {
        map.insert("#text".to_string(), Value::String(text.trim().to_string()));
    }
    Some(Value::Object(map))
}

/// Stores [`parse_props`] of the first Drop.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetDropProperties;

#[async_trait(?Send)]
impl Processor for SetDropProperties {
    fn name(&self) -> &str {
        "drop-properties"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom || m.position() > 0 {
            return next;
        }
        if let Some(props) = m.with_dom(parse_props) {
            m.drop_mut().properties = props;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn collects_blocks() {
        let doc = Document::from(
            r#"<html><head>
            <meta name="author" content="Jane">
            <link rel="icon" href="/favicon.png" sizes="32x32">
            <script type="application/ld+json">{"@type": "NewsArticle", "headline": "Hi"}</script>
            <script type="application/ld+json">{broken</script>
            </head><body></body></html>"#,
        );
        let props = parse_props(&doc);

        assert_eq!(props["json-ld"], json!([{"@type": "NewsArticle", "headline": "Hi"}]));
        assert_eq!(props["meta"], json!([{"@name": "author", "@content": "Jane"}]));
        assert_eq!(
            props["link"],
            json!([{"@rel": "icon", "@href": "/favicon.png", "@sizes": "32x32"}])
        );
        assert!(!props.contains_key("json"));
    }
}
