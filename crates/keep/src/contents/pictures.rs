// ABOUTME: Flattens <picture> elements into a single <img> and unwraps images hidden in <noscript>.
// ABOUTME: Runs before readability so images survive content isolation.

use async_trait::async_trait;
use dom_query::{Document, NodeRef, Selection};

use crate::process::{Next, ProcessMessage, Processor, Stage};

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// Replace every `<picture>` with its `<img>`, whose `srcset` becomes the
/// sets of all `<source>` elements followed by its own. Returns the number
/// of converted elements.
pub fn convert_picture_nodes(doc: &Document) -> usize {
    let pictures = doc.select("picture");
    let mut count = 0;

    for node in pictures.nodes() {
        let picture = Selection::from(*node);
        let mut sets: Vec<String> = Vec::new();
        for source in picture.select("source[srcset]").nodes() {
            if let Some(set) = Selection::from(*source).attr("srcset") {
                if !set.trim().is_empty() {
                    sets.push(set.trim().to_string());
                }
            }
        }

        let img = picture.select("img").first();
        if let Some(own) = img.attr("srcset") {
            if !own.trim().is_empty() {
                sets.push(own.trim().to_string());
            }
        }
        let srcset = sets.join(", ");

        let html = if img.is_empty() {
            format!("<img srcset=\"{}\">", escape_attr(&srcset))
        } else {
            if !srcset.is_empty() {
                img.set_attr("srcset", &srcset);
            }
            img.html().to_string()
        };
        picture.replace_with_html(html.as_str());
        count += 1;
    }
    count
}

/// True for an `<img>` or an element wrapping exactly one image and no text.
fn is_single_image(node: &NodeRef) -> bool {
    if node.node_name().is_some_and(|n| n.eq_ignore_ascii_case("img")) {
        return true;
    }
    let children: Vec<NodeRef> = node.children().into_iter().filter(|c| c.is_element()).collect();
    if children.len() != 1 || !Selection::from(*node).text().trim().is_empty() {
        return false;
    }
    is_single_image(&children[0])
}

/// The element right before `node` among its siblings.
fn previous_element<'a>(node: &NodeRef<'a>) -> Option<NodeRef<'a>> {
    let parent = node.parent()?;
    let mut previous = None;
    for child in parent.children() {
        if child.id == node.id {
            return previous;
        }
        if child.is_element() {
            previous = Some(child);
        }
    }
    None
}

/// Replace `<noscript>` elements holding a single image by that image. When
/// a placeholder image sits right before the noscript, the placeholder goes.
pub fn unwrap_noscript_images(doc: &Document) -> usize {
    let mut count = 0;
    for node in doc.select("noscript").nodes() {
        let raw = Selection::from(*node).inner_html().to_string();
        let inner = Document::from(raw.as_str());
        let img = inner.select("body img").first();
        let body = inner.select("body");
        let Some(body_node) = body.nodes().first() else {
            continue;
        };
        if img.is_empty() || !is_single_image(body_node) {
            continue;
        }

        if let Some(prev) = previous_element(node) {
            if is_single_image(&prev) {
                Selection::from(prev).remove();
            }
        }
        Selection::from(*node).replace_with_html(img.html().to_string().as_str());
        count += 1;
    }
    count
}

/// Flattens pictures and noscript images of the DOM.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertPictures;

#[async_trait(?Send)]
impl Processor for ConvertPictures {
    fn name(&self) -> &str {
        "convert-pictures"
    }

    async fn process(&self, m: &mut ProcessMessage<'_>, next: Next) -> Next {
        if m.stage() != Stage::Dom {
            return next;
        }
        let Some((noscripts, pictures)) =
            m.with_dom(|doc| (unwrap_noscript_images(doc), convert_picture_nodes(doc)))
        else {
            return next;
        };
        if noscripts + pictures > 0 {
            m.log().debug(
                "images converted",
                &[("noscript", &noscripts), ("picture", &pictures)],
            );
        }
        next
    }
}
