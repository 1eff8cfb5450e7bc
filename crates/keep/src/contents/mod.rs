// ABOUTME: Content processors: picture and inline SVG conversion, readability, sanitizing, links and plain text.
// ABOUTME: Also holds the job flag that turns readability on or off.

//! Content processing.
//!
//! These processors turn a page DOM into the article that ends up in the
//! Drop's HTML. In chain order:
//!
//! 1. [`ConvertPictures`] flattens `<picture>` and `<noscript>` images;
//! 2. [`ExtractInlineSvgs`] moves inline drawings to the resource cache;
//! 3. [`Readability`] isolates the main content;
//! 4. [`CleanDom`] sanitizes what is left;
//! 5. [`ExtractLinks`] lists the links of the article;
//! 6. [`Text`] renders the plain text during `PostProcess`.

pub mod clean;
pub mod links;
pub mod pictures;
pub mod readability;
pub mod srcset;
pub mod svg;
pub mod text;

pub use self::clean::CleanDom;
pub use self::links::{resolve_links, ExtractLinks, FetchLinks, Link, Links};
pub use self::pictures::ConvertPictures;
pub use self::readability::Readability;
pub use self::svg::{extract_inline_svgs, ExtractInlineSvgs};
pub use self::text::{html_to_text, Text};

use crate::values::Values;

/// Job flag: whether readability runs. Absent means enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadabilityEnabled(pub bool);

/// `(enabled, forced)`: forced is true when the flag was set explicitly.
pub fn readability_enabled(values: &Values) -> (bool, bool) {
    match values.get::<ReadabilityEnabled>() {
        Some(ReadabilityEnabled(v)) => (*v, true),
        None => (true, false),
    }
}

pub fn set_readability(values: &mut Values, enabled: bool) {
    values.insert(ReadabilityEnabled(enabled));
}
