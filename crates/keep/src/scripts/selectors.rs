// ABOUTME: Compiled CSS selector cache for site config rules.
// ABOUTME: Invalid selectors are cached as None and never panic.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use dom_query::{Document, Matcher, Selection};
use once_cell::sync::Lazy;

static MATCHERS: Lazy<RwLock<HashMap<String, Option<Matcher>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Compile `css` once. Returns `None` for invalid selectors.
pub fn matcher(css: &str) -> Option<Matcher> {
    {
        let cache = MATCHERS.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.get(css) {
            return cached.clone();
        }
    }

    let compiled = Matcher::new(css).ok();
    if compiled.is_none() {
        tracing::debug!(selector = css, "invalid selector");
    }
    MATCHERS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(css.to_string())
        .or_insert(compiled)
        .clone()
}

/// Elements matching `css`, or `None` when nothing matches or the selector
/// is invalid.
pub fn select<'a>(doc: &'a Document, css: &str) -> Option<Selection<'a>> {
    let m = matcher(css)?;
    let sel = doc.select_matcher(&m);
    (!sel.is_empty()).then_some(sel)
}
