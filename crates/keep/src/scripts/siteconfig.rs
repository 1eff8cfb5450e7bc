// ABOUTME: Per-site extraction rules (selectors, replacements, headers) and their registry.
// ABOUTME: Rules for a host merge <host>.json, wildcard .<suffix>.json files and global.json.

//! Site configuration.
//!
//! A [`SiteConfig`] tells the extraction processors where the title, body,
//! author and date live on a given site, what to strip, which strings to
//! replace in the raw body and how to find single-page and next-page links.
//! Selectors are CSS selectors.
//!
//! The [`SiteConfigRegistry`] stores configs by file name. Looking up
//! `blog.example.com` merges, in order:
//!
//! 1. `blog.example.com.json`
//! 2. `.blog.example.com.json`, `.example.com.json`, `.com.json`
//! 3. `global.json` and its wildcard variants
//!
//! Merging stops once a merged config turns `autodetect_on_failure` off.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

/// A sample URL and the strings its extraction should contain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterTest {
    pub url: String,
    #[serde(default)]
    pub contains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    #[serde(skip)]
    files: Vec<String>,

    pub title_selectors: Vec<String>,
    pub body_selectors: Vec<String>,
    pub date_selectors: Vec<String>,
    pub author_selectors: Vec<String>,
    pub strip_selectors: Vec<String>,
    pub strip_id_or_class: Vec<String>,
    pub strip_image_src: Vec<String>,
    pub native_ad_selectors: Vec<String>,
    pub tidy: bool,
    pub prune: bool,
    pub autodetect_on_failure: bool,
    pub single_page_link_selectors: Vec<String>,
    pub next_page_link_selectors: Vec<String>,
    pub replace_strings: Vec<[String; 2]>,
    pub http_headers: BTreeMap<String, String>,
    pub tests: Vec<FilterTest>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            title_selectors: Vec::new(),
            body_selectors: Vec::new(),
            date_selectors: Vec::new(),
            author_selectors: Vec::new(),
            strip_selectors: Vec::new(),
            strip_id_or_class: Vec::new(),
            strip_image_src: Vec::new(),
            native_ad_selectors: Vec::new(),
            tidy: false,
            prune: false,
            autodetect_on_failure: true,
            single_page_link_selectors: Vec::new(),
            next_page_link_selectors: Vec::new(),
            replace_strings: Vec::new(),
            http_headers: BTreeMap::new(),
            tests: Vec::new(),
        }
    }
}

impl SiteConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid site config")
    }

    /// Files this config was built from.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Append `src` to this config. Lists are concatenated, flags and
    /// headers from `src` win.
    pub fn merge(&mut self, src: SiteConfig) {
        self.files.extend(src.files);
        self.title_selectors.extend(src.title_selectors);
        self.body_selectors.extend(src.body_selectors);
        self.date_selectors.extend(src.date_selectors);
        self.author_selectors.extend(src.author_selectors);
        self.strip_selectors.extend(src.strip_selectors);
        self.strip_id_or_class.extend(src.strip_id_or_class);
        self.strip_image_src.extend(src.strip_image_src);
        self.native_ad_selectors.extend(src.native_ad_selectors);
        self.tidy = src.tidy;
        self.prune = src.prune;
        self.autodetect_on_failure = src.autodetect_on_failure;
        self.single_page_link_selectors
            .extend(src.single_page_link_selectors);
        self.next_page_link_selectors.extend(src.next_page_link_selectors);
        self.replace_strings.extend(src.replace_strings);
        self.tests.extend(src.tests);
        self.http_headers.extend(src.http_headers);
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && *self == SiteConfig::default()
    }
}

/// Site configs keyed by file name (`example.com.json`, `.example.com.json`,
/// `global.json`).
#[derive(Debug, Clone, Default)]
pub struct SiteConfigRegistry {
    entries: BTreeMap<String, SiteConfig>,
}

impl SiteConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` file of a directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut registry = Self::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("cannot read site config directory {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let config = SiteConfig::from_json(&json)
                .with_context(|| format!("cannot parse {}", path.display()))?;
            registry.insert(name, config);
        }
        tracing::debug!(dir = %dir.display(), count = registry.len(), "site configs loaded");
        Ok(registry)
    }

    /// Register a config under a file name, e.g. `example.com.json`.
    pub fn insert(&mut self, file_name: impl Into<String>, config: SiteConfig) {
        self.entries.insert(file_name.into(), config);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File names matching `name`: the exact file, then wildcards from the
    /// most to the least specific.
    pub fn find_files(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        let exact = format!("{}.json", name);
        if self.entries.contains_key(&exact) {
            out.push(exact);
        }

        let parts: Vec<&str> = name.split('.').collect();
        for i in 0..parts.len() {
            let wildcard = format!(".{}.json", parts[i..].join("."));
            if self.entries.contains_key(&wildcard) {
                out.push(wildcard);
            }
        }
        out
    }

    /// The merged config for a URL. Without any match this is the default
    /// config.
    pub fn config_for(&self, url: &Url) -> SiteConfig {
        let host = url.host_str().unwrap_or_default().to_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);

        let mut files = self.find_files(host);
        files.extend(self.find_files("global"));

        let mut merged = SiteConfig::default();
        for file in files {
            if !merged.autodetect_on_failure {
                break;
            }
            if let Some(config) = self.entries.get(&file) {
                let mut config = config.clone();
                config.files = vec![file];
                merged.merge(config);
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(json: &str) -> SiteConfig {
        SiteConfig::from_json(json).unwrap()
    }

    #[test]
    fn parses_snake_case_field_names() {
        let cfg = config(
            r#"{
                "title_selectors": ["h1.title"],
                "body_selectors": ["article"],
                "replace_strings": [["<br><br>", "<p>"]],
                "http_headers": {"cookie": "consent=1"},
                "autodetect_on_failure": false,
                "tests": [{"url": "https://example.com/a", "contains": ["x"]}]
            }"#,
        );
        assert_eq!(cfg.title_selectors, vec!["h1.title"]);
        assert_eq!(cfg.replace_strings, vec![["<br><br>".to_string(), "<p>".to_string()]]);
        assert_eq!(cfg.http_headers.get("cookie").map(String::as_str), Some("consent=1"));
        assert!(!cfg.autodetect_on_failure);
        assert_eq!(cfg.tests.len(), 1);

        assert!(config("{}").autodetect_on_failure);
        assert!(SiteConfig::from_json("[").is_err());
    }

    #[test]
    fn finds_exact_and_wildcard_files() {
        let mut reg = SiteConfigRegistry::new();
        reg.insert("blog.example.com.json", SiteConfig::default());
        reg.insert(".example.com.json", SiteConfig::default());
        reg.insert("global.json", SiteConfig::default());

        assert_eq!(
            reg.find_files("blog.example.com"),
            vec!["blog.example.com.json", ".example.com.json"]
        );
        assert_eq!(reg.find_files("example.com"), vec![".example.com.json"]);
        assert_eq!(reg.find_files("global"), vec!["global.json"]);
    }

    #[test]
    fn merges_in_order_and_trims_www() {
        let mut reg = SiteConfigRegistry::new();
        reg.insert("example.com.json", config(r##"{"body_selectors": ["#main"], "http_headers": {"x-a": "1"}}"##));
        reg.insert(".com.json", config(r#"{"body_selectors": ["article"]}"#));
        reg.insert("global.json", config(r#"{"strip_selectors": [".ads"], "http_headers": {"x-a": "2"}}"#));

        let url = Url::parse("https://www.example.com/post").unwrap();
        let cfg = reg.config_for(&url);
        assert_eq!(cfg.body_selectors, vec!["#main", "article"]);
        assert_eq!(cfg.strip_selectors, vec![".ads"]);
        assert_eq!(cfg.http_headers.get("x-a").map(String::as_str), Some("2"));
        assert_eq!(cfg.files(), ["example.com.json", ".com.json", "global.json"]);
    }

    #[test]
    fn autodetect_off_stops_merging() {
        let mut reg = SiteConfigRegistry::new();
        reg.insert("example.com.json", config(r##"{"body_selectors": ["#main"], "autodetect_on_failure": false}"##));
        reg.insert("global.json", config(r#"{"strip_selectors": [".ads"]}"#));

        let cfg = reg.config_for(&Url::parse("https://example.com/").unwrap());
        assert_eq!(cfg.body_selectors, vec!["#main"]);
        assert!(cfg.strip_selectors.is_empty());
    }

    #[test]
    fn loads_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("example.org.json"), r#"{"author_selectors": [".byline"]}"#).unwrap();
        std::fs::write(dir.path().join("README.txt"), "ignored").unwrap();

        let reg = SiteConfigRegistry::from_dir(dir.path()).unwrap();
        assert_eq!(reg.len(), 1);
        let cfg = reg.config_for(&Url::parse("http://example.org/x").unwrap());
        assert_eq!(cfg.author_selectors, vec![".byline"]);

        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        assert!(SiteConfigRegistry::from_dir(dir.path()).is_err());
    }

    #[test]
    fn no_match_is_default() {
        let reg = SiteConfigRegistry::new();
        let cfg = reg.config_for(&Url::parse("http://nowhere.test/").unwrap());
        assert!(cfg.is_empty());
    }
}
