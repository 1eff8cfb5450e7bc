// ABOUTME: Pluggable image and URL processors used when rewriting archived references.
// ABOUTME: Defaults read images through and inline every asset as a base64 data URL.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use url::Url;

use super::Asset;
use crate::sniff;

/// Transforms downloaded image bytes before they are cached.
pub trait ImageProcessor: Send + Sync {
    /// Returns the new bytes and content type.
    fn process(&self, url: &Url, data: Bytes, content_type: &str) -> anyhow::Result<(Bytes, String)>;
}

/// Reads images through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadThrough;

impl ImageProcessor for ReadThrough {
    fn process(&self, _url: &Url, data: Bytes, content_type: &str) -> anyhow::Result<(Bytes, String)> {
        Ok((data, content_type.to_string()))
    }
}

/// Produces the value written back into a referencing attribute.
pub trait UrlProcessor: Send + Sync {
    fn rewrite(&self, url: &Url, asset: &Asset) -> String;
}

/// Inlines assets as `data:<type>;base64,<payload>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DataUrlProcessor;

impl UrlProcessor for DataUrlProcessor {
    fn rewrite(&self, _url: &Url, asset: &Asset) -> String {
        data_url(&asset.data, &asset.content_type)
    }
}

/// Points references at a stable local file name derived from the URL.
///
/// The caller persists [`Archive::resources`](super::Archive::resources) under
/// the same names with [`LocalNameUrlProcessor::file_name`].
#[derive(Debug, Clone)]
pub struct LocalNameUrlProcessor {
    prefix: String,
}

impl LocalNameUrlProcessor {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { prefix }
    }

    /// `<sha256 prefix>.<ext>` for a resource URL.
    pub fn file_name(url: &Url, content_type: &str) -> String {
        let digest = Sha256::digest(url.as_str().as_bytes());
        let hash = hex::encode(digest);
        let ext = sniff::extension_for(url.path(), content_type);
        format!("{}.{}", &hash[..24], ext)
    }
}

impl Default for LocalNameUrlProcessor {
    fn default() -> Self {
        Self::new("./_resources/")
    }
}

impl UrlProcessor for LocalNameUrlProcessor {
    fn rewrite(&self, url: &Url, asset: &Asset) -> String {
        format!("{}{}", self.prefix, Self::file_name(url, &asset.content_type))
    }
}

/// Build a base64 data URL.
pub fn data_url(data: &[u8], content_type: &str) -> String {
    let content_type = if content_type.is_empty() {
        "application/octet-stream"
    } else {
        content_type
    };
    format!("data:{};base64,{}", content_type, STANDARD.encode(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn asset(data: &'static [u8], content_type: &str) -> Asset {
        Asset {
            data: Bytes::from_static(data),
            content_type: content_type.to_string(),
        }
    }

    #[test]
    fn data_urls() {
        let url = Url::parse("http://x/a.txt").unwrap();
        let out = DataUrlProcessor.rewrite(&url, &asset(b"hello", "text/plain"));
        assert_eq!(out, "data:text/plain;base64,aGVsbG8=");
        assert_eq!(data_url(b"", ""), "data:application/octet-stream;base64,");
    }

    #[test]
    fn local_names_are_stable() {
        let p = LocalNameUrlProcessor::default();
        let url = Url::parse("http://x/photo.png").unwrap();
        let a = p.rewrite(&url, &asset(b"1", "image/png"));
        let b = p.rewrite(&url, &asset(b"2", "image/png"));
        assert_eq!(a, b);
        assert!(a.starts_with("./_resources/"));
        assert!(a.ends_with(".png"));

        let other = Url::parse("http://x/other.png").unwrap();
        assert_ne!(a, p.rewrite(&other, &asset(b"1", "image/png")));
    }

    #[test]
    fn read_through_keeps_bytes() {
        let url = Url::parse("http://x/a.gif").unwrap();
        let (data, ct) = ReadThrough
            .process(&url, Bytes::from_static(b"GIF89a"), "image/gif")
            .unwrap();
        assert_eq!(&data[..], b"GIF89a");
        assert_eq!(ct, "image/gif");
    }
}
