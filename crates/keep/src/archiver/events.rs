// ABOUTME: Event taxonomy emitted by an archive session.
// ABOUTME: Events are appended to the session log and forwarded to an optional handler.

use std::fmt;
use std::sync::Arc;

/// Called synchronously for every event, from whichever task produced it.
pub type EventHandler = Arc<dyn Fn(&ArchiveEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEvent {
    /// An HTML document (top-level or embedded) starts being archived.
    StartHtml { url: String },
    /// A resource is requested; `cached` tells whether the session cache answered.
    FetchUrl {
        url: String,
        parent: String,
        cached: bool,
    },
    /// A download slot was acquired and the request is going out.
    DownloadStart { url: String },
    /// The download finished and its slot was released.
    DownloadDone { url: String },
    /// A resource could not be archived. The reference is left untouched.
    Error { url: String, error: String },
    Info { message: String },
}

impl ArchiveEvent {
    pub fn url(&self) -> Option<&str> {
        match self {
            ArchiveEvent::StartHtml { url }
            | ArchiveEvent::FetchUrl { url, .. }
            | ArchiveEvent::DownloadStart { url }
            | ArchiveEvent::DownloadDone { url }
            | ArchiveEvent::Error { url, .. } => Some(url),
            ArchiveEvent::Info { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ArchiveEvent::Error { .. })
    }
}

impl fmt::Display for ArchiveEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveEvent::StartHtml { url } => write!(f, "start html {}", url),
            ArchiveEvent::FetchUrl {
                url,
                parent,
                cached,
            } => {
                let from = if *cached { "cache" } else { "network" };
                write!(f, "fetch {} from {} (parent {})", url, from, parent)
            }
            ArchiveEvent::DownloadStart { url } => write!(f, "download start {}", url),
            ArchiveEvent::DownloadDone { url } => write!(f, "download done {}", url),
            ArchiveEvent::Error { url, error } => write!(f, "error {}: {}", url, error),
            ArchiveEvent::Info { message } => f.write_str(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_accessors() {
        let ev = ArchiveEvent::FetchUrl {
            url: "http://x/a.png".into(),
            parent: "http://x/".into(),
            cached: true,
        };
        assert_eq!(ev.to_string(), "fetch http://x/a.png from cache (parent http://x/)");
        assert_eq!(ev.url(), Some("http://x/a.png"));
        assert!(!ev.is_error());

        let info = ArchiveEvent::Info {
            message: "done".into(),
        };
        assert_eq!(info.url(), None);
    }
}
