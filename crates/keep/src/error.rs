// ABOUTME: Error types for extraction jobs: the ErrorCode taxonomy and the ExtractError struct.
// ABOUTME: Every code maps to a stable, user-displayable message; constructors and predicates included.

use std::fmt;
use std::sync::Arc;

/// A shared, cloneable error cause. The chain of the wrapped error is kept.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Error categories. Each one carries a stable message suitable for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidUrl,
    Fetch,
    Blocked,
    Timeout,
    Parse,
    TooManyRedirects,
    TooManyPages,
    Hook,
    Archive,
    Cancelled,
}

impl ErrorCode {
    /// The stable message shown to users for this category.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidUrl => "invalid URL",
            ErrorCode::Fetch => "fetch error",
            ErrorCode::Blocked => "destination blocked",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Parse => "parse error",
            ErrorCode::TooManyRedirects => "too many redirects",
            ErrorCode::TooManyPages => "too many pages",
            ErrorCode::Hook => "content script error",
            ErrorCode::Archive => "archive error",
            ErrorCode::Cancelled => "operation canceled",
        }
    }

    /// Safety-limit and cancellation errors stop the whole job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCode::TooManyRedirects | ErrorCode::TooManyPages | ErrorCode::Cancelled
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// The error type shared by the fetch layer, the extractor and the archiver.
/// Clones share the cause and its chain.
#[derive(Debug, Clone, thiserror::Error)]
pub struct ExtractError {
    pub code: ErrorCode,
    pub url: String,
    pub op: String,
    #[source]
    pub source: Option<Cause>,
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.op, self.url, self.code)?;
        if let Some(ref src) = self.source {
            write!(f, ": {}", src)?;
        }
        Ok(())
    }
}

macro_rules! constructor {
    ($(#[$doc:meta])* $name:ident, $code:expr) => {
        $(#[$doc])*
        pub fn $name(
            url: impl Into<String>,
            op: impl Into<String>,
            source: Option<anyhow::Error>,
        ) -> Self {
            Self::new($code, url, op, source)
        }
    };
}

impl ExtractError {
    pub fn new(
        code: ErrorCode,
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self {
            code,
            url: url.into(),
            op: op.into(),
            source: source.map(|e| Arc::from(Box::<dyn std::error::Error + Send + Sync>::from(e))),
        }
    }

    constructor!(
        /// Create an InvalidUrl error.
        invalid_url,
        ErrorCode::InvalidUrl
    );
    constructor!(
        /// Create a Fetch error (network failure, bad status, unreadable body).
        fetch,
        ErrorCode::Fetch
    );
    constructor!(
        /// Create a Blocked error: the destination matched the IP deny-list.
        blocked,
        ErrorCode::Blocked
    );
    constructor!(timeout, ErrorCode::Timeout);
    constructor!(parse, ErrorCode::Parse);
    constructor!(hook, ErrorCode::Hook);
    constructor!(archive, ErrorCode::Archive);
    constructor!(cancelled, ErrorCode::Cancelled);

    /// Create the job-level "too many redirects" error.
    pub fn too_many_redirects(url: impl Into<String>, limit: usize) -> Self {
        Self::new(
            ErrorCode::TooManyRedirects,
            url,
            "Run",
            Some(anyhow::anyhow!("redirect limit of {} reached", limit)),
        )
    }

    /// Create the job-level "too many pages" error.
    pub fn too_many_pages(url: impl Into<String>, limit: usize) -> Self {
        Self::new(
            ErrorCode::TooManyPages,
            url,
            "Run",
            Some(anyhow::anyhow!("page limit of {} reached", limit)),
        )
    }

    /// The stable message for this error's category.
    pub fn user_message(&self) -> &'static str {
        self.code.message()
    }

    pub fn is_fatal(&self) -> bool {
        self.code.is_fatal()
    }

    pub fn is_fetch(&self) -> bool {
        self.code == ErrorCode::Fetch
    }

    pub fn is_blocked(&self) -> bool {
        self.code == ErrorCode::Blocked
    }

    pub fn is_invalid_url(&self) -> bool {
        self.code == ErrorCode::InvalidUrl
    }

    pub fn is_timeout(&self) -> bool {
        self.code == ErrorCode::Timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }

    pub fn is_too_many_redirects(&self) -> bool {
        self.code == ErrorCode::TooManyRedirects
    }

    pub fn is_too_many_pages(&self) -> bool {
        self.code == ErrorCode::TooManyPages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_op_url_and_code() {
        let err = ExtractError::fetch(
            "http://example.net/",
            "Load",
            Some(anyhow::anyhow!("invalid status code (404)")),
        );
        assert_eq!(
            err.to_string(),
            "Load http://example.net/: fetch error: invalid status code (404)"
        );
        assert!(err.is_fetch());
        assert!(!err.is_fatal());
    }

    #[test]
    fn safety_limits_are_fatal_with_stable_messages() {
        let err = ExtractError::too_many_redirects("http://example.net/", 10);
        assert!(err.is_fatal());
        assert_eq!(err.user_message(), "too many redirects");

        let err = ExtractError::too_many_pages("http://example.net/", 100);
        assert!(err.is_too_many_pages());
        assert_eq!(err.user_message(), "too many pages");
    }

    #[test]
    fn clones_share_the_source_chain() {
        let cause = anyhow::anyhow!("connection reset").context("request failed");
        let err = ExtractError::fetch("http://example.net/", "Load", Some(cause));
        let copy = err.clone();

        let chain: Vec<String> =
            std::iter::successors(std::error::Error::source(&copy), |e| e.source())
                .map(|e| e.to_string())
                .collect();
        assert_eq!(chain, vec!["request failed", "connection reset"]);
        assert_eq!(copy.to_string(), err.to_string());
    }

    #[test]
    fn hook_errors_are_not_fatal() {
        let err = ExtractError::hook("", "ProcessMeta", None);
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "ProcessMeta : content script error");
    }
}
