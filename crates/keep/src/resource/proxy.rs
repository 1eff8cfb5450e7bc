// ABOUTME: Proxy routing table mapping destination host patterns to proxy URLs.
// ABOUTME: Patterns are host globs where "*" matches any run of characters.

use url::Url;

/// Ordered list of (host pattern, proxy URL). The first matching pattern wins.
#[derive(Debug, Clone, Default)]
pub struct ProxyTable {
    routes: Vec<(String, Url)>,
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route hosts matching `pattern` through `proxy`.
    pub fn route(mut self, pattern: impl Into<String>, proxy: Url) -> Self {
        self.routes.push((pattern.into().to_lowercase(), proxy));
        self
    }

    pub fn push(&mut self, pattern: impl Into<String>, proxy: Url) {
        self.routes.push((pattern.into().to_lowercase(), proxy));
    }

    /// The proxy for a destination URL, if any route matches its host.
    pub fn proxy_for(&self, url: &Url) -> Option<&Url> {
        let host = url.host_str()?.to_lowercase();
        self.routes
            .iter()
            .find(|(pattern, _)| glob_match(pattern, &host))
            .map(|(_, proxy)| proxy)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Match `text` against a pattern where `*` stands for any sequence.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            // backtrack: let the last star swallow one more char
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
