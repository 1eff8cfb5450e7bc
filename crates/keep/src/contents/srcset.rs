// ABOUTME: Parser and renderer for the HTML srcset attribute.
// ABOUTME: Handles width and density descriptors and URLs that contain commas.

/// One image candidate of a `srcset` attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub descriptor: String,
}

impl Candidate {
    /// Width in pixels for `640w` descriptors.
    pub fn width(&self) -> Option<u32> {
        self.descriptor.strip_suffix('w')?.trim().parse().ok()
    }

    /// Pixel density for `2x` descriptors. A missing descriptor means 1x.
    pub fn density(&self) -> Option<f32> {
        if self.descriptor.is_empty() {
            return Some(1.0);
        }
        self.descriptor.strip_suffix('x')?.trim().parse().ok()
    }
}

/// Parse a srcset value into its candidates.
pub fn parse(srcset: &str) -> Vec<Candidate> {
    let chars: Vec<char> = srcset.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        // separators
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }

        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        let mut url: String = chars[start..i].iter().collect();

        // "a.jpg," ends the candidate without a descriptor
        if url.ends_with(',') {
            url = url.trim_end_matches(',').to_string();
            if !url.is_empty() {
                out.push(Candidate {
                    url,
                    descriptor: String::new(),
                });
            }
            continue;
        }

        let mut descriptor = String::new();
        let mut depth = 0usize;
        while i < chars.len() {
            let c = chars[i];
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    i += 1;
                    break;
                }
                _ => {}
            }
            descriptor.push(c);
            i += 1;
        }

        out.push(Candidate {
            url,
            descriptor: descriptor.split_whitespace().collect::<Vec<_>>().join(" "),
        });
    }
    out
}

/// Render candidates back to a srcset value.
pub fn render(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(|c| {
            if c.descriptor.is_empty() {
                c.url.clone()
            } else {
                format!("{} {}", c.url, c.descriptor)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// The widest candidate not wider than `max_width`; density candidates rank
/// by density when no width is given.
pub fn best(candidates: &[Candidate], max_width: u32) -> Option<&Candidate> {
    let by_width = candidates
        .iter()
        .filter_map(|c| c.width().map(|w| (w, c)))
        .filter(|(w, _)| *w <= max_width)
        .max_by_key(|(w, _)| *w)
        .map(|(_, c)| c);
    if by_width.is_some() {
        return by_width;
    }

    candidates
        .iter()
        .filter_map(|c| c.density().map(|d| (d, c)))
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, c)| c)
}
