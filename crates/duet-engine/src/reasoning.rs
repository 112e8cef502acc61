//! Removal of model "thinking" spans from streamed text.
//!
//! [`ReasoningFilter::filter`] maps the raw accumulated reply to the text a
//! user should see. [`StreamingFilter`] produces the same result for a
//! growing buffer without rescanning text that can no longer change.

use serde::{Deserialize, Serialize};

/// An open/close marker pair delimiting a reasoning span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerPair {
    pub open: String,
    pub close: String,
}

impl MarkerPair {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

/// Marker pairs recognized when none are configured.
pub fn default_markers() -> Vec<MarkerPair> {
    vec![
        MarkerPair::new("<think>", "</think>"),
        MarkerPair::new("<thinking>", "</thinking>"),
        MarkerPair::new("<reasoning>", "</reasoning>"),
    ]
}

/// Output of a filter pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filtered {
    pub visible: String,
    pub reasoning_active: bool,
}

#[derive(Debug, Clone)]
pub struct ReasoningFilter {
    markers: Vec<MarkerPair>,
    max_open_len: usize,
}

impl Default for ReasoningFilter {
    fn default() -> Self {
        Self::new(default_markers())
    }
}

impl ReasoningFilter {
    /// Build a filter from marker pairs. Pairs with an empty marker are ignored.
    pub fn new(markers: Vec<MarkerPair>) -> Self {
        let markers: Vec<_> = markers
            .into_iter()
            .filter(|m| !m.open.is_empty() && !m.close.is_empty())
            .collect();
        let max_open_len = markers.iter().map(|m| m.open.len()).max().unwrap_or(0);
        Self {
            markers,
            max_open_len,
        }
    }

    /// Compute the visible text for the full raw buffer.
    pub fn filter(&self, raw: &str) -> Filtered {
        self.scan(raw, 0, false)
    }

    /// Visible text for `raw[from..]`, starting outside any span.
    fn scan(&self, raw: &str, from: usize, mut collapse_pending: bool) -> Filtered {
        let mut visible = String::new();
        let mut pos = from;

        loop {
            match self.find_open(raw, pos) {
                Some((idx, pair)) => {
                    push_segment(&mut visible, &raw[pos..idx], collapse_pending);
                    let body = idx + self.markers[pair].open.len();
                    let close = &self.markers[pair].close;
                    match raw[body..].find(close.as_str()) {
                        Some(rel) => {
                            pos = body + rel + close.len();
                            collapse_pending = true;
                        }
                        None => {
                            return Filtered {
                                visible,
                                reasoning_active: true,
                            };
                        }
                    }
                }
                None => {
                    let tail = &raw[pos..];
                    let keep = tail.len() - self.partial_open_suffix(tail);
                    push_segment(&mut visible, &tail[..keep], collapse_pending);
                    return Filtered {
                        visible,
                        reasoning_active: false,
                    };
                }
            }
        }
    }

    /// Earliest open marker at or after `from`; on a tie the longest marker wins.
    fn find_open(&self, raw: &str, from: usize) -> Option<(usize, usize)> {
        let hay = &raw[from..];
        let mut best: Option<(usize, usize)> = None;
        for (i, m) in self.markers.iter().enumerate() {
            if let Some(idx) = hay.find(m.open.as_str()) {
                let better = match best {
                    None => true,
                    Some((b_idx, b)) => {
                        idx < b_idx || (idx == b_idx && m.open.len() > self.markers[b].open.len())
                    }
                };
                if better {
                    best = Some((idx, i));
                }
            }
        }
        best.map(|(idx, i)| (from + idx, i))
    }

    /// Whether an open marker starting in `from..=idx` could still match
    /// differently once more text arrives.
    fn open_undecided(&self, raw: &str, from: usize, idx: usize) -> bool {
        let lo = raw
            .len()
            .saturating_sub(self.max_open_len.saturating_sub(1))
            .max(from);
        (lo..=idx)
            .filter(|&j| raw.is_char_boundary(j))
            .any(|j| {
                let rest = &raw[j..];
                self.markers
                    .iter()
                    .any(|m| rest.len() < m.open.len() && m.open.starts_with(rest))
            })
    }

    /// Length of the longest strict prefix of an open marker that ends `text`.
    fn partial_open_suffix(&self, text: &str) -> usize {
        self.markers
            .iter()
            .flat_map(|m| {
                (1..m.open.len())
                    .filter(|&n| m.open.is_char_boundary(n))
                    .map(move |n| &m.open[..n])
            })
            .filter(|prefix| text.ends_with(prefix))
            .map(str::len)
            .max()
            .unwrap_or(0)
    }
}

/// Append a plain-text segment, collapsing a leading "\n\n" that directly
/// follows a close marker.
fn push_segment(visible: &mut String, segment: &str, collapse_pending: bool) {
    if collapse_pending && segment.starts_with("\n\n") {
        visible.push_str(&segment[1..]);
    } else {
        visible.push_str(segment);
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[derive(Debug, Clone, Copy)]
struct OpenSpan {
    pair: usize,
    search_from: usize,
}

/// Incremental filter over an append-only buffer.
///
/// Keeps the visible text for the raw prefix up to `cursor`, which never
/// moves past a point where a marker could still begin or a newline
/// collapse is undecided. Each push rescans only the text after it.
#[derive(Debug, Clone)]
pub struct StreamingFilter {
    filter: ReasoningFilter,
    raw: String,
    settled: String,
    cursor: usize,
    collapse_pending: bool,
    open: Option<OpenSpan>,
    current: Filtered,
}

impl Default for StreamingFilter {
    fn default() -> Self {
        Self::new(ReasoningFilter::default())
    }
}

impl StreamingFilter {
    pub fn new(filter: ReasoningFilter) -> Self {
        Self {
            filter,
            raw: String::new(),
            settled: String::new(),
            cursor: 0,
            collapse_pending: false,
            open: None,
            current: Filtered::default(),
        }
    }

    /// Raw text received so far.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Result for the current buffer.
    pub fn current(&self) -> &Filtered {
        &self.current
    }

    pub fn reset(&mut self) {
        self.raw.clear();
        self.settled.clear();
        self.cursor = 0;
        self.collapse_pending = false;
        self.open = None;
        self.current = Filtered::default();
    }

    /// Append raw text and return the filtered result for the whole buffer.
    pub fn push(&mut self, delta: &str) -> &Filtered {
        self.raw.push_str(delta);
        self.current = self.advance();
        &self.current
    }

    fn advance(&mut self) -> Filtered {
        loop {
            if let Some(span) = self.open {
                let close = &self.filter.markers[span.pair].close;
                match self.raw[span.search_from..].find(close.as_str()) {
                    Some(rel) => {
                        self.cursor = span.search_from + rel + close.len();
                        self.open = None;
                        self.collapse_pending = true;
                        continue;
                    }
                    None => {
                        let resume = self.raw.len().saturating_sub(close.len() - 1);
                        let resume = floor_char_boundary(&self.raw, resume.max(span.search_from));
                        self.open = Some(OpenSpan {
                            search_from: resume,
                            ..span
                        });
                        return Filtered {
                            visible: self.settled.clone(),
                            reasoning_active: true,
                        };
                    }
                }
            }

            if let Some((idx, pair)) = self.filter.find_open(&self.raw, self.cursor) {
                if self.filter.open_undecided(&self.raw, self.cursor, idx) {
                    // a longer or earlier marker may still complete; commit nothing yet
                    let rest = self
                        .filter
                        .scan(&self.raw, self.cursor, self.collapse_pending);
                    let mut visible = self.settled.clone();
                    visible.push_str(&rest.visible);
                    return Filtered {
                        visible,
                        reasoning_active: rest.reasoning_active,
                    };
                }
                push_segment(
                    &mut self.settled,
                    &self.raw[self.cursor..idx],
                    self.collapse_pending,
                );
                self.collapse_pending = false;
                let body = idx + self.filter.markers[pair].open.len();
                self.cursor = body;
                self.open = Some(OpenSpan {
                    pair,
                    search_from: body,
                });
                continue;
            }

            break;
        }

        let tail = &self.raw[self.cursor..];
        if self.collapse_pending && (tail.len() >= 2 || (!tail.is_empty() && !tail.starts_with('\n'))) {
            if tail.starts_with("\n\n") {
                self.cursor += 1;
            }
            self.collapse_pending = false;
        }

        if !self.collapse_pending {
            let safe = self
                .raw
                .len()
                .saturating_sub(self.filter.max_open_len.saturating_sub(1));
            let safe = floor_char_boundary(&self.raw, safe.max(self.cursor));
            self.settled.push_str(&self.raw[self.cursor..safe]);
            self.cursor = safe;
        }

        let tail = &self.raw[self.cursor..];
        let keep = tail.len() - self.filter.partial_open_suffix(tail);
        let mut visible = self.settled.clone();
        push_segment(&mut visible, &tail[..keep], self.collapse_pending);
        Filtered {
            visible,
            reasoning_active: false,
        }
    }
}
