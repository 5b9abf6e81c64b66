//! Query term parsing and highlight snippets for keyword search results.

use regex::{Regex, RegexBuilder};
use std::ops::Range;
use std::sync::OnceLock;

pub const DEFAULT_HIGHLIGHT_WINDOW: usize = 40;
pub const DEFAULT_HIGHLIGHT_LIMIT: usize = 3;

static TERM_PATTERN: OnceLock<Regex> = OnceLock::new();

fn term_pattern() -> &'static Regex {
    TERM_PATTERN.get_or_init(|| Regex::new(r"\w+").expect("valid regex"))
}

/// Word runs of `query`, lower-cased, in query order.
pub fn parse_search_terms(query: &str) -> Vec<String> {
    term_pattern()
        .find_iter(query)
        .map(|found| found.as_str().to_lowercase())
        .collect()
}

/// Up to `limit` snippets around case-insensitive matches of `terms`, with
/// `window` characters of context on each side. The match is wrapped in
/// `**` and clipped edges are marked with `…`. A match whose window overlaps
/// an earlier snippet is skipped.
pub fn build_highlights(text: &str, terms: &[String], window: usize, limit: usize) -> Vec<String> {
    if text.is_empty() || limit == 0 {
        return Vec::new();
    }
    let alternatives: Vec<String> = terms
        .iter()
        .filter(|term| !term.is_empty())
        .map(|term| regex::escape(&term.to_lowercase()))
        .collect();
    if alternatives.is_empty() {
        return Vec::new();
    }
    let Ok(pattern) = RegexBuilder::new(&alternatives.join("|"))
        .case_insensitive(true)
        .build()
    else {
        return Vec::new();
    };

    let mut highlights = Vec::new();
    let mut seen: Vec<Range<usize>> = Vec::new();
    for found in pattern.find_iter(text) {
        let start = step_back(text, found.start(), window);
        let end = step_forward(text, found.end(), window);
        if seen
            .iter()
            .any(|previous| start.max(previous.start) < end.min(previous.end))
        {
            continue;
        }

        let matched = found.as_str();
        let mut snippet = text[start..end].replacen(matched, &format!("**{matched}**"), 1);
        if start > 0 {
            snippet.insert(0, '…');
        }
        if end < text.len() {
            snippet.push('…');
        }

        highlights.push(snippet);
        seen.push(start..end);
        if highlights.len() >= limit {
            break;
        }
    }
    highlights
}

fn step_back(text: &str, from: usize, chars: usize) -> usize {
    text[..from]
        .char_indices()
        .rev()
        .take(chars)
        .last()
        .map_or(from, |(index, _)| index)
}

fn step_forward(text: &str, from: usize, chars: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(chars)
        .map_or(text.len(), |(offset, _)| from + offset)
}
