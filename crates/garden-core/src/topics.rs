//! Frequency-based keyword topics with earliest-occurrence anchors.

use crate::conversation::Message;
use crate::IntelligenceError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

pub const DEFAULT_TOPIC_LIMIT: usize = 10;
pub const DEFAULT_MIN_OCCURRENCES: usize = 2;
pub const DEFAULT_SAMPLE_LIMIT: usize = 3;
const ANCHOR_PREVIEW_CHARS: usize = 280;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "here", "him", "his", "i", "in", "into", "is", "it", "its", "me", "my", "of", "on",
    "or", "our", "she", "so", "that", "the", "their", "them", "there", "they", "this", "to", "we",
    "with", "you", "your",
];

static WORD_PATTERN: OnceLock<Regex> = OnceLock::new();

fn word_pattern() -> &'static Regex {
    WORD_PATTERN.get_or_init(|| Regex::new(r"[A-Za-z][A-Za-z0-9']+").expect("valid regex"))
}

/// Input row for topic extraction. Only `text` feeds tokenization; the rest
/// is carried into anchor samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicMessage {
    pub conv_id: String,
    pub msg_id: String,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl From<&Message> for TopicMessage {
    fn from(message: &Message) -> Self {
        Self {
            conv_id: message.conv_id.clone(),
            msg_id: message.msg_id.clone(),
            ts: Some(message.ts.clone()),
            role: Some(message.role.clone()),
            text: Some(message.text.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicSample {
    pub conv_id: String,
    pub msg_id: String,
    pub ts: Option<String>,
    pub role: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicBundle {
    pub label: String,
    /// Number of input messages that mention the label at least once.
    pub occurrences: usize,
    pub weight: f64,
    pub first_seen_ts: Option<String>,
    pub anchors: Vec<TopicSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicOptions {
    pub limit: usize,
    pub min_occurrences: usize,
    pub sample_limit: usize,
}

impl Default for TopicOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_TOPIC_LIMIT,
            min_occurrences: DEFAULT_MIN_OCCURRENCES,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }
}

impl TopicOptions {
    fn validate(&self) -> Result<(), IntelligenceError> {
        for (name, value) in [
            ("limit", self.limit),
            ("min_occurrences", self.min_occurrences),
            ("sample_limit", self.sample_limit),
        ] {
            if value < 1 {
                return Err(IntelligenceError::InvalidArgument { name, value });
            }
        }
        Ok(())
    }
}

struct TermStats {
    order: usize,
    occurrences: usize,
    first_seen_ts: Option<String>,
    anchors: Vec<TopicSample>,
}

#[derive(Default)]
struct TopicAccumulator {
    terms: HashMap<String, TermStats>,
}

impl TopicAccumulator {
    fn observe(&mut self, token: String, message: &TopicMessage, sample_limit: usize) {
        let next_order = self.terms.len();
        let stats = self.terms.entry(token).or_insert_with(|| TermStats {
            order: next_order,
            occurrences: 0,
            first_seen_ts: message.ts.clone(),
            anchors: Vec::new(),
        });
        stats.occurrences += 1;

        // Keep the list bounded; anchors converge on the earliest mentions.
        stats.anchors.push(sample_from(message));
        stats.anchors.sort_by(|left, right| {
            let left_key = (left.ts.as_deref().unwrap_or(""), left.msg_id.as_str());
            let right_key = (right.ts.as_deref().unwrap_or(""), right.msg_id.as_str());
            left_key.cmp(&right_key)
        });
        stats.anchors.truncate(sample_limit);
    }

    fn into_bundles(self, options: &TopicOptions, total_messages: usize) -> Vec<TopicBundle> {
        let mut ranked: Vec<(String, TermStats)> = self
            .terms
            .into_iter()
            .filter(|(_, stats)| stats.occurrences >= options.min_occurrences)
            .collect();

        ranked.sort_by(|(_, left), (_, right)| {
            right
                .occurrences
                .cmp(&left.occurrences)
                .then_with(|| {
                    let left_seen = left.first_seen_ts.as_deref().unwrap_or("");
                    let right_seen = right.first_seen_ts.as_deref().unwrap_or("");
                    left_seen.cmp(right_seen)
                })
                .then_with(|| left.order.cmp(&right.order))
        });
        ranked.truncate(options.limit);

        ranked
            .into_iter()
            .map(|(label, stats)| TopicBundle {
                label,
                occurrences: stats.occurrences,
                weight: stats.occurrences as f64 / total_messages as f64,
                first_seen_ts: stats.first_seen_ts,
                anchors: stats.anchors,
            })
            .collect()
    }
}

/// Distinct, lower-cased topic terms in `text`, in alphabetical order.
pub fn tokenize_terms(text: &str) -> BTreeSet<String> {
    word_pattern()
        .find_iter(text)
        .map(|found| found.as_str().to_lowercase())
        .filter(|token| {
            token.chars().count() > 2
                && !STOPWORDS.contains(&token.as_str())
                && !token.chars().all(|ch| ch.is_ascii_digit())
        })
        .collect()
}

/// Ranks keyword topics over `messages`, which callers supply in ascending
/// timestamp order so that `first_seen_ts` is chronological.
///
/// Occurrences count messages, not token instances: a term repeated inside
/// one message contributes once. `weight` divides by the total number of
/// input messages, including those with no surviving terms.
pub fn extract_topics(
    messages: &[TopicMessage],
    options: TopicOptions,
) -> Result<Vec<TopicBundle>, IntelligenceError> {
    options.validate()?;
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let mut accumulator = TopicAccumulator::default();
    for message in messages {
        let Some(text) = message.text.as_deref() else {
            continue;
        };
        for token in tokenize_terms(text) {
            accumulator.observe(token, message, options.sample_limit);
        }
    }

    Ok(accumulator.into_bundles(&options, messages.len()))
}

fn sample_from(message: &TopicMessage) -> TopicSample {
    TopicSample {
        conv_id: message.conv_id.clone(),
        msg_id: message.msg_id.clone(),
        ts: message.ts.clone(),
        role: message.role.clone(),
        text: trim_preview(message.text.as_deref().unwrap_or_default()),
    }
}

fn trim_preview(text: &str) -> String {
    let clean = text.trim();
    if clean.chars().count() <= ANCHOR_PREVIEW_CHARS {
        return clean.to_string();
    }
    let head: String = clean.chars().take(ANCHOR_PREVIEW_CHARS).collect();
    format!("{}…", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic_msg(msg_id: &str, ts: &str, text: &str) -> TopicMessage {
        TopicMessage {
            conv_id: "conv-1".to_string(),
            msg_id: msg_id.to_string(),
            ts: Some(ts.to_string()),
            role: Some("user".to_string()),
            text: Some(text.to_string()),
        }
    }

    fn options(limit: usize, min_occurrences: usize, sample_limit: usize) -> TopicOptions {
        TopicOptions {
            limit,
            min_occurrences,
            sample_limit,
        }
    }

    #[test]
    fn counts_messages_mentioning_a_term() {
        let messages = vec![
            topic_msg("m1", "2024-01-01T00:00:00", "quantum computing qubits"),
            topic_msg("m2", "2024-01-01T00:01:00", "quantum algorithms"),
            topic_msg("m3", "2024-01-01T00:02:00", "lunch plans"),
        ];

        let topics = extract_topics(&messages, options(10, 2, 3)).expect("valid options");
        assert_eq!(topics.len(), 1);
        let quantum = &topics[0];
        assert_eq!(quantum.label, "quantum");
        assert_eq!(quantum.occurrences, 2);
        assert!((quantum.weight - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(quantum.first_seen_ts.as_deref(), Some("2024-01-01T00:00:00"));
        let anchor_ids: Vec<&str> = quantum.anchors.iter().map(|a| a.msg_id.as_str()).collect();
        assert_eq!(anchor_ids, vec!["m1", "m2"]);
    }

    #[test]
    fn repeated_term_in_one_message_counts_once() {
        let messages = vec![
            topic_msg("m1", "2024-01-01T00:00:00", "rust rust rust RUST"),
            topic_msg("m2", "2024-01-01T00:01:00", "nothing relevant"),
        ];

        let topics = extract_topics(&messages, options(10, 1, 3)).expect("valid options");
        let rust = topics
            .iter()
            .find(|topic| topic.label == "rust")
            .expect("rust topic");
        assert_eq!(rust.occurrences, 1);
        assert!((rust.weight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn drops_stopwords_short_tokens_and_numbers() {
        let terms = tokenize_terms("The cat and their 2024 x1 ab abc123 don't 12345");
        let terms: Vec<&str> = terms.iter().map(String::as_str).collect();
        assert_eq!(terms, vec!["abc123", "cat", "don't"]);
    }

    #[test]
    fn ranks_by_occurrences_then_first_seen() {
        let messages = vec![
            topic_msg("m1", "2024-01-01T00:00:00", "beta"),
            topic_msg("m2", "2024-01-01T00:01:00", "alpha beta"),
            topic_msg("m3", "2024-01-01T00:02:00", "alpha gamma"),
            topic_msg("m4", "2024-01-01T00:03:00", "gamma beta"),
        ];

        let topics = extract_topics(&messages, options(10, 2, 3)).expect("valid options");
        let labels: Vec<&str> = topics.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["beta", "alpha", "gamma"]);

        let limited = extract_topics(&messages, options(1, 2, 3)).expect("valid options");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].label, "beta");
    }

    #[test]
    fn anchors_keep_earliest_samples() {
        let messages = vec![
            topic_msg("m3", "2024-01-03T00:00:00", "deploy"),
            topic_msg("m1", "2024-01-01T00:00:00", "deploy"),
            topic_msg("m2", "2024-01-02T00:00:00", "deploy"),
        ];

        let topics = extract_topics(&messages, options(10, 1, 2)).expect("valid options");
        let anchor_ids: Vec<&str> = topics[0].anchors.iter().map(|a| a.msg_id.as_str()).collect();
        assert_eq!(anchor_ids, vec!["m1", "m2"]);
        // first_seen follows input order, not timestamp order.
        assert_eq!(topics[0].first_seen_ts.as_deref(), Some("2024-01-03T00:00:00"));
    }

    #[test]
    fn long_anchor_text_is_trimmed() {
        let long_text = format!("  {} tail", "word ".repeat(80));
        let messages = vec![topic_msg("m1", "2024-01-01T00:00:00", &long_text)];

        let topics = extract_topics(&messages, options(10, 1, 3)).expect("valid options");
        let preview = &topics[0].anchors[0].text;
        assert!(preview.ends_with('…'));
        assert!(preview.chars().count() <= ANCHOR_PREVIEW_CHARS + 1);
        assert!(!preview.starts_with(' '));
        assert!(!preview.trim_end_matches('…').ends_with(' '));
    }

    #[test]
    fn empty_input_yields_no_topics() {
        let topics = extract_topics(&[], TopicOptions::default()).expect("valid options");
        assert!(topics.is_empty());
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let messages = vec![topic_msg("m1", "2024-01-01T00:00:00", "quantum")];

        assert_eq!(
            extract_topics(&messages, options(0, 2, 3)),
            Err(IntelligenceError::InvalidArgument {
                name: "limit",
                value: 0
            })
        );
        assert!(matches!(
            extract_topics(&messages, options(10, 0, 3)),
            Err(IntelligenceError::InvalidArgument {
                name: "min_occurrences",
                ..
            })
        ));
        assert!(matches!(
            extract_topics(&[], options(10, 2, 0)),
            Err(IntelligenceError::InvalidArgument {
                name: "sample_limit",
                ..
            })
        ));
    }

    #[test]
    fn messages_without_text_still_count_toward_weight() {
        let mut silent = topic_msg("m2", "2024-01-01T00:01:00", "");
        silent.text = None;
        let messages = vec![
            topic_msg("m1", "2024-01-01T00:00:00", "kernel"),
            silent,
            topic_msg("m3", "2024-01-01T00:02:00", "kernel"),
            topic_msg("m4", "2024-01-01T00:03:00", "lunch"),
        ];

        let topics = extract_topics(&messages, options(10, 2, 3)).expect("valid options");
        assert_eq!(topics.len(), 1);
        assert!((topics[0].weight - 0.5).abs() < 1e-9);
    }
}
