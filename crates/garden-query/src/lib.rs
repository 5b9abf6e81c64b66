//! Query runtime over a `MessageStore`: loads rows, validates request bounds
//! and hands the data to the pure functions in `garden-core`.

mod requests;

pub use requests::{
    ContextPackRequest, SearchRequest, SearchResponse, SearchResult, TopicMap, TopicMapRequest,
};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use garden_core::context_pack::{build_pack, ContextPack, PackMessage};
use garden_core::conversation::{Message, MessageRef};
use garden_core::search_terms::{
    build_highlights, parse_search_terms, DEFAULT_HIGHLIGHT_LIMIT, DEFAULT_HIGHLIGHT_WINDOW,
};
use garden_core::threads::{build_thread, ThreadView};
use garden_core::tokenizer::{TiktokenTokenizer, Tokenize, TokenizerError};
use garden_core::topics::{extract_topics, TopicMessage, TopicOptions};
use garden_core::IntelligenceError;
use garden_storage::{
    ConversationPage, ConversationStats, MessageStore, MessageWindow, StorageError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Intelligence(#[from] IntelligenceError),
    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("conversation not found or empty: {0}")]
    ConversationNotFound(String),
}

/// Defaults and upper bounds applied to incoming requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_thread_depth: usize,
    pub max_thread_depth: usize,
    pub default_topic_limit: usize,
    pub max_topic_limit: usize,
    pub default_min_occurrences: usize,
    pub max_min_occurrences: usize,
    pub default_sample_limit: usize,
    pub max_sample_limit: usize,
    pub default_max_messages: usize,
    pub min_max_messages: usize,
    pub max_max_messages: usize,
    pub default_pack_tokens: usize,
    pub max_pack_tokens: usize,
    pub default_model: String,
    pub default_search_limit: usize,
    pub max_search_limit: usize,
    pub max_page_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_thread_depth: 3,
            max_thread_depth: 10,
            default_topic_limit: 10,
            max_topic_limit: 50,
            default_min_occurrences: 2,
            max_min_occurrences: 20,
            default_sample_limit: 3,
            max_sample_limit: 5,
            default_max_messages: 5_000,
            min_max_messages: 10,
            max_max_messages: 20_000,
            default_pack_tokens: 6_000,
            max_pack_tokens: 16_384,
            default_model: "gpt-4".to_string(),
            default_search_limit: 50,
            max_search_limit: 500,
            max_page_size: 500,
        }
    }
}

pub struct ConversationQueries {
    config: QueryConfig,
}

impl ConversationQueries {
    pub fn new(config: QueryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Thread around `msg_id`; `depth` defaults to the configured depth.
    pub fn thread(
        &self,
        store: &MessageStore,
        conv_id: &str,
        msg_id: &str,
        depth: Option<usize>,
    ) -> Result<ThreadView, QueryError> {
        let depth = bounded(
            "depth",
            depth.unwrap_or(self.config.default_thread_depth),
            1..=self.config.max_thread_depth,
        )?;

        let messages = store.messages_for_conversation(conv_id)?;
        if messages.is_empty() {
            return Err(QueryError::ConversationNotFound(conv_id.to_string()));
        }
        debug!(conv_id, msg_id, depth, messages = messages.len(), "building thread");
        Ok(build_thread(&messages, msg_id, depth)?)
    }

    pub fn topic_map(
        &self,
        store: &MessageStore,
        request: &TopicMapRequest,
    ) -> Result<TopicMap, QueryError> {
        let config = &self.config;
        let options = TopicOptions {
            limit: bounded(
                "limit",
                request.limit.unwrap_or(config.default_topic_limit),
                1..=config.max_topic_limit,
            )?,
            min_occurrences: bounded(
                "min_occurrences",
                request
                    .min_occurrences
                    .unwrap_or(config.default_min_occurrences),
                1..=config.max_min_occurrences,
            )?,
            sample_limit: bounded(
                "sample_limit",
                request.sample_limit.unwrap_or(config.default_sample_limit),
                1..=config.max_sample_limit,
            )?,
        };
        let max_messages = bounded(
            "max_messages",
            request.max_messages.unwrap_or(config.default_max_messages),
            config.min_max_messages..=config.max_max_messages,
        )?;
        let date_from = normalize_iso(request.date_from.as_deref())?;
        let date_to = normalize_iso(request.date_to.as_deref())?;

        let rows = store.messages_in_window(&MessageWindow {
            conv_id: request.conv_id.clone(),
            date_from: date_from.clone(),
            date_to: date_to.clone(),
            limit: max_messages,
        })?;
        if rows.is_empty() {
            return Ok(TopicMap {
                topics: Vec::new(),
                total_messages: 0,
                distinct_conversations: 0,
                window_start: date_from,
                window_end: date_to,
            });
        }

        let topic_messages: Vec<TopicMessage> = rows.iter().map(TopicMessage::from).collect();
        let topics = extract_topics(&topic_messages, options)?;
        let distinct_conversations = rows
            .iter()
            .map(|row| row.conv_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        debug!(
            scanned = rows.len(),
            topics = topics.len(),
            distinct_conversations,
            "built topic map"
        );

        Ok(TopicMap {
            topics,
            total_messages: rows.len(),
            distinct_conversations,
            window_start: rows.first().map(|row| row.ts.clone()),
            window_end: rows.last().map(|row| row.ts.clone()),
        })
    }

    /// Packs the requested messages using the tiktoken encoding for the
    /// requested model, or `cl100k_base` when the model is unknown.
    pub fn context_pack(
        &self,
        store: &MessageStore,
        request: &ContextPackRequest,
    ) -> Result<ContextPack, QueryError> {
        let (refs, max_tokens) = self.validate_pack_request(request)?;
        if refs.is_empty() {
            return Ok(ContextPack::default());
        }

        let model = request
            .model
            .as_deref()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(&self.config.default_model);
        let tokenizer = TiktokenTokenizer::for_model(model)?;
        debug!(model, encoding = %tokenizer.source(), "resolved pack tokenizer");

        self.pack_refs(store, &refs, max_tokens, &tokenizer)
    }

    /// Same as `context_pack` but with a caller-supplied tokenizer; the
    /// request's `model` is ignored.
    pub fn context_pack_with<T>(
        &self,
        store: &MessageStore,
        request: &ContextPackRequest,
        tokenizer: &T,
    ) -> Result<ContextPack, QueryError>
    where
        T: Tokenize + ?Sized,
    {
        let (refs, max_tokens) = self.validate_pack_request(request)?;
        if refs.is_empty() {
            return Ok(ContextPack::default());
        }
        self.pack_refs(store, &refs, max_tokens, tokenizer)
    }

    pub fn search(
        &self,
        store: &MessageStore,
        request: &SearchRequest,
    ) -> Result<SearchResponse, QueryError> {
        let terms = parse_search_terms(&request.query);
        if terms.is_empty() {
            return Err(QueryError::InvalidRequest(
                "search query must contain at least one term".to_string(),
            ));
        }
        let limit = bounded(
            "limit",
            request.limit.unwrap_or(self.config.default_search_limit),
            1..=self.config.max_search_limit,
        )?;
        let mut filters = request.filters.clone();
        filters.date_from = normalize_iso(filters.date_from.as_deref())?;
        filters.date_to = normalize_iso(filters.date_to.as_deref())?;

        let hits = store.search(&terms, &filters, limit)?;
        debug!(terms = ?terms, hits = hits.len(), "search finished");

        let results: Vec<SearchResult> = hits
            .into_iter()
            .map(|hit| SearchResult {
                highlights: build_highlights(
                    &hit.snippet,
                    &terms,
                    DEFAULT_HIGHLIGHT_WINDOW,
                    DEFAULT_HIGHLIGHT_LIMIT,
                ),
                conv_id: hit.conv_id,
                msg_id: hit.msg_id,
                role: hit.role,
                ts: hit.ts,
                text: hit.snippet,
                score: hit.score,
            })
            .collect();
        Ok(SearchResponse {
            total: results.len(),
            results,
        })
    }

    pub fn timeline(&self, store: &MessageStore, conv_id: &str) -> Result<Vec<Message>, QueryError> {
        Ok(store.timeline(conv_id)?)
    }

    pub fn conversation_stats(
        &self,
        store: &MessageStore,
        conv_id: &str,
    ) -> Result<ConversationStats, QueryError> {
        store
            .conversation_stats(conv_id)?
            .ok_or_else(|| QueryError::ConversationNotFound(conv_id.to_string()))
    }

    pub fn list_conversations(
        &self,
        store: &MessageStore,
        owner_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<ConversationPage, QueryError> {
        let limit = bounded("limit", limit, 1..=self.config.max_page_size)?;
        Ok(store.list_conversations(owner_id, limit, offset)?)
    }

    fn validate_pack_request(
        &self,
        request: &ContextPackRequest,
    ) -> Result<(Vec<MessageRef>, usize), QueryError> {
        let max_tokens = bounded(
            "max_tokens",
            request.max_tokens.unwrap_or(self.config.default_pack_tokens),
            1..=self.config.max_pack_tokens,
        )?;
        let refs = request
            .message_ids
            .iter()
            .map(|id| id.parse::<MessageRef>().map_err(QueryError::InvalidRequest))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((refs, max_tokens))
    }

    fn pack_refs<T>(
        &self,
        store: &MessageStore,
        refs: &[MessageRef],
        max_tokens: usize,
        tokenizer: &T,
    ) -> Result<ContextPack, QueryError>
    where
        T: Tokenize + ?Sized,
    {
        let messages = store.messages_by_refs(refs)?;
        let pack_messages: Vec<PackMessage> = messages.iter().map(PackMessage::from).collect();
        let pack = build_pack(&pack_messages, max_tokens, tokenizer)?;
        debug!(
            requested = refs.len(),
            found = messages.len(),
            packed = pack.message_count,
            tokens = pack.token_count,
            "built context pack"
        );
        Ok(pack)
    }
}

fn bounded(
    name: &str,
    value: usize,
    range: RangeInclusive<usize>,
) -> Result<usize, QueryError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(QueryError::InvalidRequest(format!(
            "{name} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        )))
    }
}

/// Accepts RFC 3339 timestamps, naive `YYYY-MM-DDTHH:MM:SS[.f]` and bare
/// dates. A trailing `Z` is rewritten to `+00:00` to match stored values;
/// blank input means "no bound".
pub fn normalize_iso(value: Option<&str>) -> Result<Option<String>, QueryError> {
    let Some(candidate) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let candidate = match candidate.strip_suffix('Z') {
        Some(prefix) => format!("{prefix}+00:00"),
        None => candidate.to_string(),
    };

    let valid = DateTime::parse_from_rfc3339(&candidate).is_ok()
        || NaiveDateTime::parse_from_str(&candidate, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(&candidate, "%Y-%m-%dT%H:%M").is_ok()
        || NaiveDate::parse_from_str(&candidate, "%Y-%m-%d").is_ok();
    if !valid {
        return Err(QueryError::InvalidRequest(format!(
            "invalid ISO timestamp: {}",
            value.unwrap_or_default()
        )));
    }
    Ok(Some(candidate))
}
