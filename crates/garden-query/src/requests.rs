use garden_core::topics::TopicBundle;
use garden_storage::SearchFilters;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicMapRequest {
    /// Inclusive ISO-8601 lower bound.
    #[serde(default)]
    pub date_from: Option<String>,
    /// Inclusive ISO-8601 upper bound.
    #[serde(default)]
    pub date_to: Option<String>,
    #[serde(default)]
    pub conv_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub min_occurrences: Option<usize>,
    #[serde(default)]
    pub sample_limit: Option<usize>,
    #[serde(default)]
    pub max_messages: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicMap {
    pub topics: Vec<TopicBundle>,
    pub total_messages: usize,
    pub distinct_conversations: usize,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextPackRequest {
    /// `<conv_id>/<msg_id>` identifiers.
    #[serde(default)]
    pub message_ids: Vec<String>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub filters: SearchFilters,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub conv_id: String,
    pub msg_id: String,
    pub role: String,
    pub ts: String,
    pub text: String,
    pub score: f64,
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: usize,
}
