//! Conversation intelligence: normalization, redaction, thread
//! reconstruction, topic extraction and token-budgeted context packs.
//!
//! Everything here is a pure function over in-memory records. Callers fetch
//! rows from the store and hand them in; nothing is retained between calls.

use thiserror::Error;

pub mod context_pack;
pub mod conversation;
pub mod normalization;
pub mod redaction;
pub mod search_terms;
pub mod threads;
pub mod tokenizer;
pub mod topics;

pub use context_pack::{build_pack, ContextPack, PackMessage};
pub use conversation::{Conversation, Message, MessageMeta, MessageRef, RawMessage};
pub use normalization::{normalize_message, NormalizeOptions};
pub use redaction::{redact, Redactor};
pub use threads::{build_thread, ThreadView};
pub use tokenizer::{EncodingSource, TiktokenTokenizer, Tokenize, TokenizerError};
pub use topics::{extract_topics, TopicBundle, TopicMessage, TopicOptions, TopicSample};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntelligenceError {
    #[error("{name} must be >= 1, got {value}")]
    InvalidArgument { name: &'static str, value: usize },
    #[error("message not found: {msg_id}")]
    NotFound { msg_id: String },
}
