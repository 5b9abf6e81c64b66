use garden_core::conversation::{
    Conversation, Message, MessageRef, RawMessage, RawTimestamp, DEFAULT_OWNER_ID,
};
use garden_core::normalization::{normalize_message, NormalizeOptions};
use garden_storage::{MessageStore, StorageError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

pub const CONVERSATIONS_ENTRY: &str = "conversations.json";
pub const DEFAULT_TITLE: &str = "Untitled";

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("archive has no {CONVERSATIONS_ENTRY}")]
    MissingConversations,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub owner_id: String,
    pub enable_pii: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            owner_id: DEFAULT_OWNER_ID.to_string(),
            enable_pii: true,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub conversations: usize,
    pub messages_seen: usize,
    pub messages_inserted: usize,
    /// Messages whose `(conv_id, msg_id)` was already stored.
    pub duplicate_messages: usize,
    /// Newly inserted messages whose content hash matches another stored
    /// message.
    pub duplicate_bodies: usize,
    pub skipped_conversations: usize,
}

/// Receives every newly stored message, e.g. to schedule embedding work.
pub trait EmbeddingQueue {
    fn enqueue(&self, message: &MessageRef);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEmbeddingQueue;

impl EmbeddingQueue for NoopEmbeddingQueue {
    fn enqueue(&self, _message: &MessageRef) {}
}

pub struct ChatGptImporter {
    options: ImportOptions,
}

impl ChatGptImporter {
    pub fn new(options: ImportOptions) -> Self {
        Self { options }
    }

    pub fn import_path(
        &self,
        store: &MessageStore,
        path: impl AsRef<Path>,
    ) -> Result<ImportReport, ImportError> {
        self.import_path_with_queue(store, path, &NoopEmbeddingQueue)
    }

    /// Imports a ChatGPT export: either the `.zip` archive or a bare
    /// `conversations.json`.
    pub fn import_path_with_queue(
        &self,
        store: &MessageStore,
        path: impl AsRef<Path>,
        queue: &dyn EmbeddingQueue,
    ) -> Result<ImportReport, ImportError> {
        let path = path.as_ref();
        info!(path = %path.display(), owner_id = %self.options.owner_id, "opening export");
        let bytes = fs::read(path)?;
        let conversations = read_conversations(bytes)?;
        self.import_conversations(store, &conversations, queue)
    }

    pub fn import_conversations(
        &self,
        store: &MessageStore,
        conversations: &[Value],
        queue: &dyn EmbeddingQueue,
    ) -> Result<ImportReport, ImportError> {
        let mut report = ImportReport::default();
        for (index, conversation) in conversations.iter().enumerate() {
            let Some(object) = conversation.as_object() else {
                warn!(index, "skipping conversation that is not a JSON object");
                report.skipped_conversations += 1;
                continue;
            };
            let Some(conv_id) = conversation_id(object) else {
                warn!(index, "skipping conversation without an id");
                report.skipped_conversations += 1;
                continue;
            };
            self.import_conversation(store, &conv_id, object, queue, &mut report)?;
        }

        info!(
            conversations = report.conversations,
            inserted = report.messages_inserted,
            duplicates = report.duplicate_messages,
            skipped = report.skipped_conversations,
            "import finished"
        );
        Ok(report)
    }

    fn import_conversation(
        &self,
        store: &MessageStore,
        conv_id: &str,
        object: &Map<String, Value>,
        queue: &dyn EmbeddingQueue,
        report: &mut ImportReport,
    ) -> Result<(), ImportError> {
        let title = object
            .get("title")
            .and_then(Value::as_str)
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(DEFAULT_TITLE);
        store.upsert_conversation(&Conversation {
            conv_id: conv_id.to_string(),
            title: title.to_string(),
            owner_id: self.options.owner_id.clone(),
            created_at: None,
        })?;
        report.conversations += 1;

        let options = NormalizeOptions {
            enable_pii: self.options.enable_pii,
            fallback_ts: conversation_fallback_ts(object),
            now: None,
        };

        let messages: Vec<Message> = object
            .get("mapping")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|mapping| mapping.iter())
            .filter_map(|(node_id, node)| raw_message_from_node(node_id, node))
            .map(|raw| normalize_message(&raw, conv_id, &self.options.owner_id, &options))
            .collect();
        report.messages_seen += messages.len();

        // Bodies stored before this batch; grows as the batch is walked so a
        // repeat within the conversation counts only from its second copy.
        let mut known_bodies: HashSet<&str> = HashSet::new();
        for message in &messages {
            if !known_bodies.contains(message.hash.as_str())
                && !store.message_refs_with_hash(&message.hash)?.is_empty()
            {
                known_bodies.insert(message.hash.as_str());
            }
        }

        let inserted = store.insert_messages(&messages)?;
        let mut new_in_conversation = 0;
        for (message, was_inserted) in messages.iter().zip(inserted) {
            if !was_inserted {
                report.duplicate_messages += 1;
                continue;
            }
            new_in_conversation += 1;
            if !known_bodies.insert(message.hash.as_str()) {
                report.duplicate_bodies += 1;
            }
            queue.enqueue(&message.message_ref());
        }
        report.messages_inserted += new_in_conversation;

        debug!(
            conv_id,
            title,
            seen = messages.len(),
            inserted = new_in_conversation,
            "imported conversation"
        );
        Ok(())
    }
}

fn read_conversations(bytes: Vec<u8>) -> Result<Vec<Value>, ImportError> {
    let json = if bytes.starts_with(ZIP_MAGIC) {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut entry = match archive.by_name(CONVERSATIONS_ENTRY) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Err(ImportError::MissingConversations),
            Err(err) => return Err(err.into()),
        };
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        contents
    } else {
        bytes
    };

    let parsed: Value = serde_json::from_slice(&json)
        .map_err(|err| ImportError::Serialization(err.to_string()))?;
    match parsed {
        Value::Array(conversations) => Ok(conversations),
        _ => Err(ImportError::Serialization(format!(
            "{CONVERSATIONS_ENTRY} must contain a JSON array"
        ))),
    }
}

fn conversation_id(object: &Map<String, Value>) -> Option<String> {
    ["id", "conversation_id"]
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| match value {
            Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
}

fn conversation_fallback_ts(object: &Map<String, Value>) -> Option<RawTimestamp> {
    ["create_time", "update_time"]
        .iter()
        .filter_map(|key| object.get(*key))
        .filter_map(|value| serde_json::from_value::<RawTimestamp>(value.clone()).ok())
        .find(RawTimestamp::is_present)
}

/// Mapping nodes without a `message` payload are structural (e.g. the
/// export's synthetic root) and carry nothing to store.
fn raw_message_from_node(node_id: &str, node: &Value) -> Option<RawMessage> {
    let payload = node.get("message").filter(|payload| !payload.is_null())?;
    let mut raw = RawMessage::from_value(payload);
    if raw.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
        raw.id = Some(node_id.to_string());
    }
    if raw.parent.is_none() {
        raw.parent = node
            .get("parent")
            .and_then(Value::as_str)
            .map(ToString::to_string);
    }
    Some(raw)
}
