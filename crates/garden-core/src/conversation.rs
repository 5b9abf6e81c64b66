use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_OWNER_ID: &str = "default";
pub const DEFAULT_ROLE: &str = "user";
pub const DEFAULT_SOURCE: &str = "chatgpt_export";

/// Canonical, post-normalization message record. Field names are the store
/// contract and must not change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub conv_id: String,
    pub msg_id: String,
    #[serde(default = "default_owner_id")]
    pub owner_id: String,
    pub role: String,
    pub ts: String,
    pub text: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub hash: String,
    #[serde(default)]
    pub meta: MessageMeta,
}

impl Message {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            conv_id: self.conv_id.clone(),
            msg_id: self.msg_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageMeta {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_source")]
    pub source: String,
}

impl Default for MessageMeta {
    fn default() -> Self {
        Self {
            model: None,
            source: DEFAULT_SOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub conv_id: String,
    pub title: String,
    pub owner_id: String,
    /// Set by the store on first insert.
    #[serde(default)]
    pub created_at: Option<String>,
}

/// `<conv_id>/<msg_id>` pair used by callers that address messages across
/// conversations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageRef {
    pub conv_id: String,
    pub msg_id: String,
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.conv_id, self.msg_id)
    }
}

impl FromStr for MessageRef {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let Some((conv_id, msg_id)) = input.split_once('/') else {
            return Err(format!(
                "message identifier must be in the form '<conversation>/<message>': {input}"
            ));
        };
        if conv_id.is_empty() || msg_id.is_empty() {
            return Err(format!(
                "message identifier has an empty conversation or message part: {input}"
            ));
        }
        Ok(Self {
            conv_id: conv_id.to_string(),
            msg_id: msg_id.to_string(),
        })
    }
}

/// A message as it appears in an export. Every field is optional; export
/// formats drift and the normalizer substitutes defaults for anything absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub author: Option<RawAuthor>,
    #[serde(default)]
    pub content: Option<RawContent>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub create_time: Option<RawTimestamp>,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub parent: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: Option<RawMetadata>,
    #[serde(default)]
    pub source: Option<String>,
}

impl RawMessage {
    /// Builds a raw message from an arbitrary JSON value. Non-object values
    /// and fields with unexpected types degrade to an empty message rather
    /// than failing.
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value::<RawMessage>(value.clone()).unwrap_or_else(|_| {
            let Some(object) = value.as_object() else {
                return RawMessage::default();
            };
            // Retry field by field so a single malformed field does not
            // discard the rest of the payload.
            let mut raw = RawMessage::default();
            for (key, field) in object {
                let single = serde_json::json!({ key: field });
                if let Ok(partial) = serde_json::from_value::<RawMessage>(single) {
                    raw.merge(partial);
                }
            }
            raw
        })
    }

    fn merge(&mut self, other: RawMessage) {
        self.id = self.id.take().or(other.id);
        self.role = self.role.take().or(other.role);
        self.author = self.author.take().or(other.author);
        self.content = self.content.take().or(other.content);
        self.text = self.text.take().or(other.text);
        self.create_time = self.create_time.take().or(other.create_time);
        self.timestamp = self.timestamp.take().or(other.timestamp);
        self.parent = self.parent.take().or(other.parent);
        self.model = self.model.take().or(other.model);
        self.metadata = self.metadata.take().or(other.metadata);
        self.source = self.source.take().or(other.source);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawAuthor {
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawMetadata {
    #[serde(default)]
    pub model_slug: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawContent {
    Parts { parts: Vec<Value> },
    Text(String),
    Other(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

impl RawTimestamp {
    /// Zero epochs and blank strings count as absent.
    pub fn is_present(&self) -> bool {
        match self {
            RawTimestamp::Epoch(secs) => *secs != 0.0 && secs.is_finite(),
            RawTimestamp::Text(text) => !text.trim().is_empty(),
        }
    }
}

fn default_owner_id() -> String {
    DEFAULT_OWNER_ID.to_string()
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

/// Deserialize an optional ID that can be either a string or a number.
fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Option<Value> = Option::deserialize(deserializer)?;
    match val {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(serde::de::Error::custom("expected string or number for id")),
    }
}
