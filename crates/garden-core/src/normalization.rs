use crate::conversation::{
    Message, MessageMeta, RawContent, RawMessage, RawTimestamp, DEFAULT_ROLE, DEFAULT_SOURCE,
};
use crate::redaction::redact;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const MSG_ID_HASH_PREFIX_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOptions {
    pub enable_pii: bool,
    /// Used when the message carries no timestamp of its own, typically the
    /// owning conversation's `create_time`.
    pub fallback_ts: Option<RawTimestamp>,
    /// Clock used as the last resort; `None` reads the system clock.
    pub now: Option<DateTime<Utc>>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            enable_pii: true,
            fallback_ts: None,
            now: None,
        }
    }
}

impl NormalizeOptions {
    pub fn with_pii(enable_pii: bool) -> Self {
        Self {
            enable_pii,
            ..Self::default()
        }
    }
}

/// Converts an export message into the canonical record. Never fails: every
/// missing or malformed field resolves to its documented default.
///
/// The dedup hash is taken over the lower-cased, trimmed text *before*
/// redaction, so identical bodies hash identically whatever the PII setting.
pub fn normalize_message(
    raw: &RawMessage,
    conv_id: &str,
    owner_id: &str,
    options: &NormalizeOptions,
) -> Message {
    let source_text = extract_text(raw);
    let hash = content_hash(&source_text);
    let text = redact(Some(&source_text), options.enable_pii);

    let msg_id = non_blank(raw.id.as_deref())
        .map(ToString::to_string)
        .unwrap_or_else(|| hash[..MSG_ID_HASH_PREFIX_LEN].to_string());

    let role = non_blank(raw.role.as_deref())
        .or_else(|| {
            raw.author
                .as_ref()
                .and_then(|author| non_blank(author.role.as_deref()))
        })
        .unwrap_or(DEFAULT_ROLE)
        .to_string();

    let ts = [
        raw.create_time.as_ref(),
        raw.timestamp.as_ref(),
        options.fallback_ts.as_ref(),
    ]
    .into_iter()
    .flatten()
    .filter(|candidate| candidate.is_present())
    .find_map(timestamp_to_iso)
    .unwrap_or_else(|| iso_timestamp(options.now.unwrap_or_else(Utc::now)));

    let model = non_blank(raw.model.as_deref())
        .or_else(|| {
            raw.metadata
                .as_ref()
                .and_then(|metadata| non_blank(metadata.model_slug.as_deref()))
        })
        .map(ToString::to_string);
    let source = non_blank(raw.source.as_deref())
        .unwrap_or(DEFAULT_SOURCE)
        .to_string();

    Message {
        conv_id: conv_id.to_string(),
        msg_id,
        owner_id: owner_id.to_string(),
        role,
        ts,
        text,
        parent_id: raw.parent.clone(),
        hash,
        meta: MessageMeta { model, source },
    }
}

/// Pulls the message body out of whichever shape the export used:
/// `content.parts`, then a string `content`, then `text`.
pub fn extract_text(raw: &RawMessage) -> String {
    match raw.content.as_ref() {
        Some(RawContent::Parts { parts }) => parts
            .iter()
            .filter_map(Value::as_str)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Some(RawContent::Text(text)) => text.clone(),
        Some(RawContent::Other(Value::Null)) | None => raw.text.clone().unwrap_or_default(),
        Some(RawContent::Other(other)) => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// SHA-256 of the canonicalized (lower-cased, trimmed) text.
pub fn content_hash(text: &str) -> String {
    sha256_hex(text.to_lowercase().trim().as_bytes())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// ISO-8601 rendering matching the store's existing rows: UTC offset as
/// `+00:00`, microseconds only when non-zero.
pub fn iso_timestamp(ts: DateTime<Utc>) -> String {
    if ts.timestamp_subsec_micros() == 0 {
        ts.to_rfc3339_opts(SecondsFormat::Secs, false)
    } else {
        ts.to_rfc3339_opts(SecondsFormat::Micros, false)
    }
}

fn timestamp_to_iso(raw: &RawTimestamp) -> Option<String> {
    match raw {
        RawTimestamp::Epoch(secs) => {
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1_000_000_000.0).round() as u32;
            let (whole, nanos) = if nanos >= 1_000_000_000 {
                (whole + 1.0, 0)
            } else {
                (whole, nanos)
            };
            DateTime::<Utc>::from_timestamp(whole as i64, nanos).map(iso_timestamp)
        }
        RawTimestamp::Text(text) => Some(text.trim().to_string()),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}
