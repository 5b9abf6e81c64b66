use chrono::Utc;
use garden_core::conversation::{Conversation, Message, MessageMeta, MessageRef};
use garden_core::normalization::iso_timestamp;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

pub const MESSAGE_STORE_SCHEMA_VERSION: i64 = 2;
pub const SEARCH_SNIPPET_CHARS: usize = 400;

const MESSAGE_COLUMNS: &str =
    "conv_id, msg_id, owner_id, role, ts, text, parent_id, hash, meta_json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conv_id: String,
    pub title: String,
    pub owner_id: String,
    pub message_count: u64,
    pub first_message_ts: Option<String>,
    pub last_message_ts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationPage {
    pub items: Vec<ConversationSummary>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationStats {
    pub conv_id: String,
    pub message_count: u64,
    pub participant_roles: Vec<String>,
    pub first_message_ts: Option<String>,
    pub last_message_ts: Option<String>,
    pub average_message_length: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub conv_id: String,
    pub msg_id: String,
    pub role: String,
    pub ts: String,
    pub snippet: String,
    /// Negated bm25 rank; higher is more relevant.
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchFilters {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub conv_id: Option<String>,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
}

/// Inclusive timestamp window over stored messages. Bounds compare as
/// strings against the stored ISO-8601 `ts`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageWindow {
    pub conv_id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub limit: usize,
}

pub struct MessageStore {
    conn: Connection,
}

impl MessageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > MESSAGE_STORE_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: MESSAGE_STORE_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_messages.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_message_search.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 2", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    /// Creates the conversation or, if it exists, replaces its title. Owner
    /// and creation time are fixed by the first insert.
    pub fn upsert_conversation(&self, conversation: &Conversation) -> Result<(), StorageError> {
        let created_at = conversation
            .created_at
            .clone()
            .unwrap_or_else(|| iso_timestamp(Utc::now()));

        self.conn.execute(
            "
            INSERT INTO conversations (conv_id, title, owner_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(conv_id) DO UPDATE SET title = excluded.title
            ",
            params![
                conversation.conv_id,
                conversation.title,
                conversation.owner_id,
                created_at,
            ],
        )?;
        Ok(())
    }

    pub fn conversation(&self, conv_id: &str) -> Result<Option<Conversation>, StorageError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT conv_id, title, owner_id, created_at
                FROM conversations
                WHERE conv_id = ?1
                ",
                [conv_id],
                |row| {
                    Ok(Conversation {
                        conv_id: row.get(0)?,
                        title: row.get(1)?,
                        owner_id: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Returns `false` when `(conv_id, msg_id)` is already stored; the
    /// existing row is left untouched.
    pub fn insert_message(&self, message: &Message) -> Result<bool, StorageError> {
        insert_message_on(&self.conn, message)
    }

    /// Inserts all messages in one transaction and reports, per message,
    /// whether it was new.
    pub fn insert_messages(&self, messages: &[Message]) -> Result<Vec<bool>, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = Vec::with_capacity(messages.len());
        for message in messages {
            inserted.push(insert_message_on(&tx, message)?);
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn has_message(&self, conv_id: &str, msg_id: &str) -> Result<bool, StorageError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM messages WHERE conv_id = ?1 AND msg_id = ?2 LIMIT 1",
                [conv_id, msg_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn message_count(&self, conv_id: &str) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conv_id = ?1",
            [conv_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Messages whose content hash equals `hash`, in insertion order.
    pub fn message_refs_with_hash(&self, hash: &str) -> Result<Vec<MessageRef>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT conv_id, msg_id
            FROM messages
            WHERE hash = ?1
            ORDER BY seq ASC
            ",
        )?;
        let rows = statement.query_map([hash], |row| {
            Ok(MessageRef {
                conv_id: row.get(0)?,
                msg_id: row.get(1)?,
            })
        })?;

        let mut refs = Vec::new();
        for row in rows {
            refs.push(row?);
        }
        Ok(refs)
    }

    /// All messages of a conversation in insertion order.
    pub fn messages_for_conversation(&self, conv_id: &str) -> Result<Vec<Message>, StorageError> {
        self.query_messages(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE conv_id = ?1 ORDER BY seq ASC"),
            vec![Value::from(conv_id.to_string())],
        )
    }

    /// All messages of a conversation, oldest first.
    pub fn timeline(&self, conv_id: &str) -> Result<Vec<Message>, StorageError> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conv_id = ?1 ORDER BY ts ASC, seq ASC"
            ),
            vec![Value::from(conv_id.to_string())],
        )
    }

    /// Looks up each exact `(conv_id, msg_id)` pair. Unknown refs are
    /// skipped and repeated refs collapse; the result is ordered by `ts`.
    pub fn messages_by_refs(&self, refs: &[MessageRef]) -> Result<Vec<Message>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "SELECT seq, {MESSAGE_COLUMNS} FROM messages WHERE conv_id = ?1 AND msg_id = ?2"
        ))?;

        let mut seen = BTreeSet::new();
        let mut found: Vec<(i64, Message)> = Vec::new();
        for message_ref in refs {
            let row = statement
                .query_row([&message_ref.conv_id, &message_ref.msg_id], |row| {
                    let seq: i64 = row.get(0)?;
                    Ok((seq, message_from_row(row, 1)?))
                })
                .optional()?;
            if let Some((seq, message)) = row {
                if seen.insert(seq) {
                    found.push((seq, message));
                }
            }
        }

        found.sort_by(|(left_seq, left), (right_seq, right)| {
            left.ts.cmp(&right.ts).then(left_seq.cmp(right_seq))
        });
        Ok(found.into_iter().map(|(_, message)| message).collect())
    }

    /// Oldest-first messages inside `window`, at most `window.limit` rows.
    pub fn messages_in_window(&self, window: &MessageWindow) -> Result<Vec<Message>, StorageError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        push_filter(&mut clauses, &mut values, "conv_id = ?", window.conv_id.as_deref());
        push_filter(&mut clauses, &mut values, "ts >= ?", window.date_from.as_deref());
        push_filter(&mut clauses, &mut values, "ts <= ?", window.date_to.as_deref());
        values.push(Value::from(window.limit as i64));

        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages {} ORDER BY ts ASC, seq ASC LIMIT ?",
                where_clause(&clauses)
            ),
            values,
        )
    }

    /// Conversations with message counts, most recently active first.
    pub fn list_conversations(
        &self,
        owner_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<ConversationPage, StorageError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        push_filter(&mut clauses, &mut values, "c.owner_id = ?", owner_id);
        let filter = where_clause(&clauses);

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM conversations c {filter}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        values.push(Value::from(limit as i64));
        values.push(Value::from(offset as i64));
        let mut statement = self.conn.prepare(&format!(
            "
            SELECT
                c.conv_id,
                c.title,
                c.owner_id,
                COUNT(m.msg_id) AS message_count,
                MIN(m.ts) AS first_message_ts,
                MAX(m.ts) AS last_message_ts
            FROM conversations c
            LEFT JOIN messages m ON m.conv_id = c.conv_id
            {filter}
            GROUP BY c.conv_id, c.title, c.owner_id
            ORDER BY last_message_ts DESC NULLS LAST, c.title ASC
            LIMIT ? OFFSET ?
            "
        ))?;
        let rows = statement.query_map(params_from_iter(values.iter()), |row| {
            Ok(ConversationSummary {
                conv_id: row.get(0)?,
                title: row.get(1)?,
                owner_id: row.get(2)?,
                message_count: row.get::<_, i64>(3)? as u64,
                first_message_ts: row.get(4)?,
                last_message_ts: row.get(5)?,
            })
        })?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(ConversationPage {
            items,
            total: total as u64,
            limit,
            offset,
        })
    }

    /// `None` when the conversation has no stored messages.
    pub fn conversation_stats(
        &self,
        conv_id: &str,
    ) -> Result<Option<ConversationStats>, StorageError> {
        let (message_count, first_message_ts, last_message_ts, average_message_length): (
            i64,
            Option<String>,
            Option<String>,
            f64,
        ) = self.conn.query_row(
            "
            SELECT COUNT(*), MIN(ts), MAX(ts), COALESCE(AVG(LENGTH(text)), 0.0)
            FROM messages
            WHERE conv_id = ?1
            ",
            [conv_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        if message_count == 0 {
            return Ok(None);
        }

        let mut statement = self.conn.prepare(
            "
            SELECT DISTINCT role
            FROM messages
            WHERE conv_id = ?1 AND role <> ''
            ORDER BY role ASC
            ",
        )?;
        let rows = statement.query_map([conv_id], |row| row.get::<_, String>(0))?;
        let mut participant_roles = Vec::new();
        for row in rows {
            participant_roles.push(row?);
        }

        Ok(Some(ConversationStats {
            conv_id: conv_id.to_string(),
            message_count: message_count as u64,
            participant_roles,
            first_message_ts,
            last_message_ts,
            average_message_length,
        }))
    }

    /// Full-text search matching any of `terms`, best matches first.
    pub fn search(
        &self,
        terms: &[String],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, StorageError> {
        let Some(match_query) = fts_match_query(terms) else {
            return Ok(Vec::new());
        };

        let mut clauses = vec!["messages_fts MATCH ?".to_string()];
        let mut values = vec![Value::from(match_query)];
        push_filter(&mut clauses, &mut values, "m.role = ?", filters.role.as_deref());
        push_filter(&mut clauses, &mut values, "m.conv_id = ?", filters.conv_id.as_deref());
        push_filter(&mut clauses, &mut values, "m.ts >= ?", filters.date_from.as_deref());
        push_filter(&mut clauses, &mut values, "m.ts <= ?", filters.date_to.as_deref());
        values.push(Value::from(limit as i64));

        let mut statement = self.conn.prepare(&format!(
            "
            SELECT
                m.conv_id,
                m.msg_id,
                m.role,
                m.ts,
                substr(m.text, 1, {SEARCH_SNIPPET_CHARS}) AS snippet,
                -bm25(messages_fts) AS score
            FROM messages_fts
            JOIN messages m ON m.seq = messages_fts.rowid
            {}
            ORDER BY score DESC, m.ts ASC
            LIMIT ?
            ",
            where_clause(&clauses)
        ))?;
        let rows = statement.query_map(params_from_iter(values.iter()), |row| {
            Ok(SearchHit {
                conv_id: row.get(0)?,
                msg_id: row.get(1)?,
                role: row.get(2)?,
                ts: row.get(3)?,
                snippet: row.get(4)?,
                score: row.get(5)?,
            })
        })?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn query_messages(&self, sql: &str, values: Vec<Value>) -> Result<Vec<Message>, StorageError> {
        let mut statement = self.conn.prepare(sql)?;
        let rows = statement.query_map(params_from_iter(values.iter()), |row| {
            message_from_row(row, 0)
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn insert_message_on(conn: &Connection, message: &Message) -> Result<bool, StorageError> {
    let meta_json = serde_json::to_string(&message.meta)
        .map_err(|err| StorageError::Serialization(err.to_string()))?;

    let changes = conn.execute(
        "
        INSERT OR IGNORE INTO messages (
            conv_id,
            msg_id,
            owner_id,
            role,
            ts,
            text,
            parent_id,
            hash,
            meta_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ",
        params![
            message.conv_id,
            message.msg_id,
            message.owner_id,
            message.role,
            message.ts,
            message.text,
            message.parent_id,
            message.hash,
            meta_json,
        ],
    )?;

    Ok(changes > 0)
}

/// Reads `MESSAGE_COLUMNS` starting at column `offset`.
fn message_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Message> {
    let meta_json: String = row.get(offset + 8)?;
    let meta: MessageMeta = serde_json::from_str(&meta_json).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            offset + 8,
            rusqlite::types::Type::Text,
            Box::new(err),
        )
    })?;

    Ok(Message {
        conv_id: row.get(offset)?,
        msg_id: row.get(offset + 1)?,
        owner_id: row.get(offset + 2)?,
        role: row.get(offset + 3)?,
        ts: row.get(offset + 4)?,
        text: row.get(offset + 5)?,
        parent_id: row.get(offset + 6)?,
        hash: row.get(offset + 7)?,
        meta,
    })
}

fn push_filter(
    clauses: &mut Vec<String>,
    values: &mut Vec<Value>,
    clause: &str,
    value: Option<&str>,
) {
    if let Some(value) = value.filter(|value| !value.is_empty()) {
        clauses.push(clause.to_string());
        values.push(Value::from(value.to_string()));
    }
}

fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

/// Quotes each term as an FTS5 string and ORs them together.
fn fts_match_query(terms: &[String]) -> Option<String> {
    let quoted: Vec<String> = terms
        .iter()
        .map(|term| term.trim())
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();
    if quoted.is_empty() {
        None
    } else {
        Some(quoted.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn conversation(conv_id: &str, title: &str, owner_id: &str) -> Conversation {
        Conversation {
            conv_id: conv_id.to_string(),
            title: title.to_string(),
            owner_id: owner_id.to_string(),
            created_at: None,
        }
    }

    fn message(conv_id: &str, msg_id: &str, role: &str, ts: &str, text: &str) -> Message {
        Message {
            conv_id: conv_id.to_string(),
            msg_id: msg_id.to_string(),
            owner_id: "default".to_string(),
            role: role.to_string(),
            ts: ts.to_string(),
            text: text.to_string(),
            parent_id: None,
            hash: garden_core::normalization::content_hash(text),
            meta: MessageMeta::default(),
        }
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.msg_id.as_str()).collect()
    }

    #[test]
    fn migration_creates_message_tables() {
        let db = MessageStore::open_in_memory().expect("open db");

        for table in ["conversations", "messages", "messages_fts"] {
            assert!(db.table_exists(table).expect("table check"), "{table}");
        }
        assert_eq!(
            db.schema_version().expect("schema version"),
            MESSAGE_STORE_SCHEMA_VERSION
        );
    }

    #[test]
    fn reopening_file_store_keeps_rows_and_schema() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let db = MessageStore::open(file.path()).expect("open db");
            db.upsert_conversation(&conversation("c1", "First", "default"))
                .expect("upsert");
            assert!(db
                .insert_message(&message("c1", "m1", "user", "2024-01-01T00:00:00", "hi"))
                .expect("insert"));
        }

        let reopened = MessageStore::open(file.path()).expect("reopen db");
        assert_eq!(
            reopened.schema_version().expect("schema version"),
            MESSAGE_STORE_SCHEMA_VERSION
        );
        assert!(reopened.has_message("c1", "m1").expect("has message"));
    }

    #[test]
    fn newer_schema_is_rejected() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let conn = Connection::open(file.path()).expect("open raw");
            conn.execute("PRAGMA user_version = 99", [])
                .expect("bump version");
        }

        let err = MessageStore::open(file.path())
            .err()
            .expect("future schema must fail");
        assert!(matches!(
            err,
            StorageError::UnsupportedSchemaVersion { found: 99, .. }
        ));
    }

    #[test]
    fn upsert_updates_title_but_keeps_owner() {
        let db = MessageStore::open_in_memory().expect("open db");
        db.upsert_conversation(&conversation("c1", "Old", "alice"))
            .expect("insert");
        db.upsert_conversation(&conversation("c1", "New", "bob"))
            .expect("update");

        let stored = db.conversation("c1").expect("query").expect("exists");
        assert_eq!(stored.title, "New");
        assert_eq!(stored.owner_id, "alice");
        assert!(stored.created_at.is_some());
        assert!(db.conversation("missing").expect("query").is_none());
    }

    #[test]
    fn duplicate_message_insert_is_ignored() {
        let db = MessageStore::open_in_memory().expect("open db");
        let first = message("c1", "m1", "user", "2024-01-01T00:00:00", "original");
        let mut replay = first.clone();
        replay.text = "changed".to_string();

        assert!(db.insert_message(&first).expect("insert"));
        assert!(!db.insert_message(&replay).expect("idempotent insert"));
        assert_eq!(db.message_count("c1").expect("count"), 1);

        let stored = db.messages_for_conversation("c1").expect("messages");
        assert_eq!(stored[0].text, "original");
    }

    #[test]
    fn batch_insert_reports_new_rows() {
        let db = MessageStore::open_in_memory().expect("open db");
        db.insert_message(&message("c1", "m1", "user", "2024-01-01T00:00:00", "a"))
            .expect("seed");

        let inserted = db
            .insert_messages(&[
                message("c1", "m1", "user", "2024-01-01T00:00:00", "a"),
                message("c1", "m2", "assistant", "2024-01-01T00:01:00", "b"),
            ])
            .expect("batch insert");
        assert_eq!(inserted, vec![false, true]);
        assert_eq!(db.message_count("c1").expect("count"), 2);
    }

    #[test]
    fn message_round_trip_keeps_meta_and_parent() {
        let db = MessageStore::open_in_memory().expect("open db");
        let mut stored = message("c1", "m2", "assistant", "2024-01-01T00:01:00", "reply");
        stored.parent_id = Some("m1".to_string());
        stored.owner_id = "alice".to_string();
        stored.meta = MessageMeta {
            model: Some("gpt-4o".to_string()),
            source: "chatgpt_export".to_string(),
        };
        db.insert_message(&stored).expect("insert");

        let loaded = db.messages_for_conversation("c1").expect("messages");
        assert_eq!(loaded, vec![stored]);
    }

    #[test]
    fn timeline_orders_by_ts_and_conversation_keeps_insertion_order() {
        let db = MessageStore::open_in_memory().expect("open db");
        db.insert_messages(&[
            message("c1", "late", "user", "2024-01-02T00:00:00", "b"),
            message("c1", "early", "user", "2024-01-01T00:00:00", "a"),
            message("c2", "other", "user", "2024-01-01T12:00:00", "c"),
        ])
        .expect("insert");

        assert_eq!(
            ids(&db.messages_for_conversation("c1").expect("messages")),
            vec!["late", "early"]
        );
        assert_eq!(ids(&db.timeline("c1").expect("timeline")), vec!["early", "late"]);
    }

    #[test]
    fn hash_lookup_finds_identical_bodies() {
        let db = MessageStore::open_in_memory().expect("open db");
        db.insert_messages(&[
            message("c1", "m1", "user", "2024-01-01T00:00:00", "Same Body"),
            message("c2", "m9", "user", "2024-01-02T00:00:00", "same body  "),
            message("c2", "m10", "user", "2024-01-02T00:00:00", "different"),
        ])
        .expect("insert");

        let refs = db
            .message_refs_with_hash(&garden_core::normalization::content_hash("same body"))
            .expect("hash lookup");
        let rendered: Vec<String> = refs.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["c1/m1", "c2/m9"]);
    }

    #[test]
    fn refs_match_exact_pairs_only() {
        let db = MessageStore::open_in_memory().expect("open db");
        db.insert_messages(&[
            message("c1", "m1", "user", "2024-01-03T00:00:00", "a"),
            message("c1", "m2", "user", "2024-01-01T00:00:00", "b"),
            message("c2", "m1", "user", "2024-01-02T00:00:00", "c"),
            message("c2", "m2", "user", "2024-01-04T00:00:00", "d"),
        ])
        .expect("insert");

        let refs: Vec<MessageRef> = ["c1/m1", "c2/m1", "c1/m1", "c9/m9"]
            .iter()
            .map(|value| value.parse().expect("valid ref"))
            .collect();
        let found = db.messages_by_refs(&refs).expect("lookup");
        let rendered: Vec<String> = found.iter().map(|m| m.message_ref().to_string()).collect();
        assert_eq!(rendered, vec!["c2/m1", "c1/m1"]);
    }

    #[test]
    fn window_filters_and_limits() {
        let db = MessageStore::open_in_memory().expect("open db");
        db.insert_messages(&[
            message("c1", "m1", "user", "2024-01-01T00:00:00+00:00", "a"),
            message("c1", "m2", "user", "2024-01-02T00:00:00+00:00", "b"),
            message("c2", "m3", "user", "2024-01-03T00:00:00+00:00", "c"),
            message("c1", "m4", "user", "2024-01-04T00:00:00+00:00", "d"),
        ])
        .expect("insert");

        let all = db
            .messages_in_window(&MessageWindow {
                limit: 10,
                ..MessageWindow::default()
            })
            .expect("window");
        assert_eq!(ids(&all), vec!["m1", "m2", "m3", "m4"]);

        let bounded = db
            .messages_in_window(&MessageWindow {
                conv_id: Some("c1".to_string()),
                date_from: Some("2024-01-02".to_string()),
                date_to: Some("2024-01-05".to_string()),
                limit: 1,
            })
            .expect("window");
        assert_eq!(ids(&bounded), vec!["m2"]);
    }

    #[test]
    fn conversations_page_by_recent_activity() {
        let db = MessageStore::open_in_memory().expect("open db");
        db.upsert_conversation(&conversation("c1", "Alpha", "alice"))
            .expect("c1");
        db.upsert_conversation(&conversation("c2", "Beta", "alice"))
            .expect("c2");
        db.upsert_conversation(&conversation("c3", "Empty", "alice"))
            .expect("c3");
        db.upsert_conversation(&conversation("c4", "Other", "bob"))
            .expect("c4");
        db.insert_messages(&[
            message("c1", "m1", "user", "2024-01-01T00:00:00", "a"),
            message("c2", "m2", "user", "2024-02-01T00:00:00", "b"),
            message("c2", "m3", "user", "2024-02-02T00:00:00", "c"),
        ])
        .expect("insert");

        let page = db
            .list_conversations(Some("alice"), 10, 0)
            .expect("list conversations");
        assert_eq!(page.total, 3);
        let order: Vec<&str> = page.items.iter().map(|c| c.conv_id.as_str()).collect();
        assert_eq!(order, vec!["c2", "c1", "c3"]);
        assert_eq!(page.items[0].message_count, 2);
        assert_eq!(
            page.items[0].last_message_ts.as_deref(),
            Some("2024-02-02T00:00:00")
        );
        assert_eq!(page.items[2].message_count, 0);
        assert_eq!(page.items[2].first_message_ts, None);

        let second = db.list_conversations(None, 2, 2).expect("page two");
        assert_eq!(second.total, 4);
        assert_eq!(second.items.len(), 2);
    }

    #[test]
    fn stats_aggregate_roles_and_lengths() {
        let db = MessageStore::open_in_memory().expect("open db");
        db.insert_messages(&[
            message("c1", "m1", "user", "2024-01-01T00:00:00", "abcd"),
            message("c1", "m2", "assistant", "2024-01-01T00:01:00", "ab"),
            message("c1", "m3", "user", "2024-01-01T00:02:00", "abcdef"),
        ])
        .expect("insert");

        let stats = db
            .conversation_stats("c1")
            .expect("stats")
            .expect("non-empty conversation");
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.participant_roles, vec!["assistant", "user"]);
        assert_eq!(stats.first_message_ts.as_deref(), Some("2024-01-01T00:00:00"));
        assert_eq!(stats.last_message_ts.as_deref(), Some("2024-01-01T00:02:00"));
        assert!((stats.average_message_length - 4.0).abs() < 1e-9);

        assert!(db.conversation_stats("empty").expect("stats").is_none());
    }

    #[test]
    fn search_ranks_matches_and_applies_filters() {
        let db = MessageStore::open_in_memory().expect("open db");
        db.insert_messages(&[
            message("c1", "m1", "user", "2024-01-01T00:00:00", "rust rust rust borrow checker"),
            message("c1", "m2", "assistant", "2024-01-01T00:01:00", "rust is a language about many other things entirely"),
            message("c2", "m3", "user", "2024-01-02T00:00:00", "python scripting"),
        ])
        .expect("insert");

        let terms = vec!["rust".to_string()];
        let hits = db
            .search(&terms, &SearchFilters::default(), 10)
            .expect("search");
        let hit_ids: Vec<&str> = hits.iter().map(|h| h.msg_id.as_str()).collect();
        assert_eq!(hit_ids, vec!["m1", "m2"]);
        assert!(hits[0].score >= hits[1].score);

        let assistant_only = db
            .search(
                &terms,
                &SearchFilters {
                    role: Some("assistant".to_string()),
                    ..SearchFilters::default()
                },
                10,
            )
            .expect("filtered search");
        assert_eq!(assistant_only.len(), 1);
        assert_eq!(assistant_only[0].msg_id, "m2");

        let either = db
            .search(
                &["python".to_string(), "borrow".to_string()],
                &SearchFilters::default(),
                10,
            )
            .expect("or search");
        assert_eq!(either.len(), 2);

        assert!(db
            .search(&[], &SearchFilters::default(), 10)
            .expect("empty search")
            .is_empty());
    }

    #[test]
    fn search_snippet_is_bounded_and_quotes_are_safe() {
        let db = MessageStore::open_in_memory().expect("open db");
        let long_text = format!("needle {}", "x".repeat(1000));
        db.insert_message(&message("c1", "m1", "user", "2024-01-01T00:00:00", &long_text))
            .expect("insert");

        let hits = db
            .search(&["needle".to_string()], &SearchFilters::default(), 5)
            .expect("search");
        assert_eq!(hits[0].snippet.chars().count(), SEARCH_SNIPPET_CHARS);

        let quoted = db
            .search(&["ne\"edle".to_string()], &SearchFilters::default(), 5)
            .expect("quoted term search");
        assert!(quoted.is_empty());
    }
}
