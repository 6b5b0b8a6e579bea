//! SQLite storage layer for keepsake.
//!
//! Owns the durable record of direct messages and the projection of user
//! identities fed by the identity provider. Handles schema creation and the
//! primitive operations the conversation aggregator and read-state
//! reconciler are built on.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};

/// Default upper bound on message content, in Unicode scalar values.
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 2000;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Reasons a message is rejected before it reaches the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyContent,
    ContentTooLong { max: usize, actual: usize },
    SelfMessage,
    MissingPartner,
    UnknownReceiver(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyContent => write!(f, "content cannot be empty"),
            ValidationError::ContentTooLong { max, actual } => {
                write!(f, "content is {actual} characters; the limit is {max}")
            }
            ValidationError::SelfMessage => write!(f, "cannot send a message to yourself"),
            ValidationError::MissingPartner => write!(f, "a conversation partner is required"),
            ValidationError::UnknownReceiver(id) => write!(f, "receiver {id} does not exist"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    Invalid(ValidationError),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StorageError::Io(e) => write!(f, "io error: {e}"),
            StorageError::Invalid(e) => write!(f, "invalid message: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

impl From<ValidationError> for StorageError {
    fn from(e: ValidationError) -> Self {
        StorageError::Invalid(e)
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A single direct message.
///
/// `seq` is the store's insertion sequence; it breaks ties between messages
/// created within the same millisecond and is the unit of read watermarks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub message_id: String,
    pub seq: i64,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    /// Milliseconds since the UNIX epoch. Never decreases across appends.
    pub created_at: u64,
    pub is_read: bool,
}

impl MessageRow {
    /// The other participant, seen from `viewer_id`.
    pub fn partner_of(&self, viewer_id: &str) -> &str {
        if self.sender_id == viewer_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// User identity as published by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub user_id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub updated_at: u64,
}

/// Highest message sequence committed at the instant it was taken.
///
/// A mark-read scoped by a watermark only touches messages that already
/// existed when the watermark was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadWatermark(i64);

impl ReadWatermark {
    pub fn seq(&self) -> i64 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

const MESSAGE_COLUMNS: &str =
    "message_id, seq, sender_id, receiver_id, content, created_at, is_read";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        message_id: row.get(0)?,
        seq: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
        is_read: row.get::<_, i32>(6)? != 0,
    })
}

/// Main storage handle wrapping a SQLite connection.
pub struct Storage {
    conn: Connection,
    max_content_chars: usize,
}

impl Storage {
    /// Open or create a database at the given path. Creates schema if needed.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=2000;")?;
        let storage = Self {
            conn,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
        };
        storage.create_schema()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
        };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Override the content length bound enforced by [`Storage::append`].
    pub fn with_max_content_chars(mut self, max: usize) -> Self {
        self.max_content_chars = max;
        self
    }

    pub fn max_content_chars(&self) -> usize {
        self.max_content_chars
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id      TEXT NOT NULL UNIQUE,
                sender_id       TEXT NOT NULL,
                receiver_id     TEXT NOT NULL,
                content         TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                is_read         INTEGER NOT NULL DEFAULT 0,
                CHECK (sender_id <> receiver_id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_sender
                ON messages(sender_id, seq);
            CREATE INDEX IF NOT EXISTS idx_messages_receiver
                ON messages(receiver_id, seq);
            CREATE INDEX IF NOT EXISTS idx_messages_unread
                ON messages(receiver_id, sender_id, is_read);

            CREATE TABLE IF NOT EXISTS users (
                user_id     TEXT PRIMARY KEY,
                username    TEXT NOT NULL,
                full_name   TEXT,
                avatar_url  TEXT,
                updated_at  INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Persist a new unread message from `sender_id` to `receiver_id`,
    /// timestamped with the current time.
    pub fn append(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<MessageRow, StorageError> {
        self.append_at(sender_id, receiver_id, content, now_millis())
    }

    /// Like [`Storage::append`] with an explicit clock reading. `created_at`
    /// is clamped so it never precedes the newest message already stored.
    pub fn append_at(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        now_ms: u64,
    ) -> Result<MessageRow, StorageError> {
        validate_message(sender_id, receiver_id, content, self.max_content_chars)?;

        let tx = self.conn.unchecked_transaction()?;
        let latest: Option<i64> =
            tx.query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))?;
        let created_at = now_ms.max(latest.unwrap_or(0) as u64);
        let message_id = new_message_id();

        tx.execute(
            "INSERT INTO messages (message_id, sender_id, receiver_id, content, created_at, is_read)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![message_id, sender_id, receiver_id, content, created_at as i64],
        )?;
        let seq = tx.last_insert_rowid();
        tx.commit()?;

        Ok(MessageRow {
            message_id,
            seq,
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            created_at,
            is_read: false,
        })
    }

    pub fn get_message(&self, message_id: &str) -> Result<Option<MessageRow>, StorageError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![message_id], message_from_row)
            .optional()?;
        Ok(row)
    }

    /// Every message exchanged between the pair, oldest first.
    pub fn list_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Vec<MessageRow>, StorageError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, seq ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_a, user_b], message_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Every message the user sent or received, in insertion order.
    pub fn messages_involving(&self, user_id: &str) -> Result<Vec<MessageRow>, StorageError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE sender_id = ?1 OR receiver_id = ?1
             ORDER BY seq ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], message_from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn count_unread(&self, receiver_id: &str) -> Result<u32, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND is_read = 0",
            params![receiver_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    pub fn count_unread_from(&self, receiver_id: &str, sender_id: &str) -> Result<u32, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
            params![receiver_id, sender_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    // -----------------------------------------------------------------------
    // Read state
    // -----------------------------------------------------------------------

    pub fn read_watermark(&self) -> Result<ReadWatermark, StorageError> {
        let seq: Option<i64> =
            self.conn
                .query_row("SELECT MAX(seq) FROM messages", [], |row| row.get(0))?;
        Ok(ReadWatermark(seq.unwrap_or(0)))
    }

    /// Flip `is_read` on unread messages from `sender_id` to `receiver_id`
    /// that were committed at or before `watermark`.
    ///
    /// The predicate is evaluated by SQLite at write time, so messages that
    /// are already read are never counted twice and messages appended after
    /// the watermark stay unread.
    pub fn mark_read_up_to(
        &self,
        receiver_id: &str,
        sender_id: &str,
        watermark: ReadWatermark,
    ) -> Result<u32, StorageError> {
        let affected = self.conn.execute(
            "UPDATE messages SET is_read = 1
             WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0 AND seq <= ?3",
            params![receiver_id, sender_id, watermark.0],
        )?;
        Ok(affected as u32)
    }

    /// Mark every message from `sender_id` to `receiver_id` that is unread
    /// right now as read. Returns how many flipped; a second consecutive call
    /// returns 0.
    pub fn mark_read(&self, receiver_id: &str, sender_id: &str) -> Result<u32, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let seq: Option<i64> = tx.query_row("SELECT MAX(seq) FROM messages", [], |row| row.get(0))?;
        let affected = tx.execute(
            "UPDATE messages SET is_read = 1
             WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0 AND seq <= ?3",
            params![receiver_id, sender_id, seq.unwrap_or(0)],
        )?;
        tx.commit()?;
        Ok(affected as u32)
    }

    /// Mark every unread message addressed to `receiver_id` up to `watermark`.
    pub fn mark_all_read_up_to(
        &self,
        receiver_id: &str,
        watermark: ReadWatermark,
    ) -> Result<u32, StorageError> {
        let affected = self.conn.execute(
            "UPDATE messages SET is_read = 1
             WHERE receiver_id = ?1 AND is_read = 0 AND seq <= ?2",
            params![receiver_id, watermark.0],
        )?;
        Ok(affected as u32)
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub fn upsert_user(&self, row: &UserRow) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO users (user_id, username, full_name, avatar_url, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                full_name = excluded.full_name,
                avatar_url = excluded.avatar_url,
                updated_at = excluded.updated_at",
            params![
                row.user_id,
                row.username,
                row.full_name,
                row.avatar_url,
                row.updated_at as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<UserRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, username, full_name, avatar_url, updated_at
                 FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserRow {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        full_name: row.get(2)?,
                        avatar_url: row.get(3)?,
                        updated_at: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn has_user(&self, user_id: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM users WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Check the shape of a message without touching the database.
pub fn validate_message(
    sender_id: &str,
    receiver_id: &str,
    content: &str,
    max_content_chars: usize,
) -> Result<(), ValidationError> {
    if receiver_id.trim().is_empty() {
        return Err(ValidationError::MissingPartner);
    }
    if sender_id == receiver_id {
        return Err(ValidationError::SelfMessage);
    }
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    let actual = content.chars().count();
    if actual > max_content_chars {
        return Err(ValidationError::ContentTooLong {
            max: max_content_chars,
            actual,
        });
    }
    Ok(())
}

fn new_message_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Current time as milliseconds since UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Resolve the database path: `{data_dir}/keepsake.db`.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("keepsake.db")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
