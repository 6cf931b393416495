use crate::error::{CoroError, Result};
use crate::thread::Role;
use anyhow::Context;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::{Path, PathBuf};

pub mod types;
pub use types::{ConversationHandle, HistoryEntry, SavedConversation, SavedResponse, StoredSession};

/// Durable conversation storage used by the turn coordinator
///
/// The coordinator calls `save` once for the first settled turn of a
/// conversation and `update` with the returned handle afterwards.
pub trait PersistenceGateway: Send + Sync {
    /// Insert a new record and return its handle
    fn save(&self, conversation: &SavedConversation) -> Result<ConversationHandle>;

    /// Replace the contents of an existing record
    fn update(&self, handle: &ConversationHandle, conversation: &SavedConversation) -> Result<()>;

    /// Load a record by full id or 8-character prefix
    fn load(&self, id: &str) -> Result<Option<SavedConversation>>;

    /// Delete a record by full id or 8-character prefix
    fn delete(&self, id: &str) -> Result<()>;

    /// List records, most recently updated first
    fn list(&self) -> Result<Vec<StoredSession>>;
}

/// SQLite-backed conversation storage
pub struct SqliteStorage {
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Create a new storage instance
    ///
    /// Uses `CORO_HISTORY_DB` when set, otherwise `history.db` in the user's
    /// data directory.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("CORO_HISTORY_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("dev", "coro", "coro")
            .ok_or_else(|| CoroError::Storage("Could not determine data directory".into()))?;

        Self::new_with_path(proj_dirs.data_dir().join("history.db"))
    }

    /// Create a storage instance at an explicit path, or the default location
    pub fn open(db_path: Option<&str>) -> Result<Self> {
        match db_path {
            Some(path) => Self::new_with_path(path),
            None => Self::new(),
        }
    }

    /// Create a new storage instance that uses the specified database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use coro::storage::SqliteStorage;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = SqliteStorage::new_with_path(dir.path().join("history.db")).unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| CoroError::Storage(e.to_string()))?;
        }

        let storage = Self { db_path };
        storage.init()?;
        Ok(storage)
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| CoroError::Storage(e.to_string()).into())
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                prompt TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                total_latency_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS responses (
                conversation_id TEXT NOT NULL,
                backend_id TEXT NOT NULL,
                text TEXT NOT NULL,
                token_count INTEGER,
                latency_ms INTEGER NOT NULL,
                error_message TEXT
            );
            CREATE TABLE IF NOT EXISTS history (
                conversation_id TEXT NOT NULL,
                backend_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                order_index INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_responses_conversation ON responses(conversation_id);
            CREATE INDEX IF NOT EXISTS idx_history_conversation ON history(conversation_id);",
        )
        .context("Failed to create tables")
        .map_err(|e| CoroError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Resolve a full id or prefix to a stored id
    fn resolve_id(conn: &Connection, id: &str) -> Result<Option<String>> {
        let (query, param) = if id.len() == 36 {
            ("SELECT id FROM conversations WHERE id = ?", id.to_string())
        } else {
            (
                "SELECT id FROM conversations WHERE id LIKE ? ORDER BY updated_at DESC LIMIT 1",
                format!("{}%", id),
            )
        };

        conn.query_row(query, params![param], |row| row.get(0))
            .optional()
            .context("Failed to query conversation")
            .map_err(|e| CoroError::Storage(e.to_string()).into())
    }

    fn write_children(tx: &Transaction<'_>, id: &str, conversation: &SavedConversation) -> Result<()> {
        for response in &conversation.responses {
            tx.execute(
                "INSERT INTO responses (conversation_id, backend_id, text, token_count, latency_ms, error_message)
                VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    response.backend_id,
                    response.text,
                    response.token_count,
                    response.latency_ms as i64,
                    response.error_message
                ],
            )
            .context("Failed to insert response")
            .map_err(|e| CoroError::Storage(e.to_string()))?;
        }

        for entry in &conversation.history {
            tx.execute(
                "INSERT INTO history (conversation_id, backend_id, role, content, order_index)
                VALUES (?, ?, ?, ?, ?)",
                params![
                    id,
                    entry.backend_id,
                    entry.role.as_str(),
                    entry.content,
                    entry.order_index
                ],
            )
            .context("Failed to insert history")
            .map_err(|e| CoroError::Storage(e.to_string()))?;
        }

        Ok(())
    }

    fn delete_children(tx: &Transaction<'_>, id: &str) -> Result<()> {
        tx.execute("DELETE FROM responses WHERE conversation_id = ?", params![id])
            .context("Failed to delete responses")
            .map_err(|e| CoroError::Storage(e.to_string()))?;
        tx.execute("DELETE FROM history WHERE conversation_id = ?", params![id])
            .context("Failed to delete history")
            .map_err(|e| CoroError::Storage(e.to_string()))?;
        Ok(())
    }
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl PersistenceGateway for SqliteStorage {
    fn save(&self, conversation: &SavedConversation) -> Result<ConversationHandle> {
        let mut conn = self.connect()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| CoroError::Storage(e.to_string()))?;

        tx.execute(
            "INSERT INTO conversations (id, prompt, timestamp, total_latency_ms, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id,
                conversation.prompt,
                conversation.timestamp.to_rfc3339(),
                conversation.total_latency_ms as i64,
                now,
                now
            ],
        )
        .context("Failed to insert conversation")
        .map_err(|e| CoroError::Storage(e.to_string()))?;

        Self::write_children(&tx, &id, conversation)?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| CoroError::Storage(e.to_string()))?;

        tracing::debug!(conversation.id = %id, "Saved conversation");
        Ok(ConversationHandle::new(id))
    }

    fn update(&self, handle: &ConversationHandle, conversation: &SavedConversation) -> Result<()> {
        let mut conn = self.connect()?;
        let now = Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| CoroError::Storage(e.to_string()))?;

        let changed = tx
            .execute(
                "UPDATE conversations SET
                    prompt = ?,
                    timestamp = ?,
                    total_latency_ms = ?,
                    updated_at = ?
                WHERE id = ?",
                params![
                    conversation.prompt,
                    conversation.timestamp.to_rfc3339(),
                    conversation.total_latency_ms as i64,
                    now,
                    handle.id()
                ],
            )
            .context("Failed to update conversation")
            .map_err(|e| CoroError::Storage(e.to_string()))?;

        if changed == 0 {
            return Err(
                CoroError::Storage(format!("Conversation {} does not exist", handle)).into(),
            );
        }

        Self::delete_children(&tx, handle.id())?;
        Self::write_children(&tx, handle.id(), conversation)?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| CoroError::Storage(e.to_string()))?;

        tracing::debug!(conversation.id = %handle, "Updated conversation");
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<SavedConversation>> {
        let conn = self.connect()?;
        let Some(id) = Self::resolve_id(&conn, id)? else {
            return Ok(None);
        };

        let (prompt, timestamp, total_latency_ms): (String, String, i64) = conn
            .query_row(
                "SELECT prompt, timestamp, total_latency_ms FROM conversations WHERE id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("Failed to query conversation")
            .map_err(|e| CoroError::Storage(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT backend_id, text, token_count, latency_ms, error_message
                FROM responses WHERE conversation_id = ? ORDER BY rowid",
            )
            .context("Failed to prepare statement")
            .map_err(|e| CoroError::Storage(e.to_string()))?;
        let responses = stmt
            .query_map(params![id], |row| {
                let latency: i64 = row.get(3)?;
                Ok(SavedResponse {
                    backend_id: row.get(0)?,
                    text: row.get(1)?,
                    token_count: row.get(2)?,
                    latency_ms: latency.max(0) as u64,
                    error_message: row.get(4)?,
                })
            })
            .context("Failed to query responses")
            .map_err(|e| CoroError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CoroError::Storage(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT backend_id, role, content, order_index
                FROM history WHERE conversation_id = ? ORDER BY backend_id, rowid",
            )
            .context("Failed to prepare statement")
            .map_err(|e| CoroError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })
            .context("Failed to query history")
            .map_err(|e| CoroError::Storage(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CoroError::Storage(e.to_string()))?;

        let mut history = Vec::with_capacity(rows.len());
        for (backend_id, role, content, order_index) in rows {
            let Some(role) = Role::parse_str(&role) else {
                tracing::warn!("Skipping history row with unknown role: {}", role);
                continue;
            };
            history.push(HistoryEntry {
                backend_id,
                role,
                content,
                order_index,
            });
        }

        Ok(Some(SavedConversation {
            id,
            prompt,
            timestamp: parse_time(&timestamp),
            total_latency_ms: total_latency_ms.max(0) as u64,
            responses,
            history,
        }))
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.connect()?;
        let Some(id) = Self::resolve_id(&conn, id)? else {
            return Ok(());
        };

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| CoroError::Storage(e.to_string()))?;
        Self::delete_children(&tx, &id)?;
        tx.execute("DELETE FROM conversations WHERE id = ?", params![id])
            .context("Failed to delete conversation")
            .map_err(|e| CoroError::Storage(e.to_string()))?;
        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| CoroError::Storage(e.to_string()))?;

        Ok(())
    }

    fn list(&self) -> Result<Vec<StoredSession>> {
        let conn = self.connect()?;

        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.prompt, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM responses r WHERE r.conversation_id = c.id),
                    (SELECT COUNT(*) FROM history h WHERE h.conversation_id = c.id)
                FROM conversations c
                ORDER BY c.updated_at DESC",
            )
            .context("Failed to prepare statement")
            .map_err(|e| CoroError::Storage(e.to_string()))?;

        let sessions_iter = stmt
            .query_map([], |row| {
                let created_at: String = row.get(2)?;
                let updated_at: String = row.get(3)?;
                let backend_count: i64 = row.get(4)?;
                let message_count: i64 = row.get(5)?;
                Ok(StoredSession {
                    id: row.get(0)?,
                    prompt: row.get(1)?,
                    created_at: parse_time(&created_at),
                    updated_at: parse_time(&updated_at),
                    backend_count: backend_count.max(0) as usize,
                    message_count: message_count.max(0) as usize,
                })
            })
            .context("Failed to query sessions")
            .map_err(|e| CoroError::Storage(e.to_string()))?;

        Ok(sessions_iter.flatten().collect())
    }
}
