use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::traits::MemoryStore;
use crate::types::{Conversation, MemoryEntry, Message, Personality, Role};

use super::DEFAULT_SETTINGS;

/// Set restrictive file permissions (0600) on the database and WAL files.
fn set_db_file_permissions(db_path: &str) {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::Permissions::from_mode(0o600);
    if let Err(e) = std::fs::set_permissions(db_path, mode.clone()) {
        warn!("Failed to set permissions on {}: {}", db_path, e);
    }
    for suffix in &["-wal", "-shm"] {
        let path = format!("{}{}", db_path, suffix);
        if std::path::Path::new(&path).exists() {
            if let Err(e) = std::fs::set_permissions(&path, mode.clone()) {
                warn!("Failed to set permissions on {}: {}", path, e);
            }
        }
    }
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub struct SqliteMemoryStore {
    pool: SqlitePool,
}

impl SqliteMemoryStore {
    pub async fn new(db_path: &str) -> Result<Self, CoreError> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CoreError::storage(format!(
                        "cannot create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        // Owner-only read/write on the database files
        set_db_file_permissions(db_path);

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                personality_id TEXT NOT NULL,
                title TEXT NOT NULL,
                summary TEXT
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                screenshot_path TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY(conversation_id) REFERENCES conversations(id)
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS personalities (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                system_prompt TEXT NOT NULL,
                traits TEXT NOT NULL,
                color TEXT NOT NULL,
                avatar TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS memory_entries (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                importance INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY(conversation_id) REFERENCES conversations(id)
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id, created_at)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memory_entries_conversation
             ON memory_entries(conversation_id)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Seed the default personality catalog and settings. `INSERT OR
    /// IGNORE` keeps user edits: seeding again never overwrites.
    pub async fn seed_defaults(&self) -> Result<(), CoreError> {
        let mut seeded = 0u32;
        for personality in default_personalities() {
            let traits_json = serde_json::to_string(&personality.traits)
                .map_err(|e| CoreError::storage(format!("cannot encode traits: {}", e)))?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO personalities
                 (id, name, description, system_prompt, traits, color, avatar, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&personality.id)
            .bind(&personality.name)
            .bind(&personality.description)
            .bind(&personality.system_prompt)
            .bind(&traits_json)
            .bind(&personality.color)
            .bind(&personality.avatar)
            .bind(personality.created_at.to_rfc3339())
            .bind(personality.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
            seeded += result.rows_affected() as u32;
        }

        for (key, value) in DEFAULT_SETTINGS {
            sqlx::query(
                "INSERT OR IGNORE INTO settings (key, value, updated_at) VALUES (?, ?, ?)",
            )
            .bind(key)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        }

        if seeded > 0 {
            debug!(seeded, "Seeded default personalities");
        }
        Ok(())
    }

    fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Conversation {
        let created: String = row.get("created_at");
        let updated: String = row.get("updated_at");
        Conversation {
            id: row.get("id"),
            created_at: parse_ts(&created),
            updated_at: parse_ts(&updated),
            personality_id: row.get("personality_id"),
            title: row.get("title"),
            summary: row.get("summary"),
        }
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, CoreError> {
        let role_raw: String = row.get("role");
        let created: String = row.get("created_at");
        Ok(Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            role: Role::parse(&role_raw)?,
            content: row.get("content"),
            screenshot_path: row.get("screenshot_path"),
            created_at: parse_ts(&created),
        })
    }

    fn row_to_personality(row: &sqlx::sqlite::SqliteRow) -> Personality {
        let traits_raw: String = row.get("traits");
        let created: String = row.get("created_at");
        let updated: String = row.get("updated_at");
        Personality {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            system_prompt: row.get("system_prompt"),
            traits: serde_json::from_str(&traits_raw).unwrap_or_default(),
            color: row.get("color"),
            avatar: row.get("avatar"),
            created_at: parse_ts(&created),
            updated_at: parse_ts(&updated),
        }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> MemoryEntry {
        let created: String = row.get("created_at");
        MemoryEntry {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            key: row.get("key"),
            value: row.get("value"),
            importance: row.get("importance"),
            created_at: parse_ts(&created),
        }
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn create_conversation(
        &self,
        personality_id: &str,
        title: &str,
    ) -> Result<Conversation, CoreError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            personality_id: personality_id.to_string(),
            title: title.to_string(),
            summary: None,
        };

        sqlx::query(
            "INSERT INTO conversations (id, created_at, updated_at, personality_id, title, summary)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.id)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .bind(&conversation.personality_id)
        .bind(&conversation.title)
        .bind(&conversation.summary)
        .execute(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, CoreError> {
        let row = sqlx::query(
            "SELECT id, created_at, updated_at, personality_id, title, summary
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_conversation))
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, created_at, updated_at, personality_id, title, summary
             FROM conversations ORDER BY updated_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_conversation).collect())
    }

    async fn touch_conversation(
        &self,
        id: &str,
        summary: Option<&str>,
    ) -> Result<(), CoreError> {
        let now = Utc::now().to_rfc3339();
        let result = match summary {
            Some(summary) => {
                sqlx::query("UPDATE conversations SET updated_at = ?, summary = ? WHERE id = ?")
                    .bind(&now)
                    .bind(summary)
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
                    .bind(&now)
                    .bind(id)
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(CoreError::constraint(format!(
                "conversation '{}' does not exist",
                id
            )));
        }
        Ok(())
    }

    async fn append_message(&self, msg: &Message) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, screenshot_path, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.conversation_id)
        .bind(msg.role.as_str())
        .bind(&msg.content)
        .bind(&msg.screenshot_path)
        .bind(msg.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(
            conversation_id = %msg.conversation_id,
            role = msg.role.as_str(),
            msg_id = %msg.id,
            "append_message"
        );
        Ok(())
    }

    async fn get_history(&self, conversation_id: &str) -> Result<Vec<Message>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, screenshot_path, created_at
             FROM messages WHERE conversation_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            messages.push(Self::row_to_message(row)?);
        }
        Ok(messages)
    }

    async fn get_personality(&self, id: &str) -> Result<Option<Personality>, CoreError> {
        let row = sqlx::query(
            "SELECT id, name, description, system_prompt, traits, color, avatar,
                    created_at, updated_at
             FROM personalities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_personality))
    }

    async fn list_personalities(&self) -> Result<Vec<Personality>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, name, description, system_prompt, traits, color, avatar,
                    created_at, updated_at
             FROM personalities ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_personality).collect())
    }

    async fn upsert_personality(&self, personality: &Personality) -> Result<(), CoreError> {
        let traits_json = serde_json::to_string(&personality.traits)
            .map_err(|e| CoreError::storage(format!("cannot encode traits: {}", e)))?;

        sqlx::query(
            "INSERT INTO personalities
             (id, name, description, system_prompt, traits, color, avatar, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                system_prompt = excluded.system_prompt,
                traits = excluded.traits,
                color = excluded.color,
                avatar = excluded.avatar,
                updated_at = excluded.updated_at",
        )
        .bind(&personality.id)
        .bind(&personality.name)
        .bind(&personality.description)
        .bind(&personality.system_prompt)
        .bind(&traits_json)
        .bind(&personality.color)
        .bind(&personality.avatar)
        .bind(personality.created_at.to_rfc3339())
        .bind(personality.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_memory_entry(&self, entry: &MemoryEntry) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO memory_entries (id, conversation_id, key, value, importance, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.conversation_id)
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(entry.importance)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_memory_entries(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<MemoryEntry>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, key, value, importance, created_at
             FROM memory_entries WHERE conversation_id = ?
             ORDER BY importance DESC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_entry).collect())
    }

    async fn prune_memory_entries(&self, cap: u64) -> Result<u64, CoreError> {
        // The excess is computed inside the DELETE; a separate count could
        // race a concurrent append. MAX(.., 0) keeps the LIMIT non-negative,
        // which SQLite would otherwise read as unlimited.
        let result = sqlx::query(
            "DELETE FROM memory_entries WHERE id IN (
                SELECT id FROM memory_entries
                ORDER BY importance ASC, rowid ASC
                LIMIT (SELECT MAX(COUNT(*) - ?, 0) FROM memory_entries)
            )",
        )
        .bind(cap as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn upsert_setting(&self, key: &str, value: &str) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>, CoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }
}

/// The fixed catalog shipped with the app. Seeded at first start-up;
/// free-standing records afterwards.
pub fn default_personalities() -> Vec<Personality> {
    let now = Utc::now();
    let entry = |id: &str,
                 name: &str,
                 description: &str,
                 system_prompt: &str,
                 traits: &[&str],
                 color: &str,
                 avatar: &str| Personality {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        system_prompt: system_prompt.to_string(),
        traits: traits.iter().map(|t| t.to_string()).collect(),
        color: color.to_string(),
        avatar: avatar.to_string(),
        created_at: now,
        updated_at: now,
    };

    vec![
        entry(
            "optimist",
            "Optimist",
            "Always sees the bright side of things",
            "You are the Optimist, a companion who always sees the bright side. \
             Be positive, encouraging, and enthusiastic in every reply.",
            &["positive", "encouraging", "enthusiastic"],
            "#FFD700",
            "🌟",
        ),
        entry(
            "listener",
            "Listener",
            "Thoughtful and empathetic companion",
            "You are the Listener, a thoughtful and empathetic companion. \
             Be supportive and understanding, and ask gentle follow-up questions.",
            &["empathetic", "supportive", "understanding"],
            "#87CEEB",
            "👂",
        ),
        entry(
            "creator",
            "Creator",
            "Imaginative and playful",
            "You are the Creator, an imaginative and playful companion. \
             Offer inventive ideas and think out loud in images.",
            &["creative", "playful", "imaginative"],
            "#FF69B4",
            "🎨",
        ),
        entry(
            "sage",
            "Sage",
            "Wise and thoughtful advice",
            "You are the Sage, a wise and measured advisor. \
             Give thoughtful, analytical advice and explain your reasoning.",
            &["wise", "thoughtful", "analytical"],
            "#9370DB",
            "🧙",
        ),
    ]
}
