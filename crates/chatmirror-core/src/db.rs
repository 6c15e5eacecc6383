//! Persistent store for mirrored chats, contacts, groups and messages.

use crate::error::{Error, Result};
use crate::jid;
use crate::migrations::{self, AppliedMigration};
use crate::models::*;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

type Query<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

const DEFAULT_LIMIT: i64 = 50;

/// Columns selected for every message query. Expects `messages m LEFT JOIN
/// chats c`.
const MESSAGE_COLUMNS: &str = r#"
    m.chat_jid AS chat_jid,
    COALESCE(NULLIF(c.name, ''), m.chat_name) AS chat_name,
    m.msg_id AS msg_id,
    m.sender_jid AS sender_jid,
    m.sender_name AS sender_name,
    m.ts AS ts,
    m.from_me AS from_me,
    m.text AS text,
    m.display_text AS display_text,
    m.media_type AS media_type,
    m.media_caption AS media_caption,
    m.filename AS filename,
    m.local_path AS local_path,
    m.reaction_to_id AS reaction_to_id,
    m.reaction_emoji AS reaction_emoji,
    m.reply_to_id AS reply_to_id,
    m.reply_to_display AS reply_to_display
"#;

/// Options for opening a store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Provision the FTS5 index. When false, or when FTS5 is unavailable,
    /// search uses case-insensitive substring matching.
    pub full_text: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { full_text: true }
    }
}

/// Store handle for chatmirror.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    fts_enabled: bool,
}

impl Store {
    /// Open or create a store at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, StoreOptions::default()).await
    }

    /// Open or create a store with explicit options.
    pub async fn open_with(path: &Path, options: StoreOptions) -> Result<Self> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        let connect = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect)
            .await?;

        let fts_enabled = migrations::run(&pool, options.full_text).await?;
        tracing::debug!(path = %path.display(), fts_enabled, "Opened store");

        Ok(Self { pool, fts_enabled })
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether search runs against the FTS5 index.
    pub fn has_search_index(&self) -> bool {
        self.fts_enabled
    }

    /// Migrations recorded in the ledger, oldest first.
    pub async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        migrations::applied(&self.pool).await
    }

    /// Close the store.
    pub async fn close(self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Chats
    // =========================================================================

    /// Upsert a chat. The kind is overwritten, an empty name never replaces a
    /// stored one, and the last-activity timestamp never moves backwards.
    pub async fn upsert_chat(
        &self,
        jid: &str,
        kind: ChatKind,
        name: &str,
        last_message_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chats (jid, kind, name, last_message_ts)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(jid) DO UPDATE SET
                kind = excluded.kind,
                name = CASE WHEN excluded.name IS NOT NULL AND excluded.name != ''
                            THEN excluded.name ELSE chats.name END,
                last_message_ts = CASE WHEN excluded.last_message_ts > COALESCE(chats.last_message_ts, 0)
                                       THEN excluded.last_message_ts ELSE chats.last_message_ts END
            "#,
        )
        .bind(jid)
        .bind(kind.as_str())
        .bind(null_if_empty(name))
        .bind(unix(last_message_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a chat by identifier.
    pub async fn get_chat(&self, jid: &str) -> Result<Option<Chat>> {
        let row = sqlx::query("SELECT * FROM chats WHERE jid = ?")
            .bind(jid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(chat_from_row))
    }

    /// List chats by recent activity, optionally filtered by name or id.
    pub async fn list_chats(&self, query: Option<&str>, limit: Option<i64>) -> Result<Vec<Chat>> {
        let mut sql = String::from("SELECT * FROM chats WHERE 1=1");
        let needle = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{q}%"));

        if needle.is_some() {
            sql.push_str(" AND (LOWER(COALESCE(name, '')) LIKE LOWER(?) OR LOWER(jid) LIKE LOWER(?))");
        }
        sql.push_str(" ORDER BY COALESCE(last_message_ts, 0) DESC LIMIT ?");

        let mut q = sqlx::query(&sql);
        if let Some(ref needle) = needle {
            q = q.bind(needle).bind(needle);
        }
        let rows = q
            .bind(limit.unwrap_or(DEFAULT_LIMIT))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(chat_from_row).collect())
    }

    // =========================================================================
    // Contacts
    // =========================================================================

    /// Upsert contact names. Empty fields keep whatever is stored.
    pub async fn upsert_contact(&self, contact: &ContactInfo) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contacts (jid, phone, push_name, full_name, first_name, business_name, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(jid) DO UPDATE SET
                phone = COALESCE(NULLIF(excluded.phone, ''), contacts.phone),
                push_name = COALESCE(NULLIF(excluded.push_name, ''), contacts.push_name),
                full_name = COALESCE(NULLIF(excluded.full_name, ''), contacts.full_name),
                first_name = COALESCE(NULLIF(excluded.first_name, ''), contacts.first_name),
                business_name = COALESCE(NULLIF(excluded.business_name, ''), contacts.business_name),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&contact.jid)
        .bind(null_if_empty(&contact.phone))
        .bind(null_if_empty(&contact.push_name))
        .bind(null_if_empty(&contact.full_name))
        .bind(null_if_empty(&contact.first_name))
        .bind(null_if_empty(&contact.business_name))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a contact, including its alias and tags.
    pub async fn get_contact(&self, jid: &str) -> Result<Option<Contact>> {
        let row = sqlx::query(
            r#"
            SELECT c.*, a.alias AS alias
            FROM contacts c
            LEFT JOIN contact_aliases a ON a.jid = c.jid
            WHERE c.jid = ?
            "#,
        )
        .bind(jid)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut contact = contact_from_row(&row);
                contact.tags = self.list_tags(jid).await?;
                Ok(Some(contact))
            }
            None => Ok(None),
        }
    }

    /// Search contacts by alias, names, phone or identifier.
    pub async fn search_contacts(&self, query: &str, limit: Option<i64>) -> Result<Vec<Contact>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidRequest("query is required".to_string()));
        }
        let needle = format!("%{query}%");

        let rows = sqlx::query(
            r#"
            SELECT c.*, a.alias AS alias
            FROM contacts c
            LEFT JOIN contact_aliases a ON a.jid = c.jid
            WHERE LOWER(COALESCE(a.alias, '')) LIKE LOWER(?)
               OR LOWER(COALESCE(c.full_name, '')) LIKE LOWER(?)
               OR LOWER(COALESCE(c.push_name, '')) LIKE LOWER(?)
               OR LOWER(COALESCE(c.phone, '')) LIKE LOWER(?)
               OR LOWER(c.jid) LIKE LOWER(?)
            ORDER BY COALESCE(NULLIF(a.alias, ''), NULLIF(c.full_name, ''), NULLIF(c.push_name, ''), c.jid)
            LIMIT ?
            "#,
        )
        .bind(&needle)
        .bind(&needle)
        .bind(&needle)
        .bind(&needle)
        .bind(&needle)
        .bind(limit.unwrap_or(DEFAULT_LIMIT))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(contact_from_row).collect())
    }

    /// Set a local alias for a contact.
    pub async fn set_alias(&self, jid: &str, alias: &str) -> Result<()> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(Error::InvalidRequest("alias is required".to_string()));
        }
        sqlx::query(
            r#"
            INSERT INTO contact_aliases (jid, alias, notes, updated_at)
            VALUES (?, ?, NULL, ?)
            ON CONFLICT(jid) DO UPDATE SET alias = excluded.alias, updated_at = excluded.updated_at
            "#,
        )
        .bind(jid)
        .bind(alias)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a local alias.
    pub async fn remove_alias(&self, jid: &str) -> Result<()> {
        sqlx::query("DELETE FROM contact_aliases WHERE jid = ?")
            .bind(jid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Attach a local tag to a contact.
    pub async fn add_tag(&self, jid: &str, tag: &str) -> Result<()> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(Error::InvalidRequest("tag is required".to_string()));
        }
        sqlx::query(
            r#"
            INSERT INTO contact_tags (jid, tag, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(jid, tag) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(jid)
        .bind(tag)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a local tag.
    pub async fn remove_tag(&self, jid: &str, tag: &str) -> Result<()> {
        sqlx::query("DELETE FROM contact_tags WHERE jid = ? AND tag = ?")
            .bind(jid)
            .bind(tag.trim())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Tags of a contact, alphabetically.
    pub async fn list_tags(&self, jid: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT tag FROM contact_tags WHERE jid = ? ORDER BY tag")
            .bind(jid)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("tag")).collect())
    }

    // =========================================================================
    // Groups
    // =========================================================================

    /// Upsert group metadata. Empty name/owner and a missing creation time
    /// keep the stored values.
    pub async fn upsert_group(
        &self,
        jid: &str,
        name: &str,
        owner_jid: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO groups (jid, name, owner_jid, created_ts, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(jid) DO UPDATE SET
                name = COALESCE(NULLIF(excluded.name, ''), groups.name),
                owner_jid = COALESCE(NULLIF(excluded.owner_jid, ''), groups.owner_jid),
                created_ts = COALESCE(NULLIF(excluded.created_ts, 0), groups.created_ts),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(jid)
        .bind(null_if_empty(name))
        .bind(null_if_empty(owner_jid))
        .bind(created_at.map(unix))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace a group's participant set. Runs in one transaction: on any
    /// failure the previous set is left untouched.
    pub async fn replace_group_participants(
        &self,
        group_jid: &str,
        participants: &[GroupParticipant],
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM group_participants WHERE group_jid = ?")
            .bind(group_jid)
            .execute(&mut *tx)
            .await?;

        for participant in participants {
            sqlx::query(
                "INSERT INTO group_participants (group_jid, user_jid, role, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(group_jid)
            .bind(&participant.user_jid)
            .bind(participant.role.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Participants of a group, ordered by user identifier.
    pub async fn group_participants(&self, group_jid: &str) -> Result<Vec<GroupParticipant>> {
        let rows = sqlx::query(
            "SELECT user_jid, role FROM group_participants WHERE group_jid = ? ORDER BY user_jid",
        )
        .bind(group_jid)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| GroupParticipant {
                user_jid: row.get("user_jid"),
                role: ParticipantRole::from(
                    row.get::<Option<String>, _>("role")
                        .unwrap_or_default()
                        .as_str(),
                ),
            })
            .collect())
    }

    /// List groups, newest first, optionally filtered by name or id.
    pub async fn list_groups(&self, query: Option<&str>, limit: Option<i64>) -> Result<Vec<Group>> {
        let mut sql = String::from("SELECT * FROM groups WHERE 1=1");
        let needle = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{q}%"));

        if needle.is_some() {
            sql.push_str(" AND (LOWER(COALESCE(name, '')) LIKE LOWER(?) OR LOWER(jid) LIKE LOWER(?))");
        }
        sql.push_str(" ORDER BY COALESCE(created_ts, 0) DESC LIMIT ?");

        let mut q = sqlx::query(&sql);
        if let Some(ref needle) = needle {
            q = q.bind(needle).bind(needle);
        }
        let rows = q
            .bind(limit.unwrap_or(DEFAULT_LIMIT))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(group_from_row).collect())
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Insert or merge a message by (chat, id). A placeholder chat row is
    /// created when the chat is not known yet. The search index is kept in
    /// step by triggers inside the same transaction.
    pub async fn upsert_message(&self, msg: &MessageUpsert) -> Result<()> {
        if msg.chat_jid.trim().is_empty() || msg.msg_id.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "chat and message id are required".to_string(),
            ));
        }

        let media = msg.media.as_ref();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO chats (jid, kind, name, last_message_ts) VALUES (?, ?, ?, ?) ON CONFLICT(jid) DO NOTHING",
        )
        .bind(&msg.chat_jid)
        .bind(jid::chat_kind(&msg.chat_jid).as_str())
        .bind(null_if_empty(&msg.chat_name))
        .bind(unix(msg.timestamp))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                chat_jid, chat_name, msg_id, sender_jid, sender_name, ts, from_me, text, display_text,
                media_type, media_caption, filename, mime_type, direct_path,
                media_key, file_sha256, file_enc_sha256, file_length,
                reaction_to_id, reaction_emoji, reply_to_id, reply_to_display
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chat_jid, msg_id) DO UPDATE SET
                chat_name = COALESCE(NULLIF(excluded.chat_name, ''), messages.chat_name),
                sender_jid = excluded.sender_jid,
                sender_name = COALESCE(NULLIF(excluded.sender_name, ''), messages.sender_name),
                ts = excluded.ts,
                from_me = excluded.from_me,
                text = excluded.text,
                display_text = COALESCE(NULLIF(excluded.display_text, ''), messages.display_text),
                media_type = excluded.media_type,
                media_caption = excluded.media_caption,
                filename = COALESCE(NULLIF(excluded.filename, ''), messages.filename),
                mime_type = COALESCE(NULLIF(excluded.mime_type, ''), messages.mime_type),
                direct_path = COALESCE(NULLIF(excluded.direct_path, ''), messages.direct_path),
                media_key = CASE WHEN excluded.media_key IS NOT NULL AND length(excluded.media_key) > 0
                                 THEN excluded.media_key ELSE messages.media_key END,
                file_sha256 = CASE WHEN excluded.file_sha256 IS NOT NULL AND length(excluded.file_sha256) > 0
                                   THEN excluded.file_sha256 ELSE messages.file_sha256 END,
                file_enc_sha256 = CASE WHEN excluded.file_enc_sha256 IS NOT NULL AND length(excluded.file_enc_sha256) > 0
                                       THEN excluded.file_enc_sha256 ELSE messages.file_enc_sha256 END,
                file_length = CASE WHEN excluded.file_length > 0
                                   THEN excluded.file_length ELSE messages.file_length END,
                reaction_to_id = COALESCE(NULLIF(excluded.reaction_to_id, ''), messages.reaction_to_id),
                reaction_emoji = COALESCE(NULLIF(excluded.reaction_emoji, ''), messages.reaction_emoji),
                reply_to_id = COALESCE(NULLIF(excluded.reply_to_id, ''), messages.reply_to_id),
                reply_to_display = COALESCE(NULLIF(excluded.reply_to_display, ''), messages.reply_to_display)
            "#,
        )
        .bind(&msg.chat_jid)
        .bind(null_if_empty(&msg.chat_name))
        .bind(&msg.msg_id)
        .bind(null_if_empty(&msg.sender_jid))
        .bind(null_if_empty(&msg.sender_name))
        .bind(unix(msg.timestamp))
        .bind(i64::from(msg.from_me))
        .bind(null_if_empty(&msg.text))
        .bind(null_if_empty(&msg.display_text))
        .bind(media.map(|m| m.kind.as_str()))
        .bind(media.and_then(|m| m.caption.as_deref()).and_then(null_if_empty))
        .bind(media.and_then(|m| m.filename.as_deref()).and_then(null_if_empty))
        .bind(media.and_then(|m| m.mime_type.as_deref()).and_then(null_if_empty))
        .bind(media.and_then(|m| m.direct_path.as_deref()).and_then(null_if_empty))
        .bind(media.map(|m| m.media_key.as_slice()).filter(|b| !b.is_empty()))
        .bind(media.map(|m| m.file_sha256.as_slice()).filter(|b| !b.is_empty()))
        .bind(media.map(|m| m.file_enc_sha256.as_slice()).filter(|b| !b.is_empty()))
        .bind(
            media
                .map(|m| i64::try_from(m.file_length).unwrap_or(i64::MAX))
                .filter(|len| *len > 0),
        )
        .bind(null_if_empty(&msg.reaction_to_id))
        .bind(null_if_empty(&msg.reaction_emoji))
        .bind(null_if_empty(&msg.reply_to_id))
        .bind(null_if_empty(&msg.reply_to_display))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// List messages, newest first.
    pub async fn list_messages(&self, opts: ListMessagesOptions) -> Result<Vec<Message>> {
        let mut sql = format!(
            "SELECT {MESSAGE_COLUMNS}, NULL AS snippet FROM messages m LEFT JOIN chats c ON c.jid = m.chat_jid WHERE 1=1"
        );

        if opts.chat_jid.is_some() {
            sql.push_str(" AND m.chat_jid = ?");
        }
        if opts.after.is_some() {
            sql.push_str(" AND m.ts > ?");
        }
        if opts.before.is_some() {
            sql.push_str(" AND m.ts < ?");
        }
        sql.push_str(" ORDER BY m.ts DESC, m.rowid DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(ref chat_jid) = opts.chat_jid {
            query = query.bind(chat_jid);
        }
        if let Some(after) = opts.after {
            query = query.bind(unix(after));
        }
        if let Some(before) = opts.before {
            query = query.bind(unix(before));
        }

        let rows = query
            .bind(opts.limit.unwrap_or(DEFAULT_LIMIT))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    /// Get one message.
    pub async fn get_message(&self, chat_jid: &str, msg_id: &str) -> Result<Option<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}, NULL AS snippet FROM messages m LEFT JOIN chats c ON c.jid = m.chat_jid WHERE m.chat_jid = ? AND m.msg_id = ?"
        );
        let row = sqlx::query(&sql)
            .bind(chat_jid)
            .bind(msg_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(message_from_row))
    }

    /// Up to `before` older messages in chronological order, the target,
    /// then up to `after` newer messages. Ties on timestamp are ordered by
    /// insertion.
    pub async fn message_context(
        &self,
        chat_jid: &str,
        msg_id: &str,
        before: i64,
        after: i64,
    ) -> Result<Vec<Message>> {
        let target_row = sqlx::query("SELECT rowid, ts FROM messages WHERE chat_jid = ? AND msg_id = ?")
            .bind(chat_jid)
            .bind(msg_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("message '{msg_id}' in {chat_jid}")))?;
        let rowid: i64 = target_row.get("rowid");
        let ts: i64 = target_row.get("ts");

        let target = self
            .get_message(chat_jid, msg_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("message '{msg_id}' in {chat_jid}")))?;

        let older_sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}, NULL AS snippet
            FROM messages m LEFT JOIN chats c ON c.jid = m.chat_jid
            WHERE m.chat_jid = ? AND (m.ts < ? OR (m.ts = ? AND m.rowid < ?))
            ORDER BY m.ts DESC, m.rowid DESC
            LIMIT ?
            "#
        );
        let older = sqlx::query(&older_sql)
            .bind(chat_jid)
            .bind(ts)
            .bind(ts)
            .bind(rowid)
            .bind(before.max(0))
            .fetch_all(&self.pool)
            .await?;

        let newer_sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}, NULL AS snippet
            FROM messages m LEFT JOIN chats c ON c.jid = m.chat_jid
            WHERE m.chat_jid = ? AND (m.ts > ? OR (m.ts = ? AND m.rowid > ?))
            ORDER BY m.ts ASC, m.rowid ASC
            LIMIT ?
            "#
        );
        let newer = sqlx::query(&newer_sql)
            .bind(chat_jid)
            .bind(ts)
            .bind(ts)
            .bind(rowid)
            .bind(after.max(0))
            .fetch_all(&self.pool)
            .await?;

        let mut out: Vec<Message> = older.iter().rev().map(message_from_row).collect();
        out.push(target);
        out.extend(newer.iter().map(message_from_row));
        Ok(out)
    }

    /// Oldest stored message of a chat.
    pub async fn oldest_message(&self, chat_jid: &str) -> Result<Option<MessageAnchor>> {
        let chat_jid = chat_jid.trim();
        if chat_jid.is_empty() {
            return Err(Error::InvalidRequest("chat is required".to_string()));
        }

        let row = sqlx::query(
            r#"
            SELECT chat_jid, msg_id, ts, from_me, sender_jid
            FROM messages
            WHERE chat_jid = ?
            ORDER BY ts ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .bind(chat_jid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| MessageAnchor {
            chat_jid: row.get("chat_jid"),
            msg_id: row.get("msg_id"),
            timestamp: from_unix(row.get("ts")).unwrap_or_default(),
            from_me: row.get::<i64, _>("from_me") != 0,
            sender_jid: row.get("sender_jid"),
        }))
    }

    /// Best display text for a stored message: display text, raw text, then
    /// media label. `None` when the message is unknown or has nothing to show.
    pub async fn resolve_target_text(&self, chat_jid: &str, msg_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT display_text, text, media_type FROM messages WHERE chat_jid = ? AND msg_id = ?",
        )
        .bind(chat_jid)
        .bind(msg_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let display: Option<String> = row.get("display_text");
        let text: Option<String> = row.get("text");
        let media_type: Option<String> = row.get("media_type");

        Ok(non_empty(display.as_deref())
            .or_else(|| non_empty(text.as_deref()))
            .map(ToOwned::to_owned)
            .or_else(|| {
                media_type
                    .as_deref()
                    .and_then(MediaKind::parse)
                    .map(|kind| kind.label().to_string())
            }))
    }

    /// Get message count.
    pub async fn count_messages(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Get message count for one chat.
    pub async fn count_chat_messages(&self, chat_jid: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE chat_jid = ?")
            .bind(chat_jid)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Row counts across the store.
    pub async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM chats) AS chats,
                (SELECT COUNT(*) FROM messages) AS messages,
                (SELECT COUNT(*) FROM contacts) AS contacts,
                (SELECT COUNT(*) FROM groups) AS groups,
                (SELECT COUNT(*) FROM messages WHERE downloaded_at IS NOT NULL) AS media_downloaded
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            chats: row.get("chats"),
            messages: row.get("messages"),
            contacts: row.get("contacts"),
            groups: row.get("groups"),
            media_downloaded: row.get("media_downloaded"),
        })
    }

    // =========================================================================
    // Media
    // =========================================================================

    /// Media descriptor and download state of one message.
    pub async fn media_download_info(
        &self,
        chat_jid: &str,
        msg_id: &str,
    ) -> Result<Option<MediaDownloadInfo>> {
        let row = sqlx::query(
            r#"
            SELECT m.chat_jid, COALESCE(NULLIF(c.name, ''), m.chat_name) AS chat_name, m.msg_id,
                   m.media_type, m.media_caption, m.filename, m.mime_type, m.direct_path,
                   m.media_key, m.file_sha256, m.file_enc_sha256, m.file_length,
                   m.local_path, m.downloaded_at
            FROM messages m
            LEFT JOIN chats c ON c.jid = m.chat_jid
            WHERE m.chat_jid = ? AND m.msg_id = ?
            "#,
        )
        .bind(chat_jid)
        .bind(msg_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let media = row
                .get::<Option<String>, _>("media_type")
                .as_deref()
                .and_then(MediaKind::parse)
                .map(|kind| MediaDescriptor {
                    kind,
                    caption: row.get("media_caption"),
                    filename: row.get("filename"),
                    mime_type: row.get("mime_type"),
                    direct_path: row.get("direct_path"),
                    media_key: row.get::<Option<Vec<u8>>, _>("media_key").unwrap_or_default(),
                    file_sha256: row
                        .get::<Option<Vec<u8>>, _>("file_sha256")
                        .unwrap_or_default(),
                    file_enc_sha256: row
                        .get::<Option<Vec<u8>>, _>("file_enc_sha256")
                        .unwrap_or_default(),
                    file_length: row
                        .get::<Option<i64>, _>("file_length")
                        .and_then(|len| u64::try_from(len).ok())
                        .unwrap_or_default(),
                });

            MediaDownloadInfo {
                chat_jid: row.get("chat_jid"),
                chat_name: row.get("chat_name"),
                msg_id: row.get("msg_id"),
                media,
                local_path: row.get("local_path"),
                downloaded_at: row
                    .get::<Option<i64>, _>("downloaded_at")
                    .and_then(from_unix),
            }
        }))
    }

    /// Record where a message's media was saved.
    pub async fn mark_media_downloaded(
        &self,
        chat_jid: &str,
        msg_id: &str,
        local_path: &str,
        downloaded_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE messages SET local_path = ?, downloaded_at = ? WHERE chat_jid = ? AND msg_id = ?",
        )
        .bind(local_path)
        .bind(unix(downloaded_at))
        .bind(chat_jid)
        .bind(msg_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("message '{msg_id}' in {chat_jid}")));
        }
        Ok(())
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Search messages. Uses the FTS5 index ranked by bm25 when available,
    /// else case-insensitive substring matching ordered by recency.
    pub async fn search_messages(&self, query: &str, opts: SearchOptions) -> Result<Vec<Message>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidRequest("query is required".to_string()));
        }

        if self.fts_enabled {
            self.search_fts(query, &opts).await
        } else {
            self.search_like(query, &opts).await
        }
    }

    async fn search_fts(&self, query: &str, opts: &SearchOptions) -> Result<Vec<Message>> {
        let mut sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS},
                   snippet(messages_fts, 0, '[', ']', '…', 12) AS snippet
            FROM messages_fts
            JOIN messages m ON m.rowid = messages_fts.rowid
            LEFT JOIN chats c ON c.jid = m.chat_jid
            WHERE messages_fts MATCH ?
            "#
        );
        push_filters(&mut sql, opts);
        sql.push_str(" ORDER BY bm25(messages_fts) LIMIT ?");

        let query_builder = sqlx::query(&sql).bind(query);
        let rows = bind_filters(query_builder, opts)
            .bind(opts.limit.unwrap_or(DEFAULT_LIMIT))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    async fn search_like(&self, query: &str, opts: &SearchOptions) -> Result<Vec<Message>> {
        let mut sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}, NULL AS snippet
            FROM messages m
            LEFT JOIN chats c ON c.jid = m.chat_jid
            WHERE (LOWER(COALESCE(m.text, '')) LIKE LOWER(?)
                OR LOWER(COALESCE(m.display_text, '')) LIKE LOWER(?)
                OR LOWER(COALESCE(m.media_caption, '')) LIKE LOWER(?)
                OR LOWER(COALESCE(m.filename, '')) LIKE LOWER(?)
                OR LOWER(COALESCE(m.chat_name, '')) LIKE LOWER(?)
                OR LOWER(COALESCE(m.sender_name, '')) LIKE LOWER(?)
                OR LOWER(COALESCE(c.name, '')) LIKE LOWER(?))
            "#
        );
        push_filters(&mut sql, opts);
        sql.push_str(" ORDER BY m.ts DESC, m.rowid DESC LIMIT ?");

        let needle = format!("%{}%", query.trim());
        let mut query_builder = sqlx::query(&sql);
        for _ in 0..7 {
            query_builder = query_builder.bind(needle.clone());
        }
        let rows = bind_filters(query_builder, opts)
            .bind(opts.limit.unwrap_or(DEFAULT_LIMIT))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(message_from_row).collect())
    }
}

/// Options for listing messages.
#[derive(Debug, Default)]
pub struct ListMessagesOptions {
    pub chat_jid: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Options for search queries.
#[derive(Debug, Default)]
pub struct SearchOptions {
    pub chat_jid: Option<String>,
    pub sender_jid: Option<String>,
    pub media_type: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

fn push_filters(sql: &mut String, opts: &SearchOptions) {
    if opts.chat_jid.is_some() {
        sql.push_str(" AND m.chat_jid = ?");
    }
    if opts.sender_jid.is_some() {
        sql.push_str(" AND m.sender_jid = ?");
    }
    if opts.after.is_some() {
        sql.push_str(" AND m.ts > ?");
    }
    if opts.before.is_some() {
        sql.push_str(" AND m.ts < ?");
    }
    if opts.media_type.is_some() {
        sql.push_str(" AND COALESCE(m.media_type, '') = ?");
    }
}

fn bind_filters<'q>(mut query: Query<'q>, opts: &'q SearchOptions) -> Query<'q> {
    if let Some(ref chat_jid) = opts.chat_jid {
        query = query.bind(chat_jid);
    }
    if let Some(ref sender_jid) = opts.sender_jid {
        query = query.bind(sender_jid);
    }
    if let Some(after) = opts.after {
        query = query.bind(unix(after));
    }
    if let Some(before) = opts.before {
        query = query.bind(unix(before));
    }
    if let Some(ref media_type) = opts.media_type {
        query = query.bind(media_type);
    }
    query
}

fn chat_from_row(row: &sqlx::sqlite::SqliteRow) -> Chat {
    Chat {
        jid: row.get("jid"),
        kind: ChatKind::from(row.get::<&str, _>("kind")),
        name: row.get("name"),
        last_message_at: row
            .get::<Option<i64>, _>("last_message_ts")
            .and_then(from_unix),
    }
}

fn contact_from_row(row: &sqlx::sqlite::SqliteRow) -> Contact {
    Contact {
        jid: row.get("jid"),
        phone: row.get("phone"),
        push_name: row.get("push_name"),
        full_name: row.get("full_name"),
        first_name: row.get("first_name"),
        business_name: row.get("business_name"),
        alias: row.get("alias"),
        tags: Vec::new(),
        updated_at: from_unix(row.get("updated_at")),
    }
}

fn group_from_row(row: &sqlx::sqlite::SqliteRow) -> Group {
    Group {
        jid: row.get("jid"),
        name: row.get("name"),
        owner_jid: row.get("owner_jid"),
        created_at: row.get::<Option<i64>, _>("created_ts").and_then(from_unix),
        updated_at: from_unix(row.get("updated_at")),
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Message {
    Message {
        chat_jid: row.get("chat_jid"),
        chat_name: row.get("chat_name"),
        msg_id: row.get("msg_id"),
        sender_jid: row.get("sender_jid"),
        sender_name: row.get("sender_name"),
        timestamp: from_unix(row.get("ts")).unwrap_or_default(),
        from_me: row.get::<i64, _>("from_me") != 0,
        text: row.get("text"),
        display_text: row.get("display_text"),
        media_type: row.get("media_type"),
        media_caption: row.get("media_caption"),
        filename: row.get("filename"),
        local_path: row.get("local_path"),
        reaction_to_id: row.get("reaction_to_id"),
        reaction_emoji: row.get("reaction_emoji"),
        reply_to_id: row.get("reply_to_id"),
        reply_to_display: row.get("reply_to_display"),
        snippet: row.get("snippet"),
    }
}

fn null_if_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn unix(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}
