//! Versioned schema migrations.
//!
//! Each step runs in its own transaction together with its row in
//! `schema_migrations`. The full-text step may degrade: when FTS5 cannot
//! be provisioned it is rolled back and left unrecorded, so the next open
//! tries again.

use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::error::{Error, Result};

const LEDGER: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL
);
"#;

const CORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chats (
    jid TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    name TEXT,
    last_message_ts INTEGER
);

CREATE TABLE IF NOT EXISTS contacts (
    jid TEXT PRIMARY KEY,
    phone TEXT,
    push_name TEXT,
    full_name TEXT,
    first_name TEXT,
    business_name TEXT,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
    jid TEXT PRIMARY KEY,
    name TEXT,
    owner_jid TEXT,
    created_ts INTEGER,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS group_participants (
    group_jid TEXT NOT NULL,
    user_jid TEXT NOT NULL,
    role TEXT,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (group_jid, user_jid),
    FOREIGN KEY (group_jid) REFERENCES groups(jid) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS contact_aliases (
    jid TEXT PRIMARY KEY,
    alias TEXT NOT NULL,
    notes TEXT,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS contact_tags (
    jid TEXT NOT NULL,
    tag TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (jid, tag)
);

CREATE TABLE IF NOT EXISTS messages (
    rowid INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_jid TEXT NOT NULL,
    chat_name TEXT,
    msg_id TEXT NOT NULL,
    sender_jid TEXT,
    sender_name TEXT,
    ts INTEGER NOT NULL,
    from_me INTEGER NOT NULL,
    text TEXT,
    media_type TEXT,
    media_caption TEXT,
    filename TEXT,
    mime_type TEXT,
    direct_path TEXT,
    media_key BLOB,
    file_sha256 BLOB,
    file_enc_sha256 BLOB,
    file_length INTEGER,
    local_path TEXT,
    downloaded_at INTEGER,
    UNIQUE(chat_jid, msg_id),
    FOREIGN KEY (chat_jid) REFERENCES chats(jid) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts ON messages(chat_jid, ts);
CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages(ts);
"#;

const FTS_TABLE: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    text,
    media_caption,
    filename,
    chat_name,
    sender_name,
    display_text
);
"#;

const FTS_TRIGGERS: &str = r#"
DROP TRIGGER IF EXISTS messages_ai;
DROP TRIGGER IF EXISTS messages_ad;
DROP TRIGGER IF EXISTS messages_au;

CREATE TRIGGER messages_ai AFTER INSERT ON messages BEGIN
    INSERT INTO messages_fts(rowid, text, media_caption, filename, chat_name, sender_name, display_text)
    VALUES (new.rowid, COALESCE(new.text,''), COALESCE(new.media_caption,''), COALESCE(new.filename,''),
            COALESCE(new.chat_name,''), COALESCE(new.sender_name,''), COALESCE(new.display_text,''));
END;

CREATE TRIGGER messages_ad AFTER DELETE ON messages BEGIN
    DELETE FROM messages_fts WHERE rowid = old.rowid;
END;

CREATE TRIGGER messages_au AFTER UPDATE ON messages BEGIN
    DELETE FROM messages_fts WHERE rowid = old.rowid;
    INSERT INTO messages_fts(rowid, text, media_caption, filename, chat_name, sender_name, display_text)
    VALUES (new.rowid, COALESCE(new.text,''), COALESCE(new.media_caption,''), COALESCE(new.filename,''),
            COALESCE(new.chat_name,''), COALESCE(new.sender_name,''), COALESCE(new.display_text,''));
END;
"#;

const FTS_POPULATE: &str = r#"
INSERT INTO messages_fts(rowid, text, media_caption, filename, chat_name, sender_name, display_text)
SELECT rowid,
       COALESCE(text,''),
       COALESCE(media_caption,''),
       COALESCE(filename,''),
       COALESCE(chat_name,''),
       COALESCE(sender_name,''),
       COALESCE(display_text,'')
FROM messages
"#;

enum Step {
    Sql(&'static str),
    AddColumns {
        table: &'static str,
        columns: &'static [(&'static str, &'static str)],
    },
    FullText,
}

struct Migration {
    version: i64,
    name: &'static str,
    step: Step,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core schema",
        step: Step::Sql(CORE_SCHEMA),
    },
    Migration {
        version: 2,
        name: "messages display_text column",
        step: Step::AddColumns {
            table: "messages",
            columns: &[("display_text", "TEXT")],
        },
    },
    Migration {
        version: 3,
        name: "messages reaction columns",
        step: Step::AddColumns {
            table: "messages",
            columns: &[("reaction_to_id", "TEXT"), ("reaction_emoji", "TEXT")],
        },
    },
    Migration {
        version: 4,
        name: "messages reply columns",
        step: Step::AddColumns {
            table: "messages",
            columns: &[("reply_to_id", "TEXT"), ("reply_to_display", "TEXT")],
        },
    },
    Migration {
        version: 5,
        name: "messages fts",
        step: Step::FullText,
    },
];

/// Newest schema version known to this build.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// An applied migration as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub applied_at: i64,
}

enum Outcome {
    Applied,
    Degraded,
}

/// Apply every pending migration in order. Returns whether the full-text
/// index is available afterwards.
pub(crate) async fn run(pool: &SqlitePool, full_text: bool) -> Result<bool> {
    sqlx::raw_sql(LEDGER).execute(pool).await?;

    let applied: Vec<i64> = sqlx::query("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.get::<i64, _>("version"))
        .collect();

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }
        match apply(pool, migration, full_text).await {
            Ok(Outcome::Applied) => {
                tracing::debug!(
                    version = migration.version,
                    name = migration.name,
                    "Applied migration"
                );
            }
            Ok(Outcome::Degraded) => {
                tracing::warn!(
                    version = migration.version,
                    name = migration.name,
                    "Full-text index unavailable, search falls back to substring matching"
                );
            }
            Err(source) => {
                return Err(Error::Migration {
                    version: migration.version,
                    name: migration.name,
                    source,
                });
            }
        }
    }

    if !full_text {
        return Ok(false);
    }
    table_exists(pool, "messages_fts").await
}

async fn apply(
    pool: &SqlitePool,
    migration: &Migration,
    full_text: bool,
) -> std::result::Result<Outcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    match &migration.step {
        Step::Sql(sql) => {
            sqlx::raw_sql(sql).execute(&mut *tx).await?;
        }
        Step::AddColumns { table, columns } => {
            for (column, ty) in *columns {
                if !has_column(&mut tx, table, column).await? {
                    let alter = format!("ALTER TABLE {table} ADD COLUMN {column} {ty}");
                    sqlx::raw_sql(&alter).execute(&mut *tx).await?;
                }
            }
        }
        Step::FullText => {
            if !full_text {
                tx.rollback().await?;
                return Ok(Outcome::Degraded);
            }
            if let Err(e) = provision_fts(&mut tx).await {
                tracing::debug!("FTS5 provisioning failed: {e}");
                tx.rollback().await?;
                return Ok(Outcome::Degraded);
            }
        }
    }

    sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Outcome::Applied)
}

async fn provision_fts(tx: &mut Transaction<'_, Sqlite>) -> std::result::Result<(), sqlx::Error> {
    let mut exists = has_table(tx, "messages_fts").await?;
    if exists && !has_column(tx, "messages_fts", "display_text").await? {
        sqlx::raw_sql("DROP TABLE IF EXISTS messages_fts")
            .execute(&mut **tx)
            .await?;
        exists = false;
    }

    if !exists {
        sqlx::raw_sql(FTS_TABLE).execute(&mut **tx).await?;
    }
    sqlx::raw_sql(FTS_TRIGGERS).execute(&mut **tx).await?;
    if !exists {
        sqlx::raw_sql(FTS_POPULATE).execute(&mut **tx).await?;
    }
    Ok(())
}

async fn has_table(
    tx: &mut Transaction<'_, Sqlite>,
    name: &str,
) -> std::result::Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE name = ? AND type IN ('table', 'view')")
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.is_some())
}

async fn has_column(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    column: &str,
) -> std::result::Result<bool, sqlx::Error> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(&mut **tx)
        .await?;

    Ok(rows
        .iter()
        .filter_map(|row| row.try_get::<String, _>("name").ok())
        .any(|name| name.eq_ignore_ascii_case(column)))
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE name = ? AND type IN ('table', 'view')")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Read the migration ledger, oldest first.
pub(crate) async fn applied(pool: &SqlitePool) -> Result<Vec<AppliedMigration>> {
    let rows = sqlx::query(
        "SELECT version, name, applied_at FROM schema_migrations ORDER BY version ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| AppliedMigration {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        })
        .collect())
}
