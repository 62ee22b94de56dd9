//! SQLite-backed snapshot store implementation.
//!
//! One table per entity kind, primary key `(identity, observed_at)` (messages:
//! `(context_id, message_id, observed_at)`), and a secondary index on the key
//! ordered by `observed_at DESC` that serves `latest` and `history`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | SnapshotError | Scenario |
//! |------------|--------------------|----------|
//! | Database (unique violation) | `DuplicateKey` | Row for `(key, observed_at)` already exists |
//! | PoolTimedOut | `Storage` | No connection available within the acquire timeout |
//! | Anything else | `Storage` | IO, corrupt file, closed pool, decode failure |
//!
//! ## Thread Safety
//!
//! `SqliteSnapshotStore` is `Send + Sync` and cheap to clone; all access goes
//! through the SQLx pool.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, Sqlite};
use tracing::{Span, debug, instrument};

use tgarchive_core::entity::FieldValue;
use tgarchive_core::{
    ChannelFields, ChatFields, EntityKind, Fields, Identity, MessageFields, PeerKind, Snapshot,
    SnapshotError, SnapshotResult, StreamKey, Timestamp, UserFields, schema,
};

use super::query::TimeRange;
use super::r#trait::SnapshotStore;
use crate::participants::{ParticipantDelta, ParticipantStore};

/// Layout version written to `schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

const DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS store_owner (
        id       INTEGER PRIMARY KEY CHECK (id = 1),
        identity INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        identity           INTEGER NOT NULL,
        observed_at        INTEGER NOT NULL,
        first_name         TEXT NOT NULL,
        last_name          TEXT,
        username           TEXT,
        phone              TEXT,
        bio                TEXT,
        bot                INTEGER,
        common_chats_count INTEGER NOT NULL,
        picture_id         INTEGER,
        PRIMARY KEY (identity, observed_at)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS users_by_identity ON users (identity, observed_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS chats (
        identity       INTEGER NOT NULL,
        observed_at    INTEGER NOT NULL,
        title          TEXT NOT NULL,
        migrated_to_id INTEGER,
        picture_id     INTEGER,
        PRIMARY KEY (identity, observed_at)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS chats_by_identity ON chats (identity, observed_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS channels (
        identity          INTEGER NOT NULL,
        observed_at       INTEGER NOT NULL,
        title             TEXT NOT NULL,
        about             TEXT,
        username          TEXT,
        picture_id        INTEGER,
        pinned_message_id INTEGER,
        PRIMARY KEY (identity, observed_at)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS channels_by_identity ON channels (identity, observed_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS supergroups (
        identity          INTEGER NOT NULL,
        observed_at       INTEGER NOT NULL,
        title             TEXT NOT NULL,
        about             TEXT,
        username          TEXT,
        picture_id        INTEGER,
        pinned_message_id INTEGER,
        PRIMARY KEY (identity, observed_at)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS supergroups_by_identity
        ON supergroups (identity, observed_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        context_id          INTEGER NOT NULL,
        message_id          INTEGER NOT NULL,
        observed_at         INTEGER NOT NULL,
        date                INTEGER NOT NULL,
        from_id             INTEGER,
        text                TEXT,
        reply_to_message_id INTEGER,
        forward_id          INTEGER,
        post_author         TEXT,
        view_count          INTEGER,
        media_id            INTEGER,
        formatting          TEXT,
        service_action      TEXT,
        PRIMARY KEY (context_id, message_id, observed_at)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS messages_by_key
        ON messages (context_id, message_id, observed_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS participant_deltas (
        context_id   INTEGER NOT NULL,
        context_kind TEXT NOT NULL,
        observed_at  INTEGER NOT NULL,
        added        TEXT NOT NULL,
        removed      TEXT NOT NULL,
        PRIMARY KEY (context_id, observed_at)
    )
    "#,
];

fn table_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::User => "users",
        EntityKind::Chat => "chats",
        EntityKind::Channel => "channels",
        EntityKind::Supergroup => "supergroups",
        EntityKind::Message => "messages",
    }
}

fn key_columns(key: &StreamKey) -> &'static [&'static str] {
    match key {
        StreamKey::Peer { .. } => &["identity"],
        StreamKey::Message { .. } => &["context_id", "message_id"],
    }
}

fn key_filter(key: &StreamKey) -> &'static str {
    match key {
        StreamKey::Peer { .. } => "identity = ?",
        StreamKey::Message { .. } => "context_id = ? AND message_id = ?",
    }
}

fn bind_key<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    key: &StreamKey,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match *key {
        StreamKey::Peer { identity, .. } => query.bind(identity.get()),
        StreamKey::Message {
            context,
            message_id,
        } => query.bind(context.get()).bind(message_id),
    }
}

/// SQLite-backed append-only snapshot store.
#[derive(Debug, Clone)]
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    /// Open (creating if needed) the archive at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>, acquire_timeout: Duration) -> SnapshotResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SnapshotError::storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(acquire_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Self::with_pool(pool).await
    }

    /// A private in-memory database (tests/dev). Lives as long as the store.
    pub async fn in_memory() -> SnapshotResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| map_sqlx_error("connect", e))?;

        // Every connection to `:memory:` is a separate database, so pin a single one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Self::with_pool(pool).await
    }

    /// Wrap an existing pool and apply the schema.
    pub async fn with_pool(pool: SqlitePool) -> SnapshotResult<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> SnapshotResult<()> {
        for statement in DDL {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }

        let version: Option<i64> = sqlx::query("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("read_schema_version", e))?
            .map(|row| row.try_get("version"))
            .transpose()
            .map_err(|e| map_sqlx_error("read_schema_version", e))?;

        match version {
            None => {
                sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                    .bind(SCHEMA_VERSION)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("write_schema_version", e))?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(SnapshotError::storage(format!(
                    "archive schema version {v} is newer than supported version {SCHEMA_VERSION}"
                )));
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Insert one snapshot row.
    #[instrument(
        skip(self, snapshot),
        fields(key = %snapshot.key, observed_at = snapshot.observed_at.as_secs()),
        err
    )]
    pub async fn append_snapshot(&self, snapshot: &Snapshot) -> SnapshotResult<()> {
        schema::validate(&snapshot.key, &snapshot.fields)?;

        let columns = snapshot.fields.columns();
        let names: Vec<&str> = key_columns(&snapshot.key)
            .iter()
            .copied()
            .chain(["observed_at"])
            .chain(columns.iter().map(|c| c.name))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table_for(snapshot.key.kind()),
            names.join(", "),
            vec!["?"; names.len()].join(", ")
        );

        let mut query =
            bind_key(sqlx::query(&sql), &snapshot.key).bind(snapshot.observed_at.as_secs());
        for column in &columns {
            query = match column.value {
                FieldValue::Null => query.bind(None::<i64>),
                FieldValue::Int(v) => query.bind(v),
                FieldValue::Bool(v) => query.bind(v),
                FieldValue::Text(v) => query.bind(v),
            };
        }

        query.execute(&self.pool).await.map_err(|e| {
            if is_unique_violation(&e) {
                SnapshotError::DuplicateKey {
                    key: snapshot.key,
                    observed_at: snapshot.observed_at,
                }
            } else {
                map_sqlx_error("append", e)
            }
        })?;
        Ok(())
    }

    /// Newest row for the key.
    #[instrument(skip(self, key), fields(key = %key, found), err)]
    pub async fn load_latest(&self, key: &StreamKey) -> SnapshotResult<Option<Snapshot>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY observed_at DESC LIMIT 1",
            table_for(key.kind()),
            key_filter(key)
        );
        let row = bind_key(sqlx::query(&sql), key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("latest", e))?;

        Span::current().record("found", row.is_some());
        row.map(|row| decode_snapshot(key, &row)).transpose()
    }

    /// Rows inside `range`, oldest first.
    #[instrument(skip(self, key, range), fields(key = %key, rows), err)]
    pub async fn load_history(
        &self,
        key: &StreamKey,
        range: TimeRange,
    ) -> SnapshotResult<Vec<Snapshot>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM {} WHERE {} AND observed_at BETWEEN ? AND ? ORDER BY observed_at ASC",
            table_for(key.kind()),
            key_filter(key)
        );
        let rows = bind_key(sqlx::query(&sql), key)
            .bind(range.from.as_secs())
            .bind(range.to.as_secs())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("history", e))?;

        Span::current().record("rows", rows.len());
        rows.iter().map(|row| decode_snapshot(key, row)).collect()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn append(&self, snapshot: &Snapshot) -> SnapshotResult<()> {
        self.append_snapshot(snapshot).await
    }

    async fn latest(&self, key: &StreamKey) -> SnapshotResult<Option<Snapshot>> {
        self.load_latest(key).await
    }

    async fn history(&self, key: &StreamKey, range: TimeRange) -> SnapshotResult<Vec<Snapshot>> {
        self.load_history(key, range).await
    }

    async fn count(&self, key: &StreamKey) -> SnapshotResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) AS total FROM {} WHERE {}",
            table_for(key.kind()),
            key_filter(key)
        );
        let row = bind_key(sqlx::query(&sql), key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count", e))?;
        let total: i64 = row.try_get("total").map_err(|e| map_sqlx_error("count", e))?;
        Ok(total as u64)
    }

    #[instrument(skip(self, owner), fields(owner = %owner), err)]
    async fn claim_owner(&self, owner: Identity) -> SnapshotResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let stored: Option<i64> = sqlx::query("SELECT identity FROM store_owner WHERE id = 1")
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("read_owner", e))?
            .map(|row| row.try_get("identity"))
            .transpose()
            .map_err(|e| map_sqlx_error("read_owner", e))?;

        match stored.map(Identity::from_normalized) {
            Some(existing) if existing != owner => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(SnapshotError::OwnerMismatch {
                    stored: existing,
                    requested: owner,
                });
            }
            Some(_) => {}
            None => {
                sqlx::query("INSERT INTO store_owner (id, identity) VALUES (1, ?)")
                    .bind(owner.get())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("write_owner", e))?;
                debug!("archive bound to owner");
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait::async_trait]
impl ParticipantStore for SqliteSnapshotStore {
    #[instrument(skip(self, delta), fields(context = %delta.context), err)]
    async fn append_delta(&self, delta: &ParticipantDelta) -> SnapshotResult<()> {
        let StreamKey::Peer { kind, identity } = delta.context else {
            return Err(SnapshotError::KindMismatch {
                key: delta.context,
                found: EntityKind::Message,
            });
        };
        let added = encode_members(&delta.added)?;
        let removed = encode_members(&delta.removed)?;

        sqlx::query(
            r#"
            INSERT INTO participant_deltas (context_id, context_kind, observed_at, added, removed)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(identity.get())
        .bind(kind.as_str())
        .bind(delta.observed_at.as_secs())
        .bind(added)
        .bind(removed)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                SnapshotError::DuplicateKey {
                    key: delta.context,
                    observed_at: delta.observed_at,
                }
            } else {
                map_sqlx_error("append_delta", e)
            }
        })?;
        Ok(())
    }

    async fn deltas(
        &self,
        context: &StreamKey,
        range: TimeRange,
    ) -> SnapshotResult<Vec<ParticipantDelta>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT context_kind, observed_at, added, removed
            FROM participant_deltas
            WHERE context_id = ? AND observed_at BETWEEN ? AND ?
            ORDER BY observed_at ASC
            "#,
        )
        .bind(context.identity().get())
        .bind(range.from.as_secs())
        .bind(range.to.as_secs())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("deltas", e))?;

        let column = |row: &SqliteRow, name: &str| -> SnapshotResult<String> {
            row.try_get(name).map_err(|e| map_sqlx_error("deltas", e))
        };
        rows.iter()
            .map(|row| {
                let kind = PeerKind::from_str(&column(row, "context_kind")?)?;
                let observed_at: i64 =
                    row.try_get("observed_at").map_err(|e| map_sqlx_error("deltas", e))?;
                let added = column(row, "added")?;
                let removed = column(row, "removed")?;
                Ok(ParticipantDelta {
                    context: StreamKey::Peer {
                        kind,
                        identity: context.identity(),
                    },
                    observed_at: Timestamp::from_secs(observed_at),
                    added: decode_members(&added)?,
                    removed: decode_members(&removed)?,
                })
            })
            .collect()
    }
}

fn encode_members(members: &BTreeSet<Identity>) -> SnapshotResult<String> {
    serde_json::to_string(members)
        .map_err(|e| SnapshotError::storage(format!("failed to encode members: {e}")))
}

fn decode_members(raw: &str) -> SnapshotResult<BTreeSet<Identity>> {
    serde_json::from_str(raw)
        .map_err(|e| SnapshotError::storage(format!("failed to decode members: {e}")))
}

fn decode_snapshot(key: &StreamKey, row: &SqliteRow) -> SnapshotResult<Snapshot> {
    let decode = |e: sqlx::Error| {
        SnapshotError::storage(format!("failed to decode {} row: {e}", table_for(key.kind())))
    };
    let observed_at: i64 = row.try_get("observed_at").map_err(decode)?;
    let fields = decode_fields(key.kind(), row).map_err(decode)?;
    Ok(Snapshot::new(*key, Timestamp::from_secs(observed_at), fields))
}

fn decode_fields(kind: EntityKind, row: &SqliteRow) -> Result<Fields, sqlx::Error> {
    let channel = |row: &SqliteRow| -> Result<ChannelFields, sqlx::Error> {
        Ok(ChannelFields {
            title: row.try_get("title")?,
            about: row.try_get("about")?,
            username: row.try_get("username")?,
            picture_id: row.try_get("picture_id")?,
            pinned_message_id: row.try_get("pinned_message_id")?,
        })
    };

    Ok(match kind {
        EntityKind::User => Fields::User(UserFields {
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            username: row.try_get("username")?,
            phone: row.try_get("phone")?,
            bio: row.try_get("bio")?,
            bot: row.try_get("bot")?,
            common_chats_count: row.try_get("common_chats_count")?,
            picture_id: row.try_get("picture_id")?,
        }),
        EntityKind::Chat => Fields::Chat(ChatFields {
            title: row.try_get("title")?,
            migrated_to_id: row.try_get("migrated_to_id")?,
            picture_id: row.try_get("picture_id")?,
        }),
        EntityKind::Channel => Fields::Channel(channel(row)?),
        EntityKind::Supergroup => Fields::Supergroup(channel(row)?),
        EntityKind::Message => Fields::Message(MessageFields {
            date: row.try_get("date")?,
            from_id: row.try_get("from_id")?,
            text: row.try_get("text")?,
            reply_to_message_id: row.try_get("reply_to_message_id")?,
            forward_id: row.try_get("forward_id")?,
            post_author: row.try_get("post_author")?,
            view_count: row.try_get("view_count")?,
            media_id: row.try_get("media_id")?,
            formatting: row.try_get("formatting")?,
            service_action: row.try_get("service_action")?,
        }),
    })
}

/// Map SQLx errors to `SnapshotError`.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> SnapshotError {
    match err {
        sqlx::Error::Database(db_err) => SnapshotError::storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolTimedOut => {
            SnapshotError::storage(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            SnapshotError::storage(format!("connection pool closed in {operation}"))
        }
        _ => SnapshotError::storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique/primary key constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
