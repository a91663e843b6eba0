use anyhow::Context;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

mod auth;
mod games;
mod nodes;
mod users;

pub use auth::{hash_password, new_session_token, session_key, verify_password};
pub use nodes::GAME_MASTER_INFO_LEVEL;
pub use gamegraph_protocol as protocol;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_ms() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000).try_into().unwrap_or(i64::MAX)
}

fn new_id(prefix: &str) -> String {
    let c = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{c}", now_ms())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    Invalid(String),
}

impl StoreError {
    /// True for failures of the store itself rather than of the caller's request.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Other(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct Engine {
    db_path: PathBuf,
}

impl Engine {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn open(&self) -> StoreResult<Connection> {
        let path = self.db_path.clone();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create db dir: {}", dir.display()))?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open sqlite db: {}", path.display()))?;

        // Durable + fast defaults.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrate(&conn)?;
        Ok(conn)
    }

    pub fn get_rev(&self) -> StoreResult<i64> {
        let conn = self.open()?;
        let rev: Option<i64> =
            conn.query_row("SELECT MAX(seq) FROM event_log", [], |row| row.get(0))?;
        Ok(rev.unwrap_or(0))
    }

    /// Events visible to `user_id` with a sequence number above `since`, oldest first.
    /// Game-scoped events are visible to current members of that game; account events only
    /// to the account itself.
    pub fn events_for(&self, user_id: &str, since: i64, limit: i64) -> StoreResult<Vec<EventRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT seq, ts_ms, kind, entity_id, payload_json FROM event_log
             WHERE seq > ?1
               AND ((game_id IS NULL AND entity_id = ?3)
                 OR game_id IN (SELECT game_id FROM game_users WHERE user_id = ?3))
             ORDER BY seq ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map((since, limit.clamp(1, 500), user_id), |row| {
            let payload_json: String = row.get(4)?;
            Ok(EventRecord {
                seq: row.get(0)?,
                ts_ms: row.get(1)?,
                kind: row.get(2)?,
                entity_id: row.get(3)?,
                payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: i64,
    pub ts_ms: i64,
    pub kind: String,
    pub entity_id: Option<String>,
    pub payload: serde_json::Value,
}

fn migrate(conn: &Connection) -> StoreResult<()> {
    let v: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if v < 1 {
        conn.execute_batch(
            r#"
-- Monotonic revision source for client sync.
CREATE TABLE IF NOT EXISTS event_log (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  ts_ms INTEGER NOT NULL,
  kind TEXT NOT NULL,
  entity_id TEXT,
  -- Game the event belongs to; NULL for account events.
  game_id TEXT,
  payload_json TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_event_log_ts ON event_log(ts_ms);
CREATE INDEX IF NOT EXISTS idx_event_log_kind ON event_log(kind);
CREATE INDEX IF NOT EXISTS idx_event_log_game ON event_log(game_id);

CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  username TEXT NOT NULL UNIQUE,
  email TEXT NOT NULL UNIQUE,
  password_hash TEXT NOT NULL,
  images_json TEXT NOT NULL DEFAULT '[]',
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
  -- SHA-256 of the cookie token.
  token_hash TEXT PRIMARY KEY,
  user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS games (
  id TEXT PRIMARY KEY,
  title TEXT NOT NULL,
  image TEXT,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL
);

-- One permission record per (game, user).
CREATE TABLE IF NOT EXISTS game_users (
  game_id TEXT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
  user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  permission INTEGER NOT NULL,
  joined_at_ms INTEGER NOT NULL,
  PRIMARY KEY (game_id, user_id)
);

CREATE TABLE IF NOT EXISTS nodes (
  id TEXT PRIMARY KEY,
  game_id TEXT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
  name TEXT NOT NULL,
  x REAL NOT NULL,
  y REAL NOT NULL,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_game ON nodes(game_id);

CREATE TABLE IF NOT EXISTS node_info_levels (
  node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
  user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  info_level INTEGER NOT NULL DEFAULT 0,
  PRIMARY KEY (node_id, user_id)
);

CREATE TABLE IF NOT EXISTS node_editors (
  node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
  user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
  PRIMARY KEY (node_id, user_id)
);

CREATE TABLE IF NOT EXISTS subnodes (
  id TEXT PRIMARY KEY,
  node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
  name TEXT NOT NULL,
  content TEXT NOT NULL DEFAULT '',
  info_level INTEGER NOT NULL DEFAULT 0,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_subnodes_node ON subnodes(node_id);
"#,
        )?;

        conn.pragma_update(None, "user_version", 1_i64)?;
    }

    Ok(())
}

fn append_event_tx(
    tx: &rusqlite::Transaction<'_>,
    kind: &str,
    entity_id: Option<&str>,
    game_id: Option<&str>,
    payload: serde_json::Value,
) -> StoreResult<i64> {
    let ts = now_ms();
    let payload_json = payload.to_string();
    tx.execute(
        "INSERT INTO event_log (ts_ms, kind, entity_id, game_id, payload_json) VALUES (?1, ?2, ?3, ?4, ?5)",
        (ts, kind, entity_id, game_id, payload_json),
    )?;
    Ok(tx.last_insert_rowid())
}

fn non_empty(field: &str, value: &str) -> StoreResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(StoreError::Invalid(format!("{field} must not be empty")));
    }
    Ok(v.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use gamegraph_protocol::CreateUser;

    pub fn temp_engine() -> Engine {
        let p = std::env::temp_dir().join(format!(
            "gamegraph-engine-test-{}-{}.db",
            time::OffsetDateTime::now_utc().unix_timestamp_nanos(),
            ID_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let engine = Engine::new(p);
        let _ = engine.open().expect("open db");
        engine
    }

    pub fn seed_user(engine: &Engine, name: &str) -> protocol::User {
        engine
            .create_user(&CreateUser {
                username: name.to_string(),
                password: format!("{name}-pw"),
                email: format!("{name}@example.com"),
            })
            .expect("seed user")
    }
}
