//! SQLite-backed session rows.
//!
//! Connections are opened per operation. The data file usually sits on a
//! network share, so WAL stays off (it needs shared memory between hosts)
//! and contention is absorbed by `busy_timeout` instead.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{NewSession, SessionStore};
use crate::error::{Result, WriteLockError};
use crate::types::{format_timestamp, parse_timestamp, LockHolder, SessionId, UserId};

pub struct SqliteSessionStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteSessionStore {
    /// Opens the store and creates the `sessions` table if needed.
    pub fn open(path: impl Into<PathBuf>, busy_timeout: Duration) -> Result<Self> {
        let store = Self {
            path: path.into(),
            busy_timeout,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            // The partial index allows at most one write-lock row at a time.
            conn.execute_batch(
                "BEGIN IMMEDIATE;
                 CREATE TABLE IF NOT EXISTS sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    username TEXT NOT NULL,
                    session_start TEXT NOT NULL,
                    last_heartbeat TEXT NOT NULL,
                    is_write_lock INTEGER NOT NULL DEFAULT 0,
                    machine_name TEXT NOT NULL
                 );
                 CREATE UNIQUE INDEX IF NOT EXISTS sessions_single_writer
                    ON sessions (is_write_lock) WHERE is_write_lock = 1;
                 COMMIT;",
            )
            .map_err(|err| WriteLockError::storage("initialize sessions schema", err))
        })
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = open_connection(&self.path, self.busy_timeout)?;
        op(&mut conn)
    }
}

impl SessionStore for SqliteSessionStore {
    fn insert_write_session(&self, session: &NewSession<'_>) -> Result<SessionId> {
        let started_at = format_timestamp(session.started_at);
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO sessions \
                    (user_id, username, session_start, last_heartbeat, is_write_lock, machine_name) \
                 VALUES (?1, ?2, ?3, ?3, 1, ?4)",
                params![
                    session.user_id.0,
                    session.username,
                    started_at,
                    session.machine_name
                ],
            )
            .map_err(|err| WriteLockError::storage("insert write-lock session", err))?;
            Ok(SessionId(conn.last_insert_rowid()))
        })
    }

    fn current_holder(&self) -> Result<Option<LockHolder>> {
        self.with_connection(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_id, username, machine_name, session_start, last_heartbeat \
                     FROM sessions \
                     WHERE is_write_lock = 1 \
                     ORDER BY session_start DESC \
                     LIMIT 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    },
                )
                .optional()
                .map_err(|err| WriteLockError::storage("query lock holder", err))?;

            Ok(row.map(
                |(id, user_id, username, machine_name, started_at, last_heartbeat)| {
                    let started_at = parse_timestamp(&started_at).unwrap_or_default();
                    LockHolder {
                        session_id: SessionId(id),
                        user_id: UserId(user_id),
                        username,
                        machine_name,
                        started_at,
                        last_heartbeat: parse_timestamp(&last_heartbeat).unwrap_or(started_at),
                    }
                },
            ))
        })
    }

    fn session_exists(&self, session_id: SessionId) -> Result<bool> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT 1 FROM sessions WHERE id = ?1 AND is_write_lock = 1",
                params![session_id.0],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
            .map_err(|err| WriteLockError::storage("query write-lock session", err))
        })
    }

    fn refresh_heartbeat(&self, session_id: SessionId, at: DateTime<Utc>) -> Result<bool> {
        self.with_connection(|conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions SET last_heartbeat = ?1 WHERE id = ?2",
                    params![format_timestamp(at), session_id.0],
                )
                .map_err(|err| WriteLockError::storage("refresh heartbeat", err))?;
            Ok(updated > 0)
        })
    }

    fn delete_session(&self, session_id: SessionId) -> Result<bool> {
        self.with_connection(|conn| {
            let deleted = conn
                .execute("DELETE FROM sessions WHERE id = ?1", params![session_id.0])
                .map_err(|err| WriteLockError::storage("delete session", err))?;
            Ok(deleted > 0)
        })
    }

    fn delete_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM sessions WHERE is_write_lock = 1 AND last_heartbeat < ?1",
                params![format_timestamp(cutoff)],
            )
            .map_err(|err| WriteLockError::storage("delete stale sessions", err))
        })
    }

    fn delete_all_write_sessions(&self) -> Result<usize> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM sessions WHERE is_write_lock = 1", [])
                .map_err(|err| WriteLockError::storage("delete write-lock sessions", err))
        })
    }
}

pub(crate) fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs_err::create_dir_all(parent)
            .map_err(|err| WriteLockError::io("create data file directory", err))?;
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let conn = Connection::open_with_flags(path, flags)
        .map_err(|err| WriteLockError::storage("open shared data file", err))?;
    conn.busy_timeout(busy_timeout)
        .map_err(|err| WriteLockError::storage("set busy_timeout", err))?;
    Ok(conn)
}
