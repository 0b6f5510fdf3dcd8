//! Persistence substrate for the write lock.
//!
//! Two artifacts live next to the shared data file:
//!
//! ```text
//! shared.db        # the data file; its `sessions` table holds lock rows
//! shared.db.lock   # marker file, created with create_new semantics
//! ```
//!
//! The marker's exclusive create decides who wins an acquisition race. The
//! session row carries identity and liveness timestamps and is what every
//! other client reads to find out who holds the lock.

mod marker;
mod sqlite;

pub use marker::{LockFileMarker, MarkerContents};
pub use sqlite::SqliteSessionStore;

pub(crate) use sqlite::open_connection;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{LockHolder, SessionId, UserId};

#[derive(Debug, Clone)]
pub struct NewSession<'a> {
    pub user_id: UserId,
    pub username: &'a str,
    pub machine_name: &'a str,
    pub started_at: DateTime<Utc>,
}

/// The shared row-set of write-lock sessions.
pub trait SessionStore: Send + Sync {
    /// Inserts a write-lock row. Fails if one already exists.
    fn insert_write_session(&self, session: &NewSession<'_>) -> Result<SessionId>;

    /// Most recently started write-lock row, if any.
    fn current_holder(&self) -> Result<Option<LockHolder>>;

    fn session_exists(&self, session_id: SessionId) -> Result<bool>;

    /// Returns false when the row no longer exists.
    fn refresh_heartbeat(&self, session_id: SessionId, at: DateTime<Utc>) -> Result<bool>;

    fn delete_session(&self, session_id: SessionId) -> Result<bool>;

    /// Deletes write-lock rows whose heartbeat is older than `cutoff`.
    fn delete_stale_sessions(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn delete_all_write_sessions(&self) -> Result<usize>;
}
