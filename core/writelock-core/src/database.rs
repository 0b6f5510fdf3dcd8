//! Handle on the shared data file.
//!
//! Constructed explicitly and passed to whoever needs it; there is no global
//! instance. Every mutation goes through [`SharedDatabase::write`], which
//! consults the [`WriteGate`] before a connection is even opened, so a
//! denied write cannot touch the file.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LockConfig;
use crate::coordinator::LockCoordinator;
use crate::error::{Result, WriteLockError};
use crate::gate::WriteGate;
use crate::store::{open_connection, SessionStore, SqliteSessionStore};

pub struct SharedDatabase {
    path: PathBuf,
    busy_timeout: Duration,
    sessions: Arc<SqliteSessionStore>,
    gate: WriteGate,
}

impl SharedDatabase {
    /// Opens (creating if needed) the data file and its `sessions` table.
    ///
    /// The handle starts in the bootstrap phase: writes are allowed until
    /// [`attach_coordinator`](Self::attach_coordinator) is called.
    pub fn open(path: impl Into<PathBuf>, config: &LockConfig) -> Result<Self> {
        let path = path.into();
        let busy_timeout = config.busy_timeout();
        let sessions = Arc::new(SqliteSessionStore::open(&path, busy_timeout)?);
        tracing::debug!(path = %path.display(), "Shared database opened");
        Ok(Self {
            path,
            busy_timeout,
            sessions,
            gate: WriteGate::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_store(&self) -> Arc<dyn SessionStore> {
        self.sessions.clone()
    }

    /// New coordinator for this file's lock. Not attached to the gate.
    pub fn coordinator(&self, config: LockConfig) -> LockCoordinator {
        LockCoordinator::new(config, self.session_store(), &self.path)
    }

    /// Ends the bootstrap phase.
    pub fn attach_coordinator(&self, coordinator: Arc<LockCoordinator>) -> Result<()> {
        self.gate.attach(coordinator)
    }

    pub fn gate(&self) -> &WriteGate {
        &self.gate
    }

    pub fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = open_connection(&self.path, self.busy_timeout)?;
        op(&mut conn)
    }

    /// Runs `op` in an immediate transaction once the gate allows it.
    ///
    /// Fails with `WriteDenied` (and does no I/O) when the lock is not held.
    /// An error from `op` rolls the transaction back.
    pub fn write<T>(&self, op: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.gate.ensure()?;

        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|err| WriteLockError::storage("begin write transaction", err))?;
            let value = op(&tx)?;
            tx.commit()
                .map_err(|err| WriteLockError::storage("commit write transaction", err))?;
            Ok(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn create_notes(db: &SharedDatabase) {
        db.write(|tx| {
            tx.execute_batch("CREATE TABLE IF NOT EXISTS notes (id INTEGER PRIMARY KEY, body TEXT)")
                .map_err(|err| WriteLockError::storage("create notes", err))
        })
        .expect("bootstrap write");
    }

    fn count_notes(db: &SharedDatabase) -> i64 {
        db.with_connection(|conn| {
            conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))
                .map_err(|err| WriteLockError::storage("count notes", err))
        })
        .expect("count")
    }

    #[test]
    fn schema_includes_sessions_table() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = SharedDatabase::open(temp_dir.path().join("shared.db"), &LockConfig::default())
            .expect("open");

        let tables = db
            .with_connection(|conn| {
                let mut stmt = conn
                    .prepare("SELECT name FROM sqlite_master WHERE type = 'table'")
                    .map_err(|err| WriteLockError::storage("query sqlite_master", err))?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(|err| WriteLockError::storage("read sqlite_master", err))?;
                let mut names = Vec::new();
                for row in rows {
                    names.push(row.map_err(|err| WriteLockError::storage("decode name", err))?);
                }
                Ok(names)
            })
            .expect("tables");

        assert!(tables.contains(&"sessions".to_string()));
    }

    #[test]
    fn failed_op_rolls_back() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = SharedDatabase::open(temp_dir.path().join("shared.db"), &LockConfig::default())
            .expect("open");
        create_notes(&db);

        let err = db
            .write(|tx| {
                tx.execute("INSERT INTO notes (body) VALUES (?1)", params!["draft"])
                    .map_err(|err| WriteLockError::storage("insert note", err))?;
                Err::<(), _>(WriteLockError::Operation {
                    context: "save note".to_string(),
                    message: "validation failed".to_string(),
                })
            })
            .expect_err("op failure");

        assert!(matches!(err, WriteLockError::Operation { .. }));
        assert_eq!(count_notes(&db), 0);
    }

    #[test]
    fn writes_require_lock_once_attached() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let db = SharedDatabase::open(temp_dir.path().join("shared.db"), &LockConfig::default())
            .expect("open");
        create_notes(&db);

        let coordinator = Arc::new(db.coordinator(LockConfig::default()));
        db.attach_coordinator(Arc::clone(&coordinator))
            .expect("attach");

        fn insert(tx: &Transaction<'_>) -> Result<usize> {
            tx.execute("INSERT INTO notes (body) VALUES (?1)", params!["hello"])
                .map_err(|err| WriteLockError::storage("insert note", err))
        }

        assert!(db.write(insert).expect_err("no lock").is_write_denied());
        assert_eq!(count_notes(&db), 0);

        assert!(coordinator
            .acquire(crate::types::UserId(2), "alice")
            .is_granted());
        db.write(insert).expect("locked write");
        assert_eq!(count_notes(&db), 1);
    }
}
