//! Write lock protocol for one client process.
//!
//! # State
//!
//! ```text
//! UNLOCKED ──acquire──▶ HELD ──release──────────────▶ UNLOCKED
//!                         └──lock lost (verify/tick)──▶ UNLOCKED
//! ```
//!
//! The lock-lost transition is never initiated locally: it is this process
//! discovering that a forced unlock or a stale sweep elsewhere removed its
//! session row. Discovery happens either in [`LockCoordinator::verify`] on the
//! caller's thread or on the heartbeat thread; both funnel into the same
//! idempotent routine, so the registered callback fires once per loss.
//!
//! # Acquisition order
//!
//! sweep → check holder → create marker → insert row. The marker's
//! exclusive create is the tie-breaker; the unique index on the session
//! table backs it up. No in-process mutex can stand in for either, because
//! the competing clients are other processes on other machines.

use chrono::Utc;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::sync::mpsc::Receiver;
use tracing::{error, info, warn};

use crate::authority::AdminAuthority;
use crate::config::LockConfig;
use crate::heartbeat::HeartbeatTicker;
use crate::notify::{lock_lost_channel, LockLostCallback, LockLostEvent};
use crate::store::{LockFileMarker, MarkerContents, NewSession, SessionStore};
use crate::types::{
    AccessMode, AcquireOutcome, ForceUnlockOutcome, LockHolder, LockStatus, SessionId, UserId,
};

pub struct LockCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    marker: LockFileMarker,
    config: LockConfig,
    machine_name: String,
    held: Mutex<Option<HeldLock>>,
    last_lost: Mutex<Option<SessionId>>,
    on_lock_lost: RwLock<Option<LockLostCallback>>,
}

struct HeldLock {
    session_id: SessionId,
    user_id: UserId,
    username: String,
    ticker: Option<HeartbeatTicker>,
}

impl LockCoordinator {
    /// Coordinator for the lock guarding `data_file`.
    pub fn new(config: LockConfig, store: Arc<dyn SessionStore>, data_file: &Path) -> Self {
        let machine_name = config
            .machine_name
            .clone()
            .unwrap_or_else(local_machine_name);
        Self {
            inner: Arc::new(Inner {
                store,
                marker: LockFileMarker::for_data_file(data_file),
                config,
                machine_name,
                held: Mutex::new(None),
                last_lost: Mutex::new(None),
                on_lock_lost: RwLock::new(None),
            }),
        }
    }

    pub fn machine_name(&self) -> &str {
        &self.inner.machine_name
    }

    pub fn marker(&self) -> &LockFileMarker {
        &self.inner.marker
    }

    pub fn is_held(&self) -> bool {
        self.inner.lock_held().is_some()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.lock_held().as_ref().map(|held| held.session_id)
    }

    /// Attempts to take the write lock for `user_id`.
    ///
    /// Returns `Granted` with the existing session when this process already
    /// holds the lock.
    pub fn acquire(&self, user_id: UserId, username: &str) -> AcquireOutcome {
        let inner = &self.inner;
        let mut held = inner.lock_held();
        if let Some(current) = held.as_ref() {
            return AcquireOutcome::Granted(current.session_id);
        }

        inner.cleanup_stale(inner.config.stale_timeout());

        match inner.store.current_holder() {
            Ok(Some(holder)) => {
                return AcquireOutcome::Denied(format!(
                    "Database is locked by {}",
                    holder.describe()
                ));
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Failed to check lock holder"),
        }

        let now = Utc::now();
        let contents = MarkerContents {
            username,
            machine_name: &inner.machine_name,
            user_id,
            created_at: now,
        };
        if let Err(err) = inner.marker.create(&contents) {
            return if err.kind() == io::ErrorKind::AlreadyExists {
                AcquireOutcome::Denied("Lock file already exists".to_string())
            } else {
                AcquireOutcome::Denied(format!("Failed to create lock file: {}", err))
            };
        }

        let session = NewSession {
            user_id,
            username,
            machine_name: &inner.machine_name,
            started_at: now,
        };
        let session_id = match inner.store.insert_write_session(&session) {
            Ok(session_id) => session_id,
            Err(err) => {
                inner.remove_marker("roll back lock file");
                return AcquireOutcome::Denied(format!(
                    "Failed to create database session: {}",
                    err
                ));
            }
        };

        let weak = Arc::downgrade(inner);
        let ticker = match HeartbeatTicker::spawn(
            Arc::clone(&inner.store),
            session_id,
            inner.config.heartbeat_interval(),
            move || {
                if let Some(inner) = Weak::upgrade(&weak) {
                    inner.handle_lock_lost(session_id);
                }
            },
        ) {
            Ok(ticker) => ticker,
            Err(err) => {
                if let Err(err) = inner.store.delete_session(session_id) {
                    warn!(session_id = %session_id, error = %err, "Failed to roll back session row");
                }
                inner.remove_marker("roll back lock file");
                return AcquireOutcome::Denied(format!("Failed to start heartbeat: {}", err));
            }
        };

        // A loss from an earlier session is no longer news.
        *inner.last_lost.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *held = Some(HeldLock {
            session_id,
            user_id,
            username: username.to_string(),
            ticker: Some(ticker),
        });
        info!(
            session_id = %session_id,
            user_id = %user_id,
            username = %username,
            machine = %inner.machine_name,
            "Write lock acquired"
        );
        AcquireOutcome::Granted(session_id)
    }

    /// Releases the lock if held. Never fails; problems are logged.
    pub fn release(&self) {
        let inner = &self.inner;
        let Some(mut held) = inner.lock_held().take() else {
            return;
        };

        if let Some(ticker) = held.ticker.take() {
            ticker.stop(inner.config.release_join_timeout());
        }
        inner.remove_marker("remove lock file");
        if let Err(err) = inner.store.delete_session(held.session_id) {
            warn!(session_id = %held.session_id, error = %err, "Failed to remove session row");
        }
        info!(
            session_id = %held.session_id,
            user_id = %held.user_id,
            username = %held.username,
            "Write lock released"
        );
    }

    /// `(true, None)` when this process may write; otherwise `(false, holder)`.
    pub fn check_permission(&self) -> (bool, Option<String>) {
        if self.is_held() {
            return (true, None);
        }

        let inner = &self.inner;
        inner.cleanup_stale(inner.config.stale_timeout());
        match inner.store.current_holder() {
            Ok(Some(holder)) => (false, Some(holder.describe())),
            Ok(None) => (true, None),
            Err(err) => {
                warn!(error = %err, "Failed to check lock holder");
                (true, None)
            }
        }
    }

    /// Confirms the lock is still ours. Call immediately before a write.
    ///
    /// A missing session row is how a forced unlock or remote sweep is
    /// discovered; the lock-lost handling runs before this returns false.
    pub fn verify(&self) -> bool {
        let Some(session_id) = self.session_id() else {
            return false;
        };

        match self.inner.store.session_exists(session_id) {
            Ok(true) => true,
            Ok(false) => {
                warn!(session_id = %session_id, "Write lock verification failed; session no longer exists");
                self.inner.handle_lock_lost(session_id);
                false
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "Failed to verify write lock");
                false
            }
        }
    }

    /// Deletes write-lock rows older than `timeout` and, if any went, the
    /// marker file. Returns the number of rows removed.
    pub fn cleanup_stale(&self, timeout: chrono::Duration) -> usize {
        self.inner.cleanup_stale(timeout)
    }

    /// Unconditionally removes the marker and every write-lock row.
    pub fn force_unlock(
        &self,
        admin_user_id: UserId,
        authority: &dyn AdminAuthority,
    ) -> ForceUnlockOutcome {
        if !authority.is_admin(admin_user_id) {
            warn!(user_id = %admin_user_id, "Forced unlock rejected; not an administrator");
            return ForceUnlockOutcome::Denied("Only administrators can force unlock".to_string());
        }

        let inner = &self.inner;
        let mut removed = Vec::new();

        match inner.marker.remove() {
            Ok(true) => removed.push("file lock".to_string()),
            Ok(false) => {}
            Err(err) => {
                return ForceUnlockOutcome::Denied(format!("Failed to remove lock file: {}", err))
            }
        }

        match inner.store.delete_all_write_sessions() {
            Ok(0) => {}
            Ok(count) => removed.push(format!("{} database session(s)", count)),
            Err(err) => {
                return ForceUnlockOutcome::Denied(format!(
                    "Failed to remove database sessions: {}",
                    err
                ))
            }
        }

        if removed.is_empty() {
            info!(admin_id = %admin_user_id, "Forced unlock found nothing to remove");
            ForceUnlockOutcome::NothingToRemove
        } else {
            let summary = format!("Removed: {}", removed.join(", "));
            warn!(admin_id = %admin_user_id, summary = %summary, "Forced unlock");
            ForceUnlockOutcome::Removed(summary)
        }
    }

    /// Registers the lock-lost handler, replacing any previous one.
    ///
    /// The handler may run on the heartbeat thread. Panics inside it are
    /// caught and logged.
    pub fn set_lock_lost_callback(&self, callback: impl Fn(SessionId) + Send + Sync + 'static) {
        self.inner.set_callback(Arc::new(callback));
    }

    /// Routes lock-lost events onto a channel the caller drains on its own
    /// thread. Replaces any registered callback.
    pub fn subscribe_lock_lost(&self) -> Receiver<LockLostEvent> {
        let (callback, rx) = lock_lost_channel();
        self.inner.set_callback(callback);
        rx
    }

    pub fn holder(&self) -> Option<LockHolder> {
        match self.inner.store.current_holder() {
            Ok(holder) => holder,
            Err(err) => {
                warn!(error = %err, "Failed to check lock holder");
                None
            }
        }
    }

    pub fn status(&self) -> LockStatus {
        LockStatus {
            held_locally: self.is_held(),
            holder: self.holder(),
        }
    }

    /// Periodic access check for an interactive client.
    ///
    /// Verifies a held lock, reports a loss discovered since the last poll,
    /// and takes the lock when it is free.
    pub fn poll_access_mode(&self, user_id: UserId, username: &str) -> AccessMode {
        if self.is_held() && self.verify() {
            return AccessMode::ReadWrite;
        }

        if let Some(session_id) = self.inner.take_last_lost() {
            return AccessMode::LockLost { session_id };
        }

        if self.is_held() {
            // Still ours as far as we know, but the store could not confirm it.
            return AccessMode::ReadOnly {
                holder: "write lock could not be verified".to_string(),
            };
        }

        match self.check_permission() {
            (true, _) => match self.acquire(user_id, username) {
                AcquireOutcome::Granted(_) => AccessMode::ReadWrite,
                AcquireOutcome::Denied(reason) => AccessMode::ReadOnly { holder: reason },
            },
            (false, holder) => AccessMode::ReadOnly {
                holder: holder.unwrap_or_default(),
            },
        }
    }
}

impl Drop for LockCoordinator {
    fn drop(&mut self) {
        self.release();
    }
}

impl Inner {
    fn lock_held(&self) -> MutexGuard<'_, Option<HeldLock>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_last_lost(&self) -> Option<SessionId> {
        self.last_lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_callback(&self, callback: LockLostCallback) {
        *self
            .on_lock_lost
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn remove_marker(&self, context: &str) {
        if let Err(err) = self.marker.remove() {
            warn!(
                path = %self.marker.path().display(),
                error = %err,
                "Failed to {}", context
            );
        }
    }

    fn cleanup_stale(&self, timeout: chrono::Duration) -> usize {
        let cutoff = Utc::now() - timeout;
        match self.store.delete_stale_sessions(cutoff) {
            Ok(0) => {
                self.remove_orphaned_marker(timeout);
                0
            }
            Ok(count) => {
                info!(count, "Cleaned up stale write lock(s)");
                // No way to tie the marker to a particular stale row.
                self.remove_marker("remove stale lock file");
                count
            }
            Err(err) => {
                warn!(error = %err, "Failed to clean up stale locks");
                0
            }
        }
    }

    /// Removes a marker that no write-lock row accounts for, once it is
    /// older than `timeout`. A younger one may belong to an acquire that has
    /// created its marker but not yet inserted its row.
    fn remove_orphaned_marker(&self, timeout: chrono::Duration) {
        let age = match self.marker.age() {
            Ok(Some(age)) => age,
            Ok(None) => return,
            Err(err) => {
                warn!(path = %self.marker.path().display(), error = %err, "Failed to stat lock file");
                return;
            }
        };
        if age < timeout.to_std().unwrap_or_default() {
            return;
        }
        match self.store.current_holder() {
            Ok(None) => {}
            Ok(Some(_)) => return,
            Err(err) => {
                warn!(error = %err, "Failed to check lock holder");
                return;
            }
        }

        match self.marker.remove() {
            Ok(true) => info!(
                path = %self.marker.path().display(),
                age_secs = age.as_secs(),
                "Removed orphaned lock file"
            ),
            Ok(false) => {}
            Err(err) => warn!(
                path = %self.marker.path().display(),
                error = %err,
                "Failed to remove orphaned lock file"
            ),
        }
    }

    /// Drops local state for `session_id` and notifies. Only the first
    /// caller for a given session gets past the `take`.
    fn handle_lock_lost(&self, session_id: SessionId) {
        let lost = {
            let mut held = self.lock_held();
            match held.as_ref() {
                Some(current) if current.session_id == session_id => held.take(),
                _ => None,
            }
        };
        let Some(lost) = lost else {
            return;
        };

        // Signals the ticker without joining; this may be the ticker thread.
        drop(lost.ticker);
        *self.last_lost.lock().unwrap_or_else(PoisonError::into_inner) = Some(session_id);
        warn!(
            session_id = %session_id,
            username = %lost.username,
            "Write lock lost"
        );

        self.remove_marker("remove lock file after lock loss");

        let callback = self
            .on_lock_lost
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(session_id))).is_err() {
                error!(session_id = %session_id, "Lock-lost callback panicked");
            }
        }
    }
}

fn local_machine_name() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string())
}
