//! Background liveness thread for a held write lock.
//!
//! One ticker exists per held session. Every interval it checks that the
//! session row is still there and refreshes `last_heartbeat`. A missing row
//! means another actor (forced unlock, a sweep on another machine) removed
//! the lock; the ticker reports that once and exits.
//!
//! The wait between ticks is a `recv_timeout` on the stop channel, so a stop
//! request wakes the thread immediately instead of after a full interval.

use chrono::Utc;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use crate::store::SessionStore;
use crate::types::SessionId;

const THREAD_NAME: &str = "writelock-heartbeat";

pub(crate) struct HeartbeatTicker {
    session_id: SessionId,
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatTicker {
    pub(crate) fn spawn(
        store: Arc<dyn SessionStore>,
        session_id: SessionId,
        interval: Duration,
        on_lost: impl FnOnce() + Send + 'static,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                run(store.as_ref(), session_id, interval, &stop_rx, on_lost);
                let _ = done_tx.send(());
            })?;

        debug!(session_id = %session_id, interval_ms = interval.as_millis() as u64, "Heartbeat started");
        Ok(Self {
            session_id,
            stop_tx: Some(stop_tx),
            done_rx,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits up to `join_timeout` for it to exit.
    ///
    /// A thread that does not finish in time is detached.
    pub(crate) fn stop(mut self, join_timeout: Duration) {
        self.signal();

        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }

        match self.done_rx.recv_timeout(join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    warn!(session_id = %self.session_id, "Heartbeat thread panicked");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    session_id = %self.session_id,
                    timeout_ms = join_timeout.as_millis() as u64,
                    "Heartbeat thread did not stop in time; detaching"
                );
            }
        }
    }

    fn signal(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

impl Drop for HeartbeatTicker {
    fn drop(&mut self) {
        // Never joins: the ticker may be dropped from its own thread.
        self.signal();
    }
}

fn run(
    store: &dyn SessionStore,
    session_id: SessionId,
    interval: Duration,
    stop_rx: &Receiver<()>,
    on_lost: impl FnOnce(),
) {
    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        match beat(store, session_id) {
            Beat::Refreshed => {}
            Beat::Lost => {
                warn!(session_id = %session_id, "Session no longer exists; write lock was removed");
                on_lost();
                break;
            }
        }
    }
    debug!(session_id = %session_id, "Heartbeat stopped");
}

enum Beat {
    Refreshed,
    Lost,
}

fn beat(store: &dyn SessionStore, session_id: SessionId) -> Beat {
    match store.session_exists(session_id) {
        Ok(false) => return Beat::Lost,
        Ok(true) => {}
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "Heartbeat session check failed");
            return Beat::Refreshed;
        }
    }

    // A row deleted between the check and the update is caught next tick.
    match store.refresh_heartbeat(session_id, Utc::now()) {
        Ok(_) => debug!(session_id = %session_id, "Heartbeat refreshed"),
        Err(err) => warn!(session_id = %session_id, error = %err, "Heartbeat refresh failed"),
    }
    Beat::Refreshed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, WriteLockError};
    use crate::store::{NewSession, SqliteSessionStore};
    use crate::types::{LockHolder, UserId};
    use chrono::DateTime;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    fn store_with_session() -> (tempfile::TempDir, Arc<SqliteSessionStore>, SessionId) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = SqliteSessionStore::open(
            temp_dir.path().join("shared.db"),
            Duration::from_millis(5000),
        )
        .expect("store init");
        let started_at = Utc::now() - chrono::Duration::minutes(5);
        let session_id = store
            .insert_write_session(&NewSession {
                user_id: UserId(2),
                username: "alice",
                machine_name: "H1",
                started_at,
            })
            .expect("insert");
        (temp_dir, Arc::new(store), session_id)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    #[test]
    fn refreshes_last_heartbeat() {
        let (_temp_dir, store, session_id) = store_with_session();
        let before = store.current_holder().expect("holder").expect("row");

        let ticker = HeartbeatTicker::spawn(
            store.clone(),
            session_id,
            Duration::from_millis(20),
            || {},
        )
        .expect("spawn");

        let refreshed = wait_until(Duration::from_secs(2), || {
            store
                .current_holder()
                .ok()
                .flatten()
                .map(|holder| holder.last_heartbeat > before.last_heartbeat)
                .unwrap_or(false)
        });
        ticker.stop(Duration::from_secs(2));
        assert!(refreshed, "heartbeat never refreshed");
    }

    #[test]
    fn reports_lost_session_once() {
        let (_temp_dir, store, session_id) = store_with_session();
        let lost = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&lost);

        let ticker = HeartbeatTicker::spawn(
            store.clone(),
            session_id,
            Duration::from_millis(20),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .expect("spawn");

        store.delete_session(session_id).expect("delete row");
        assert!(wait_until(Duration::from_secs(2), || lost.load(Ordering::SeqCst) > 0));

        thread::sleep(Duration::from_millis(100));
        assert_eq!(lost.load(Ordering::SeqCst), 1);
        ticker.stop(Duration::from_secs(2));
    }

    /// Session store whose first `failures` existence checks error out.
    struct FlakyStore {
        failures: usize,
        checks: AtomicUsize,
        refreshes: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                checks: AtomicUsize::new(0),
                refreshes: AtomicUsize::new(0),
            }
        }
    }

    impl SessionStore for FlakyStore {
        fn insert_write_session(&self, _: &NewSession<'_>) -> Result<SessionId> {
            Ok(SessionId(1))
        }
        fn current_holder(&self) -> Result<Option<LockHolder>> {
            Ok(None)
        }
        fn session_exists(&self, _: SessionId) -> Result<bool> {
            if self.checks.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(WriteLockError::storage(
                    "query write-lock session",
                    rusqlite::Error::InvalidQuery,
                ));
            }
            Ok(true)
        }
        fn refresh_heartbeat(&self, _: SessionId, _: DateTime<Utc>) -> Result<bool> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
        fn delete_session(&self, _: SessionId) -> Result<bool> {
            Ok(false)
        }
        fn delete_stale_sessions(&self, _: DateTime<Utc>) -> Result<usize> {
            Ok(0)
        }
        fn delete_all_write_sessions(&self) -> Result<usize> {
            Ok(0)
        }
    }

    /// Session store whose existence check blocks until released.
    struct StuckStore {
        entered: AtomicBool,
        release_rx: Mutex<Receiver<()>>,
    }

    impl SessionStore for StuckStore {
        fn insert_write_session(&self, _: &NewSession<'_>) -> Result<SessionId> {
            Ok(SessionId(1))
        }
        fn current_holder(&self) -> Result<Option<LockHolder>> {
            Ok(None)
        }
        fn session_exists(&self, _: SessionId) -> Result<bool> {
            self.entered.store(true, Ordering::SeqCst);
            let release_rx = self.release_rx.lock().expect("release lock");
            let _ = release_rx.recv_timeout(Duration::from_secs(10));
            Ok(true)
        }
        fn refresh_heartbeat(&self, _: SessionId, _: DateTime<Utc>) -> Result<bool> {
            Ok(true)
        }
        fn delete_session(&self, _: SessionId) -> Result<bool> {
            Ok(false)
        }
        fn delete_stale_sessions(&self, _: DateTime<Utc>) -> Result<usize> {
            Ok(0)
        }
        fn delete_all_write_sessions(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn storage_errors_do_not_stop_ticks() {
        let store = Arc::new(FlakyStore::new(3));
        let lost = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&lost);

        let ticker = HeartbeatTicker::spawn(
            store.clone(),
            SessionId(1),
            Duration::from_millis(20),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .expect("spawn");

        let recovered = wait_until(Duration::from_secs(2), || {
            store.refreshes.load(Ordering::SeqCst) >= 2
        });
        ticker.stop(Duration::from_secs(2));

        assert!(recovered, "ticker stopped after storage errors");
        assert!(store.checks.load(Ordering::SeqCst) >= 5);
        assert_eq!(lost.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_detaches_thread_stuck_in_storage() {
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(StuckStore {
            entered: AtomicBool::new(false),
            release_rx: Mutex::new(release_rx),
        });

        let ticker = HeartbeatTicker::spawn(
            store.clone(),
            SessionId(1),
            Duration::from_millis(10),
            || {},
        )
        .expect("spawn");
        assert!(wait_until(Duration::from_secs(2), || {
            store.entered.load(Ordering::SeqCst)
        }));

        let started = Instant::now();
        ticker.stop(Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));

        let _ = release_tx.send(());
    }

    #[test]
    fn stop_interrupts_long_interval() {
        let (_temp_dir, store, session_id) = store_with_session();
        let ticker = HeartbeatTicker::spawn(store, session_id, Duration::from_secs(600), || {})
            .expect("spawn");

        let started = Instant::now();
        ticker.stop(Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
