//! Lock-lost notification.
//!
//! Loss is usually discovered on the heartbeat thread. Consumers that must do
//! their follow-up work on their own thread subscribe to a channel and drain
//! it from there instead of acting inside the callback.

use chrono::{DateTime, Utc};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use crate::types::SessionId;

/// Handler invoked once per loss event with the superseded session id.
pub type LockLostCallback = Arc<dyn Fn(SessionId) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLostEvent {
    pub session_id: SessionId,
    pub detected_at: DateTime<Utc>,
}

/// Builds a callback that posts each loss onto a channel.
pub fn lock_lost_channel() -> (LockLostCallback, Receiver<LockLostEvent>) {
    let (tx, rx) = mpsc::channel();
    let callback: LockLostCallback = Arc::new(move |session_id| {
        let event = LockLostEvent {
            session_id,
            detected_at: Utc::now(),
        };
        if tx.send(event).is_err() {
            tracing::debug!(session_id = %session_id, "Lock-lost receiver dropped");
        }
    });
    (callback, rx)
}
