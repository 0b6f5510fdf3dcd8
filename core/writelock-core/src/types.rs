//! Shared value types for the write lock.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;

/// Row identity of a write-lock session in the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The current write-lock holder as recorded in the session row-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockHolder {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub machine_name: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl LockHolder {
    /// Human-readable holder, e.g. `alice on H1`.
    pub fn describe(&self) -> String {
        format!("{} on {}", self.username, self.machine_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    /// This process holds the lock.
    pub held_locally: bool,
    pub holder: Option<LockHolder>,
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        self.held_locally || self.holder.is_some()
    }
}

/// What a client may currently do with the shared data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AccessMode {
    ReadWrite,
    ReadOnly { holder: String },
    /// Another actor removed our lock since the last poll.
    LockLost { session_id: SessionId },
}

impl AccessMode {
    pub fn can_write(&self) -> bool {
        matches!(self, AccessMode::ReadWrite)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted(SessionId),
    Denied(String),
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceUnlockOutcome {
    /// Summary of what was removed, e.g. `Removed: file lock, 1 database session(s)`.
    Removed(String),
    NothingToRemove,
    Denied(String),
}

impl ForceUnlockOutcome {
    pub fn is_ok(&self) -> bool {
        !matches!(self, ForceUnlockOutcome::Denied(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ForceUnlockOutcome::Removed(summary) => summary,
            ForceUnlockOutcome::NothingToRemove => "No locks found to remove",
            ForceUnlockOutcome::Denied(reason) => reason,
        }
    }
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2026, 1, 31, 9, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 31, 10, 0, 0).unwrap();
        assert!(format_timestamp(early) < format_timestamp(late));
        assert_eq!(format_timestamp(late), "2026-01-31T10:00:00.000Z");
        assert_eq!(parse_timestamp(&format_timestamp(late)), Some(late));
    }

    #[test]
    fn force_unlock_messages() {
        assert_eq!(
            ForceUnlockOutcome::NothingToRemove.message(),
            "No locks found to remove"
        );
        assert!(ForceUnlockOutcome::NothingToRemove.is_ok());
        assert!(!ForceUnlockOutcome::Denied("no".into()).is_ok());
    }

    #[test]
    fn access_mode_serializes_with_tag() {
        let json = serde_json::to_string(&AccessMode::ReadOnly {
            holder: "alice on H1".to_string(),
        })
        .expect("serialize");
        assert_eq!(json, r#"{"mode":"read_only","holder":"alice on H1"}"#);
    }
}
