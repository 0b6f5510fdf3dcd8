//! Lock timing and identity configuration.
//!
//! Loaded from TOML; every field has a default so a missing file (or a file
//! that only sets a few keys) is fine.
//!
//! ```toml
//! stale_timeout_minutes = 10
//! heartbeat_interval_secs = 30
//! admin_user_ids = [1]
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WriteLockError};

pub const DEFAULT_STALE_TIMEOUT_MINUTES: u64 = 10;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_RELEASE_JOIN_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
/// One year; also the clamp applied by [`LockConfig::stale_timeout`].
pub const MAX_STALE_TIMEOUT_MINUTES: u64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    /// A write-lock row whose heartbeat is older than this is swept.
    pub stale_timeout_minutes: u64,
    pub heartbeat_interval_secs: u64,
    /// Upper bound on waiting for the heartbeat thread during release.
    pub release_join_timeout_ms: u64,
    /// SQLite busy timeout applied to every connection.
    pub busy_timeout_ms: u64,
    /// Overrides the detected host name recorded with the session.
    pub machine_name: Option<String>,
    pub admin_user_ids: Vec<i64>,

    // Finer than a second; only settable from code (tests, embedding hosts).
    #[serde(skip)]
    heartbeat_override: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_timeout_minutes: DEFAULT_STALE_TIMEOUT_MINUTES,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            release_join_timeout_ms: DEFAULT_RELEASE_JOIN_TIMEOUT_MS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            machine_name: None,
            admin_user_ids: Vec::new(),
            heartbeat_override: None,
        }
    }
}

impl LockConfig {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_override = Some(interval);
        self
    }

    pub fn with_machine_name(mut self, name: impl Into<String>) -> Self {
        self.machine_name = Some(name.into());
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_override
            .unwrap_or_else(|| Duration::from_secs(self.heartbeat_interval_secs))
    }

    pub fn stale_timeout(&self) -> chrono::Duration {
        let minutes = self.stale_timeout_minutes.min(MAX_STALE_TIMEOUT_MINUTES);
        chrono::Duration::minutes(i64::try_from(minutes).unwrap_or(i64::MAX / 60))
    }

    pub fn release_join_timeout(&self) -> Duration {
        Duration::from_millis(self.release_join_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Rejects timings under which a live holder would be swept or the
    /// heartbeat would spin against the shared file.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(1..=MAX_STALE_TIMEOUT_MINUTES).contains(&self.stale_timeout_minutes) {
            return Err(format!(
                "stale_timeout_minutes must be between 1 and {}",
                MAX_STALE_TIMEOUT_MINUTES
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err("heartbeat_interval_secs must be at least 1".to_string());
        }
        if self.heartbeat_interval_secs >= self.stale_timeout_minutes * 60 {
            return Err(format!(
                "heartbeat_interval_secs ({}) must be shorter than the stale timeout ({} min)",
                self.heartbeat_interval_secs, self.stale_timeout_minutes
            ));
        }
        Ok(())
    }
}

/// Returns `~/.writelock/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".writelock").join("config.toml"))
}

/// Loads the config at `path` (or the default location), returning defaults
/// when the file doesn't exist.
pub fn load_config(path: Option<&Path>) -> Result<LockConfig> {
    let config_path = match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => path,
        None => return Ok(LockConfig::default()),
    };

    if !config_path.exists() {
        return Ok(LockConfig::default());
    }

    let content = fs_err::read_to_string(&config_path)
        .map_err(|err| WriteLockError::io("read lock config", err))?;
    let config = match toml::from_str::<LockConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            return Err(WriteLockError::ConfigMalformed {
                path: config_path,
                details: err.to_string(),
            })
        }
    };
    if let Err(details) = config.validate() {
        return Err(WriteLockError::ConfigMalformed {
            path: config_path,
            details,
        });
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config, LockConfig::default());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.stale_timeout(), chrono::Duration::minutes(10));
    }

    #[test]
    fn load_config_parses_partial_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
stale_timeout_minutes = 3
machine_name = "FRONT-DESK"
admin_user_ids = [1, 7]
"#,
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config.stale_timeout_minutes, 3);
        assert_eq!(config.heartbeat_interval_secs, DEFAULT_HEARTBEAT_INTERVAL_SECS);
        assert_eq!(config.machine_name.as_deref(), Some("FRONT-DESK"));
        assert_eq!(config.admin_user_ids, vec![1, 7]);
    }

    #[test]
    fn load_config_rejects_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "stale_timeout_minutes = \"soon\"").expect("write config");

        let err = load_config(Some(&path)).expect_err("malformed config");
        assert!(matches!(err, WriteLockError::ConfigMalformed { .. }));
    }

    #[test]
    fn load_config_rejects_unsafe_timings() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");

        for body in [
            "stale_timeout_minutes = 0",
            "stale_timeout_minutes = 18446744073709551615",
            "heartbeat_interval_secs = 0",
            "stale_timeout_minutes = 1\nheartbeat_interval_secs = 60",
        ] {
            fs_err::write(&path, body).expect("write config");
            let err = load_config(Some(&path)).expect_err(body);
            assert!(
                matches!(err, WriteLockError::ConfigMalformed { .. }),
                "{}: {}",
                body,
                err
            );
        }
    }

    #[test]
    fn stale_timeout_never_wraps() {
        let config = LockConfig {
            stale_timeout_minutes: u64::MAX,
            ..LockConfig::default()
        };
        assert_eq!(
            config.stale_timeout(),
            chrono::Duration::minutes(MAX_STALE_TIMEOUT_MINUTES as i64)
        );
        assert!(config.stale_timeout() > chrono::Duration::zero());
    }

    #[test]
    fn heartbeat_override_wins_over_seconds() {
        let config = LockConfig::default().with_heartbeat_interval(Duration::from_millis(50));
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(50));
    }
}
