use std::path::Path;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use writelock_core::{
    AcquireOutcome, AdminList, ForceUnlockOutcome, LockConfig, Result, SharedDatabase, UserId,
    WriteLockError,
};

const HOLD_POLL: Duration = Duration::from_secs(1);

pub fn init(data_file: &Path, config: &LockConfig) -> Result<()> {
    let db = SharedDatabase::open(data_file, config)?;
    println!("Initialized {}", db.path().display());
    Ok(())
}

pub fn status(data_file: &Path, config: LockConfig, json: bool) -> Result<()> {
    let db = SharedDatabase::open(data_file, &config)?;
    let coordinator = db.coordinator(config);
    let status = coordinator.status();

    if json {
        let rendered =
            serde_json::to_string_pretty(&status).map_err(|err| WriteLockError::Operation {
                context: "render status".to_string(),
                message: err.to_string(),
            })?;
        println!("{}", rendered);
        return Ok(());
    }

    match status.holder {
        Some(holder) => println!(
            "Locked by {} (session {}, since {}, last heartbeat {})",
            holder.describe(),
            holder.session_id,
            holder.started_at.to_rfc3339(),
            holder.last_heartbeat.to_rfc3339()
        ),
        None if coordinator.marker().exists() => println!(
            "Unlocked, but {} is present (run sweep or force-unlock)",
            coordinator.marker().path().display()
        ),
        None => println!("Unlocked"),
    }
    Ok(())
}

/// Holds the lock until `seconds` pass or another actor takes it away.
pub fn hold(
    data_file: &Path,
    config: LockConfig,
    user_id: i64,
    username: &str,
    seconds: u64,
) -> Result<()> {
    let db = SharedDatabase::open(data_file, &config)?;
    let coordinator = db.coordinator(config);

    let session_id = match coordinator.acquire(UserId(user_id), username) {
        AcquireOutcome::Granted(session_id) => session_id,
        AcquireOutcome::Denied(reason) => {
            return Err(WriteLockError::Operation {
                context: "acquire write lock".to_string(),
                message: reason,
            })
        }
    };
    let lost = coordinator.subscribe_lock_lost();
    println!("Holding write lock (session {})", session_id);

    let deadline = Instant::now() + Duration::from_secs(seconds);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match lost.recv_timeout(remaining.min(HOLD_POLL)) {
            Ok(event) => {
                println!(
                    "Write lock lost (session {}, detected {})",
                    event.session_id,
                    event.detected_at.to_rfc3339()
                );
                return Ok(());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    coordinator.release();
    println!("Released write lock (session {})", session_id);
    Ok(())
}

pub fn sweep(data_file: &Path, mut config: LockConfig, timeout_minutes: Option<u64>) -> Result<()> {
    if let Some(minutes) = timeout_minutes {
        config.stale_timeout_minutes = minutes;
    }
    let timeout = config.stale_timeout();
    let db = SharedDatabase::open(data_file, &config)?;
    let coordinator = db.coordinator(config);

    let removed = coordinator.cleanup_stale(timeout);
    println!("Removed {} stale write lock(s)", removed);
    Ok(())
}

pub fn force_unlock(data_file: &Path, config: LockConfig, admin_id: i64) -> Result<()> {
    let admins = AdminList::new(config.admin_user_ids.iter().copied());
    let db = SharedDatabase::open(data_file, &config)?;
    let coordinator = db.coordinator(config);

    match coordinator.force_unlock(UserId(admin_id), &admins) {
        ForceUnlockOutcome::Denied(reason) => Err(WriteLockError::Operation {
            context: "force unlock".to_string(),
            message: reason,
        }),
        outcome => {
            println!("{}", outcome.message());
            Ok(())
        }
    }
}
