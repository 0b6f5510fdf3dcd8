//! # writelock-core
//!
//! Advisory single-writer lock for a data file shared by several client
//! processes over a network share, with no server in the middle.
//!
//! ## Design Principles
//!
//! - **Synchronous**: blocking I/O on the caller's thread plus one heartbeat
//!   thread per held lock. Callers that need responsiveness dispatch calls
//!   themselves.
//! - **Two primitives**: the `<data file>.lock` marker's exclusive create
//!   decides races; the `sessions` row carries identity and liveness and is
//!   what everyone reads.
//! - **Liveness, not leases**: a holder that stops heartbeating is swept by
//!   whoever next looks after the stale timeout.
//! - **Loss is discovered, never announced**: a forced unlock just deletes
//!   rows; the old holder finds out on its next verify or heartbeat.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use writelock_core::{LockConfig, SharedDatabase, UserId};
//!
//! let config = LockConfig::default();
//! let db = SharedDatabase::open("/share/office/shared.db", &config)?;
//! let coordinator = Arc::new(db.coordinator(config));
//! db.attach_coordinator(Arc::clone(&coordinator))?;
//!
//! let lost = coordinator.subscribe_lock_lost();
//! if coordinator.acquire(UserId(2), "alice").is_granted() {
//!     db.write(|tx| { /* mutate */ Ok(()) })?;
//! }
//! ```

pub mod authority;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod gate;
mod heartbeat;
pub mod notify;
pub mod store;
pub mod types;

pub use authority::{AdminAuthority, AdminList};
pub use config::{load_config, LockConfig};
pub use coordinator::LockCoordinator;
pub use database::SharedDatabase;
pub use error::{Result, WriteLockError};
pub use gate::{GateDecision, WriteGate};
pub use notify::{LockLostCallback, LockLostEvent};
pub use store::{LockFileMarker, SessionStore, SqliteSessionStore};
pub use types::{
    AccessMode, AcquireOutcome, ForceUnlockOutcome, LockHolder, LockStatus, SessionId, UserId,
};
