//! The single check in front of every mutating data-access call.
//!
//! Before a coordinator is attached the gate is in its bootstrap phase
//! (schema creation, seeding) and lets every write through. Attaching ends
//! that phase for good.

use std::sync::{Arc, OnceLock};

use crate::coordinator::LockCoordinator;
use crate::error::{Result, WriteLockError};

const DENIED_REASON: &str = "You no longer have write access to the database. \
     Your write lock has been removed (possibly by an administrator).";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// No coordinator attached yet.
    Bypassed,
    Allowed,
    Denied(String),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, GateDecision::Denied(_))
    }
}

#[derive(Default)]
pub struct WriteGate {
    coordinator: OnceLock<Arc<LockCoordinator>>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the coordinator; enforcement starts with the next check.
    pub fn attach(&self, coordinator: Arc<LockCoordinator>) -> Result<()> {
        self.coordinator
            .set(coordinator)
            .map_err(|_| WriteLockError::CoordinatorAlreadyAttached)?;
        tracing::debug!("Write gate enforcing");
        Ok(())
    }

    pub fn is_bootstrap(&self) -> bool {
        self.coordinator.get().is_none()
    }

    pub fn coordinator(&self) -> Option<&Arc<LockCoordinator>> {
        self.coordinator.get()
    }

    pub fn check(&self) -> GateDecision {
        match self.coordinator.get() {
            None => GateDecision::Bypassed,
            Some(coordinator) if coordinator.verify() => GateDecision::Allowed,
            Some(_) => GateDecision::Denied(DENIED_REASON.to_string()),
        }
    }

    /// Like [`check`](Self::check) but fails with `WriteDenied`.
    pub fn ensure(&self) -> Result<()> {
        match self.check() {
            GateDecision::Denied(reason) => {
                tracing::warn!("Write denied by gate");
                Err(WriteLockError::WriteDenied { reason })
            }
            GateDecision::Allowed | GateDecision::Bypassed => Ok(()),
        }
    }
}
