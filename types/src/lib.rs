//! Core domain types for Pledge.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the workspace.

mod ids;
mod settings;

pub use ids::{DeferredId, IoId, TimerId};
pub use settings::{ClockKind, UnhandledRejectionPolicy};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Settlement status
// ============================================================================

/// Observable state of a `Deferred`.
///
/// A settlement that has been requested but whose microtask has not run yet
/// still reports `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Fulfilled,
    Rejected,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Fulfilled => "fulfilled",
            Status::Rejected => "rejected",
        }
    }

    #[must_use]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Status::Pending)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Errors and reports
// ============================================================================

/// Returned by `try_resolve` / `try_reject` once the one-shot latch has closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettleError {
    #[error("{id} already settled ({status})")]
    AlreadySettled { id: DeferredId, status: Status },
}

impl SettleError {
    #[must_use]
    pub fn id(&self) -> DeferredId {
        match self {
            SettleError::AlreadySettled { id, .. } => *id,
        }
    }
}

/// A rejection that reached a `Deferred` with neither a failure continuation
/// nor a downstream link to forward it to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhandledRejection {
    pub deferred: DeferredId,
    /// `Debug` rendering of the error value.
    pub error: String,
}

impl UnhandledRejection {
    #[must_use]
    pub fn new(deferred: DeferredId, error: impl Into<String>) -> Self {
        Self {
            deferred,
            error: error.into(),
        }
    }
}

impl fmt::Display for UnhandledRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unhandled rejection in {}: {}", self.deferred, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_settled_flags() {
        assert!(!Status::Pending.is_settled());
        assert!(Status::Fulfilled.is_settled());
        assert!(Status::Rejected.is_settled());
        assert_eq!(Status::default(), Status::Pending);
    }

    #[test]
    fn status_display_is_lowercase() {
        assert_eq!(Status::Fulfilled.to_string(), "fulfilled");
        assert_eq!(
            serde_json::to_string(&Status::Rejected).unwrap(),
            "\"rejected\""
        );
    }

    #[test]
    fn settle_error_names_the_deferred() {
        let err = SettleError::AlreadySettled {
            id: DeferredId::new(7),
            status: Status::Fulfilled,
        };
        assert_eq!(err.id(), DeferredId::new(7));
        assert_eq!(err.to_string(), "deferred#7 already settled (fulfilled)");
    }

    #[test]
    fn unhandled_rejection_display() {
        let report = UnhandledRejection::new(DeferredId::new(3), "\"boom\"");
        assert_eq!(
            report.to_string(),
            "unhandled rejection in deferred#3: \"boom\""
        );
    }
}
