//! Operation status state machine.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an [`crate::Operation`].
///
/// The user-visible states map directly onto these variants: `pending` and
/// `error` read as "pending", `processing` as "syncing", `failed` as
/// "needs attention" and `conflict` as "needs resolution".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Queued and waiting for a drain.
    Pending,
    /// Currently being replayed.
    Processing,
    /// Applied by the server.
    Completed,
    /// Last attempt failed transiently; eligible for retry after backoff.
    Error,
    /// Terminal failure; needs manual retry or purge.
    Failed,
    /// Concurrent edit detected; needs resolution.
    Conflict,
    /// Overridden by another operation.
    Superseded,
}

impl OperationStatus {
    /// Every status, in declaration order.
    pub const ALL: [OperationStatus; 7] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Error,
        Self::Failed,
        Self::Conflict,
        Self::Superseded,
    ];

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
            Self::Superseded => "superseded",
        }
    }

    /// `completed` and `superseded` records are never resubmitted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Superseded)
    }

    /// Statuses a drain picks up.
    #[must_use]
    pub const fn is_drainable(self) -> bool {
        matches!(self, Self::Pending | Self::Error)
    }

    /// Statuses that wait for a person: retained until retried or purged.
    #[must_use]
    pub const fn needs_attention(self) -> bool {
        matches!(self, Self::Failed | Self::Conflict)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Re-asserting the current status is always allowed so audit fields can
    /// be patched.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use OperationStatus::*;
        if self == next {
            return true;
        }
        match self {
            Pending => matches!(next, Processing | Completed | Failed | Conflict | Superseded),
            Processing => {
                matches!(next, Completed | Error | Failed | Conflict | Pending | Superseded)
            }
            Error => matches!(next, Processing | Failed | Pending | Superseded),
            Failed => matches!(next, Pending | Superseded),
            Conflict => matches!(next, Superseded | Completed | Pending),
            Completed | Superseded => false,
        }
    }

    /// Checks a transition, returning a typed error when it is forbidden.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidTransition`].
    pub fn check_transition(self, next: Self) -> ProtocolResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ProtocolError::InvalidStatus(s.to_string()))
    }
}
