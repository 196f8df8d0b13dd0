//! Confirmation gate consumed by the executor
//!
//! High-risk actions require a short-lived ticket that was issued for that
//! exact action label. The engine only validates; issuing (and whatever
//! proof of intent precedes it) belongs to the security collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};

/// Outcome of checking a confirm ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Valid,
    Expired,
    /// Issued for a different action label
    Mismatched,
    /// Never issued, or already used
    Unknown,
}

impl TicketStatus {
    pub fn into_result(self) -> Result<()> {
        match self {
            TicketStatus::Valid => Ok(()),
            TicketStatus::Expired => Err(SyncError::TicketExpired),
            TicketStatus::Mismatched | TicketStatus::Unknown => Err(SyncError::TicketInvalid),
        }
    }
}

/// A freshly issued ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedTicket {
    pub ticket: String,
    pub action: String,
    pub expires_at: DateTime<Utc>,
}

/// Security collaborator
pub trait ConfirmGate: Send + Sync {
    /// Issue a single-use ticket scoped to `action`
    fn issue(&self, action: &str) -> IssuedTicket;

    /// Check and consume `ticket` for `action`.
    ///
    /// A ticket is spent by the first validation attempt whatever its
    /// outcome, so a captured ticket cannot be tested or replayed.
    fn validate(&self, ticket: &str, action: &str) -> TicketStatus;
}
