//! Confirm tickets for high-risk actions
//!
//! An operator trades the configured confirm code for a ticket scoped to one
//! action label. The ticket is good for one validation attempt within its
//! TTL.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use fleet_sync::{ConfirmGate, IssuedTicket, TicketStatus};

use crate::errors::{Result, ServiceError};

#[derive(Debug, Clone)]
struct TicketRecord {
    action: String,
    expires_at: DateTime<Utc>,
}

/// In-memory store of outstanding confirm tickets
pub struct TicketBook {
    confirm_code: Option<String>,
    ttl: Duration,
    tickets: Mutex<HashMap<String, TicketRecord>>,
}

/// Compare two secrets without leaking where they differ
fn codes_match(expected: &str, received: &str) -> bool {
    let expected = expected.as_bytes();
    let received = received.as_bytes();
    if expected.len() != received.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    expected.ct_eq(received).into()
}

impl TicketBook {
    pub fn new(confirm_code: Option<String>, ttl: Duration) -> Self {
        Self {
            confirm_code: confirm_code.filter(|c| !c.is_empty()),
            ttl,
            tickets: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TicketRecord>> {
        self.tickets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Check the operator's code and issue a ticket for `action`
    pub fn issue_with_code(&self, code: &str, action: &str) -> Result<IssuedTicket> {
        let expected = self
            .confirm_code
            .as_deref()
            .ok_or(ServiceError::ConfirmDisabled)?;
        if action.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("action must not be empty".into()));
        }
        if !codes_match(expected, code) {
            warn!("Rejected confirm code for action {}", action);
            return Err(ServiceError::InvalidConfirmCode);
        }
        Ok(self.issue_at(action, Utc::now()))
    }

    pub fn issue_at(&self, action: &str, now: DateTime<Utc>) -> IssuedTicket {
        let ticket = hex::encode(rand::random::<[u8; 24]>());
        let expires_at = now + self.ttl;

        let mut tickets = self.lock();
        tickets.retain(|_, record| record.expires_at > now);
        tickets.insert(
            ticket.clone(),
            TicketRecord {
                action: action.to_string(),
                expires_at,
            },
        );
        info!("Issued confirm ticket for {} (expires {})", action, expires_at);

        IssuedTicket {
            ticket,
            action: action.to_string(),
            expires_at,
        }
    }

    pub fn validate_at(&self, ticket: &str, action: &str, now: DateTime<Utc>) -> TicketStatus {
        let record = self.lock().remove(ticket);
        let status = match record {
            None => TicketStatus::Unknown,
            Some(record) if record.expires_at <= now => TicketStatus::Expired,
            Some(record) if record.action != action => TicketStatus::Mismatched,
            Some(_) => TicketStatus::Valid,
        };
        debug!("Confirm ticket for {}: {:?}", action, status);
        status
    }

    /// Drop expired tickets, returning how many were removed
    pub fn prune_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut tickets = self.lock();
        let before = tickets.len();
        tickets.retain(|_, record| record.expires_at > now);
        before - tickets.len()
    }

    pub fn prune_expired(&self) -> usize {
        self.prune_expired_at(Utc::now())
    }

    /// Forget every outstanding ticket
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConfirmGate for TicketBook {
    fn issue(&self, action: &str) -> IssuedTicket {
        self.issue_at(action, Utc::now())
    }

    fn validate(&self, ticket: &str, action: &str) -> TicketStatus {
        self.validate_at(ticket, action, Utc::now())
    }
}
