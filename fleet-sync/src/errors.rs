//! Error types for sync operations

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Host unreachable: {host}: {reason}")]
    HostUnreachable { host: String, reason: String },

    #[error("Root not found on {host}: {root}")]
    RootNotFound { host: String, root: String },

    #[error("Unknown plan_id: {0}")]
    PlanNotFound(String),

    #[error("Plan expired: {0}")]
    PlanExpired(String),

    #[error("Plan is already being executed: {0}")]
    PlanInUse(String),

    #[error("Unresolved conflict: {root}/{path}")]
    UnresolvedConflict { root: String, path: String },

    #[error("Conflict resolution names a path outside the plan's conflict set: {root}/{path}")]
    UnknownConflict { root: String, path: String },

    #[error("Contradictory resolutions for {root}/{path}")]
    DuplicateResolution { root: String, path: String },

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Confirm ticket invalid")]
    TicketInvalid,

    #[error("Confirm ticket expired")]
    TicketExpired,

    #[error("Timeout after {timeout:?} waiting for: {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("Invalid relative path: {0}")]
    InvalidPath(String),

    #[error("Invalid exclude pattern: {0}")]
    InvalidPattern(String),

    #[error("Snapshots describe different roots: {source_root} vs {target_root}")]
    SnapshotMismatch {
        source_root: String,
        target_root: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Stable snake_case label for this error, used in API bodies and
    /// per-root error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::HostUnreachable { .. } => "host_unreachable",
            SyncError::RootNotFound { .. } => "root_not_found",
            SyncError::PlanNotFound(_) => "plan_not_found",
            SyncError::PlanExpired(_) => "plan_expired",
            SyncError::PlanInUse(_) => "plan_in_use",
            SyncError::UnresolvedConflict { .. } => "unresolved_conflict",
            SyncError::UnknownConflict { .. } => "unknown_conflict",
            SyncError::DuplicateResolution { .. } => "duplicate_resolution",
            SyncError::TransferFailed(_) => "transfer_failed",
            SyncError::TicketInvalid => "ticket_invalid",
            SyncError::TicketExpired => "ticket_expired",
            SyncError::Timeout { .. } => "timeout",
            SyncError::InvalidPath(_) => "invalid_path",
            SyncError::InvalidPattern(_) => "invalid_pattern",
            SyncError::SnapshotMismatch { .. } => "snapshot_mismatch",
            SyncError::InvalidRequest(_) => "invalid_request",
            SyncError::Transport(_) => "transport",
            SyncError::Serialization(_) => "serialization",
            SyncError::Io(_) => "io",
        }
    }

    /// Host the failure is attributed to, when it names one
    pub fn host(&self) -> Option<&str> {
        match self {
            SyncError::HostUnreachable { host, .. } | SyncError::RootNotFound { host, .. } => {
                Some(host)
            }
            _ => None,
        }
    }

    /// Map a transport failure observed while working on `root` of `host`.
    pub fn from_transport(err: TransportError, host: &str, root: &str) -> Self {
        match err {
            TransportError::Unreachable { host, reason } => {
                SyncError::HostUnreachable { host, reason }
            }
            TransportError::NotFound { .. } => SyncError::RootNotFound {
                host: host.to_string(),
                root: root.to_string(),
            },
            TransportError::Timeout(timeout) => SyncError::Timeout {
                what: format!("{}:{}", host, root),
                timeout,
            },
            other => SyncError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
