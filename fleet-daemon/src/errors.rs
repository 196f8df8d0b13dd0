//! Error types for the daemon service layer

use thiserror::Error;

use fleet_sync::SyncError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Operation confirm code is not configured")]
    ConfirmDisabled,

    #[error("Confirm code invalid")]
    InvalidConfirmCode,
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Sync(err) => err.kind(),
            ServiceError::UnknownServer(_) => "unknown_server",
            ServiceError::InvalidRequest(_) => "invalid_request",
            ServiceError::ConfirmDisabled => "confirm_disabled",
            ServiceError::InvalidConfirmCode => "invalid_confirm_code",
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
