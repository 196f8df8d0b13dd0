//! fleetsync daemon
//!
//! Wires the sync engine to its production collaborators: configuration from
//! TOML, the ssh transport, the confirm ticket book and the HTTP API.

pub mod api;
pub mod config;
pub mod errors;
pub mod security;
pub mod service;

pub use api::{router, ApiError};
pub use config::{default_config_path, Config, ServerConfig};
pub use errors::{Result, ServiceError};
pub use security::TicketBook;
pub use service::{
    ConfirmRequest, ConfirmResponse, RequestedMode, SyncPlanRequest, SyncService,
};
