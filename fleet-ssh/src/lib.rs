//! ssh/rsync transport for fleetsync
//!
//! Hosts are addressed by whatever the local ssh client accepts
//! (`user@host`, an alias from `~/.ssh/config`). Every process is spawned
//! with a timeout and killed when it expires.

pub mod config;
pub mod runner;
pub mod transport;

pub use config::SshConfig;
pub use runner::{SshRunner, SSH_CONNECTION_FAILED};
pub use transport::SshTransport;
