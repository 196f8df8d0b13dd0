//! fleetsync workspace root
//!
//! Re-exports the member crates and hosts the cross-crate tests under
//! `tests/`.

pub use fleet_daemon as daemon;
pub use fleet_ssh as ssh;
pub use fleet_sync as sync;
