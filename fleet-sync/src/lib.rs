//! Plan-and-confirm directory reconciliation engine
//!
//! This crate holds everything about fleet sync that does not depend on how
//! hosts are reached:
//! - Tree snapshots with exclusion filtering
//! - Per-root diffing into a total, ordered action list
//! - Plan generation, storage and single-use claims
//! - Conflict arbitration driven by explicit client decisions
//! - Execution of claimed plans under per-host concurrency limits
//!
//! Remote effects go through the [`Transport`] trait; `fleet-ssh` provides
//! the production implementation and [`memory::MemoryTransport`] a scripted
//! one.

pub mod conflict;
pub mod diff;
pub mod errors;
pub mod executor;
pub mod gate;
pub mod limiter;
pub mod memory;
pub mod plan;
pub mod registry;
pub mod snapshot;
pub mod transport;

pub use conflict::{
    alternate_name, ConflictDecision, ConflictDecisions, ConflictResolution, ConflictResolver,
    EffectiveAction,
};
pub use diff::{
    DiffAction, DiffEntry, DiffPlanner, RootSummary, SyncMode, DEFAULT_MTIME_TOLERANCE_SECS,
};
pub use errors::{Result, SyncError};
pub use executor::{
    EntryOutcome, ExecutionResult, Executor, ExecutorConfig, RunReport, RunRequest,
    SYNC_RUN_ACTION,
};
pub use gate::{ConfirmGate, IssuedTicket, TicketStatus};
pub use limiter::HostLimiter;
pub use memory::{MemoryTransport, TransportCall};
pub use plan::{
    generate_plan_id, Endpoint, PlanRequest, Planner, RootError, SyncPlan, DEFAULT_PLAN_TTL_SECS,
};
pub use registry::{PlanClaim, PlanRegistry};
pub use snapshot::{
    validate_relative_path, ExcludeSet, FileRecord, SnapshotConfig, Snapshotter, TreeSnapshot,
};
pub use transport::{
    join_root, shell_quote, CommandOutput, RemotePath, Transport, TransportError,
};
