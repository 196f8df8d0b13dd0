//! Plan generation
//!
//! A plan is built by snapshotting every requested root on both hosts,
//! diffing each pair and collecting the conflicts. A root whose snapshot
//! fails is reported in `root_errors` and contributes no entries; the other
//! roots of the same request are unaffected.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::conflict::{ConflictDecision, ConflictResolver};
use crate::diff::{DiffAction, DiffEntry, DiffPlanner, RootSummary, SyncMode};
use crate::errors::{Result, SyncError};
use crate::snapshot::Snapshotter;

/// Default lifetime of an unexecuted plan
pub const DEFAULT_PLAN_TTL_SECS: i64 = 900;

/// A host taking part in a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Label shown to operators and used to tag keep_both copies
    pub name: String,
    /// Address handed to the transport
    pub host: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
        }
    }
}

/// A root that could not be snapshotted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootError {
    pub root: String,
    pub host: Option<String>,
    pub kind: String,
    pub message: String,
}

impl RootError {
    pub fn new(root: &str, err: &SyncError) -> Self {
        Self {
            root: root.to_string(),
            host: err.host().map(str::to_string),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Reviewable set of per-path actions between two hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPlan {
    pub plan_id: String,
    pub mode: SyncMode,
    pub source_server: Endpoint,
    pub target_server: Endpoint,
    pub roots: Vec<String>,
    /// Captured at plan time; the executor never consults any other value
    pub allow_delete: bool,
    pub entries: Vec<DiffEntry>,
    pub conflicts: Vec<DiffEntry>,
    pub conflict_choices: Vec<ConflictDecision>,
    pub summaries: Vec<RootSummary>,
    pub root_errors: Vec<RootError>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SyncPlan {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Entries that are not `unchanged`
    pub fn pending_entries(&self) -> impl Iterator<Item = &DiffEntry> {
        self.entries
            .iter()
            .filter(|e| e.action != DiffAction::Unchanged)
    }

    pub fn entries_for_root<'a>(&'a self, root: &'a str) -> impl Iterator<Item = &'a DiffEntry> {
        self.entries.iter().filter(move |e| e.root == root)
    }
}

/// Inputs for one plan
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub mode: SyncMode,
    pub source: Endpoint,
    pub target: Endpoint,
    pub roots: Vec<String>,
    pub allow_delete: bool,
}

/// Generate an opaque, unguessable plan identifier
pub fn generate_plan_id() -> String {
    hex::encode(rand::random::<[u8; 12]>())
}

/// Builds plans from live snapshots
pub struct Planner {
    snapshotter: Arc<Snapshotter>,
    diff: DiffPlanner,
    ttl: ChronoDuration,
}

impl Planner {
    pub fn new(snapshotter: Arc<Snapshotter>, diff: DiffPlanner, ttl: ChronoDuration) -> Self {
        Self {
            snapshotter,
            diff,
            ttl,
        }
    }

    pub async fn plan(&self, request: PlanRequest) -> Result<SyncPlan> {
        if request.roots.is_empty() {
            return Err(SyncError::InvalidRequest("at least one root is required".into()));
        }
        if request.source.host == request.target.host {
            return Err(SyncError::InvalidRequest(
                "source and target must be different hosts".into(),
            ));
        }

        let mut roots: Vec<String> = Vec::with_capacity(request.roots.len());
        for root in &request.roots {
            if !roots.contains(root) {
                roots.push(root.clone());
            }
        }

        info!(
            "Planning {:?} sync {} -> {} over {} roots (allow_delete={})",
            request.mode,
            request.source.name,
            request.target.name,
            roots.len(),
            request.allow_delete
        );

        let per_root = roots.iter().map(|root| self.plan_root(&request, root));
        let outcomes = join_all(per_root).await;

        let mut entries = Vec::new();
        let mut root_errors = Vec::new();
        for (root, outcome) in roots.iter().zip(outcomes) {
            match outcome {
                Ok(root_entries) => entries.extend(root_entries),
                Err(err) => {
                    warn!("Root {} skipped in plan: {}", root, err);
                    root_errors.push(RootError::new(root, &err));
                }
            }
        }

        let summaries = roots
            .iter()
            .filter(|root| !root_errors.iter().any(|e| &e.root == *root))
            .map(|root| RootSummary::from_entries(root, &entries))
            .collect();
        let conflicts = ConflictResolver::conflicts(&entries);
        let created_at = Utc::now();

        let plan = SyncPlan {
            plan_id: generate_plan_id(),
            mode: request.mode,
            source_server: request.source,
            target_server: request.target,
            roots,
            allow_delete: request.allow_delete,
            entries,
            conflicts,
            conflict_choices: ConflictDecision::ALL.to_vec(),
            summaries,
            root_errors,
            created_at,
            expires_at: created_at + self.ttl,
        };

        info!(
            "Plan {} ready: {} entries ({} pending), {} conflicts, {} root errors",
            plan.plan_id,
            plan.entries.len(),
            plan.pending_entries().count(),
            plan.conflicts.len(),
            plan.root_errors.len()
        );

        Ok(plan)
    }

    async fn plan_root(&self, request: &PlanRequest, root: &str) -> Result<Vec<DiffEntry>> {
        let (source, target) = tokio::try_join!(
            self.snapshotter.capture(&request.source.host, root),
            self.snapshotter.capture(&request.target.host, root),
        )?;
        self.diff
            .compute(&source, &target, request.mode, request.allow_delete)
    }
}
