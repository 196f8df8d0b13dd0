//! Plan execution
//!
//! Execution is the second half of the plan/run protocol: the caller presents
//! a plan id, its conflict decisions and a confirm ticket. The ticket is
//! checked first, then the plan is claimed (and thereby consumed), then each
//! entry is applied through the transport. Roots run concurrently; entries
//! within a root run in plan order. One failing entry never stops the rest.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::conflict::{
    alternate_name, ConflictDecisions, ConflictResolution, ConflictResolver, EffectiveAction,
};
use crate::diff::DiffEntry;
use crate::errors::{Result, SyncError};
use crate::gate::ConfirmGate;
use crate::limiter::HostLimiter;
use crate::plan::SyncPlan;
use crate::registry::PlanRegistry;
use crate::transport::{RemotePath, Transport, TransportError};

/// Action label confirm tickets must carry to run a plan
pub const SYNC_RUN_ACTION: &str = "sync.run";

/// Client request to execute a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub plan_id: String,
    #[serde(default)]
    pub conflict_resolutions: Vec<ConflictResolution>,
    pub confirm_ticket: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOutcome {
    Applied,
    Skipped,
    Failed,
}

/// Outcome of one plan entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub root: String,
    pub relative_path: String,
    pub action: EffectiveAction,
    pub outcome: EntryOutcome,
    pub error: Option<String>,
    pub bytes_transferred: u64,
}

impl ExecutionResult {
    fn applied(entry: &DiffEntry, action: EffectiveAction, bytes: u64) -> Self {
        Self {
            root: entry.root.clone(),
            relative_path: entry.relative_path.clone(),
            action,
            outcome: EntryOutcome::Applied,
            error: None,
            bytes_transferred: bytes,
        }
    }

    fn skipped(entry: &DiffEntry, action: EffectiveAction, reason: String) -> Self {
        Self {
            outcome: EntryOutcome::Skipped,
            error: Some(reason),
            ..Self::applied(entry, action, 0)
        }
    }

    fn failed(entry: &DiffEntry, action: EffectiveAction, err: &SyncError) -> Self {
        Self {
            outcome: EntryOutcome::Failed,
            error: Some(err.to_string()),
            ..Self::applied(entry, action, 0)
        }
    }
}

/// Aggregated response for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub plan_id: String,
    /// True only when every entry was applied
    pub ok: bool,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_transferred: u64,
    pub results: Vec<ExecutionResult>,
}

impl RunReport {
    fn new(plan_id: String, results: Vec<ExecutionResult>) -> Self {
        let count = |outcome| results.iter().filter(|r| r.outcome == outcome).count();
        let applied = count(EntryOutcome::Applied);
        let skipped = count(EntryOutcome::Skipped);
        let failed = count(EntryOutcome::Failed);
        let bytes_transferred = results.iter().map(|r| r.bytes_transferred).sum();

        Self {
            plan_id,
            ok: skipped == 0 && failed == 0,
            applied,
            skipped,
            failed,
            bytes_transferred,
            results,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on each copy or delete call
    pub transfer_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            transfer_timeout: Duration::from_secs(600),
        }
    }
}

/// Applies claimed plans through a transport
pub struct Executor {
    transport: Arc<dyn Transport>,
    limiter: HostLimiter,
    registry: PlanRegistry,
    gate: Arc<dyn ConfirmGate>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: HostLimiter,
        registry: PlanRegistry,
        gate: Arc<dyn ConfirmGate>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            transport,
            limiter,
            registry,
            gate,
            config,
        }
    }

    /// Validate the ticket, claim the plan and apply every entry
    pub async fn execute(&self, request: &RunRequest) -> Result<RunReport> {
        if let Err(err) = self
            .gate
            .validate(&request.confirm_ticket, SYNC_RUN_ACTION)
            .into_result()
        {
            warn!("Run of plan {} refused: {}", request.plan_id, err);
            return Err(err);
        }

        let claim = self.registry.claim(&request.plan_id)?;
        let plan: &SyncPlan = &claim;
        let decisions = ConflictResolver::validate(&plan.conflicts, &request.conflict_resolutions)?;

        info!(
            "Executing plan {} ({:?}, {} -> {}): {} entries, {}/{} conflicts decided",
            plan.plan_id,
            plan.mode,
            plan.source_server.name,
            plan.target_server.name,
            plan.entries.len(),
            decisions.len(),
            plan.conflicts.len()
        );

        let per_root = plan
            .roots
            .iter()
            .map(|root| self.execute_root(plan, root, &decisions));
        let results: Vec<ExecutionResult> =
            join_all(per_root).await.into_iter().flatten().collect();

        let report = RunReport::new(plan.plan_id.clone(), results);
        info!(
            "Plan {} finished: {} applied, {} skipped, {} failed, {} bytes",
            report.plan_id, report.applied, report.skipped, report.failed, report.bytes_transferred
        );
        Ok(report)
    }

    async fn execute_root(
        &self,
        plan: &SyncPlan,
        root: &str,
        decisions: &ConflictDecisions,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::new();
        for entry in plan.entries_for_root(root) {
            let action = ConflictResolver::effective_action(entry, decisions);
            let result = self.apply(plan, entry, action).await;
            if result.outcome == EntryOutcome::Failed {
                error!(
                    "{}/{} failed: {}",
                    entry.root,
                    entry.relative_path,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }
        results
    }

    async fn apply(
        &self,
        plan: &SyncPlan,
        entry: &DiffEntry,
        action: EffectiveAction,
    ) -> ExecutionResult {
        let source =
            RemotePath::under_root(&plan.source_server.host, &entry.root, &entry.relative_path);
        let target =
            RemotePath::under_root(&plan.target_server.host, &entry.root, &entry.relative_path);
        let source_size = entry.source_record.as_ref().map_or(0, |r| r.size_bytes);
        let target_size = entry.target_record.as_ref().map_or(0, |r| r.size_bytes);

        match action {
            EffectiveAction::Unchanged => ExecutionResult::applied(entry, action, 0),
            EffectiveAction::Unresolved => {
                let err = SyncError::UnresolvedConflict {
                    root: entry.root.clone(),
                    path: entry.relative_path.clone(),
                };
                debug!("Skipping {}", err);
                ExecutionResult::skipped(entry, action, err.to_string())
            }
            EffectiveAction::CopyToTarget => {
                self.transfer(entry, action, &source, &target, source_size)
                    .await
            }
            EffectiveAction::CopyToSource => {
                self.transfer(entry, action, &target, &source, target_size)
                    .await
            }
            EffectiveAction::DeleteOnTarget | EffectiveAction::DeleteOnSource => {
                if !plan.allow_delete {
                    warn!(
                        "Refusing delete of {}/{}: plan {} was created without allow_delete",
                        entry.root, entry.relative_path, plan.plan_id
                    );
                    return ExecutionResult::skipped(
                        entry,
                        action,
                        "deletion disabled for this plan".to_string(),
                    );
                }
                let at = if action == EffectiveAction::DeleteOnTarget {
                    &target
                } else {
                    &source
                };
                match self.guarded(&[at.host.as_str()], self.transport.delete(at)).await {
                    Ok(()) => {
                        info!("Deleted {}", at);
                        ExecutionResult::applied(entry, action, 0)
                    }
                    Err(err) => ExecutionResult::failed(entry, action, &err),
                }
            }
            EffectiveAction::KeepBoth => {
                let preserved = RemotePath::under_root(
                    &target.host,
                    &entry.root,
                    &alternate_name(&entry.relative_path, &plan.target_server.name, Utc::now()),
                );
                if let Err(err) = self
                    .guarded(&[target.host.as_str()], self.transport.copy(&target, &preserved))
                    .await
                {
                    let err = SyncError::TransferFailed(format!(
                        "could not preserve {} as {}: {}",
                        target, preserved.path, err
                    ));
                    return ExecutionResult::failed(entry, action, &err);
                }
                info!("Preserved {} as {}", target, preserved.path);
                self.transfer(entry, action, &source, &target, source_size)
                    .await
            }
        }
    }

    async fn transfer(
        &self,
        entry: &DiffEntry,
        action: EffectiveAction,
        from: &RemotePath,
        to: &RemotePath,
        bytes: u64,
    ) -> ExecutionResult {
        match self
            .guarded(&[from.host.as_str(), to.host.as_str()], self.transport.copy(from, to))
            .await
        {
            Ok(()) => {
                info!("Copied {} -> {} ({} bytes)", from, to, bytes);
                ExecutionResult::applied(entry, action, bytes)
            }
            Err(err) => ExecutionResult::failed(entry, action, &err),
        }
    }

    /// Run one transport call under the host limiter and the transfer timeout
    async fn guarded<F>(&self, hosts: &[&str], call: F) -> Result<()>
    where
        F: Future<Output = std::result::Result<(), TransportError>>,
    {
        let _permits = self.limiter.acquire(hosts).await?;
        match tokio::time::timeout(self.config.transfer_timeout, call).await {
            Err(_) => Err(SyncError::Timeout {
                what: format!("transfer on {}", hosts.join(", ")),
                timeout: self.config.transfer_timeout,
            }),
            Ok(Err(err)) => Err(SyncError::TransferFailed(err.to_string())),
            Ok(Ok(())) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictDecision;
    use crate::diff::{DiffPlanner, SyncMode};
    use crate::gate::{IssuedTicket, TicketStatus};
    use crate::memory::{MemoryTransport, TransportCall};
    use crate::plan::{Endpoint, PlanRequest, Planner};
    use crate::snapshot::{SnapshotConfig, Snapshotter};

    /// Accepts exactly the ticket "ok" for the sync action
    struct FixedGate;

    impl ConfirmGate for FixedGate {
        fn issue(&self, action: &str) -> IssuedTicket {
            IssuedTicket {
                ticket: "ok".to_string(),
                action: action.to_string(),
                expires_at: Utc::now(),
            }
        }

        fn validate(&self, ticket: &str, action: &str) -> TicketStatus {
            match (ticket, action) {
                ("ok", SYNC_RUN_ACTION) => TicketStatus::Valid,
                ("ok", _) => TicketStatus::Mismatched,
                ("stale", _) => TicketStatus::Expired,
                _ => TicketStatus::Unknown,
            }
        }
    }

    struct Harness {
        transport: Arc<MemoryTransport>,
        registry: PlanRegistry,
        planner: Planner,
        executor: Executor,
    }

    fn harness(timeout: Duration) -> Harness {
        harness_with_limit(timeout, 4)
    }

    fn harness_with_limit(timeout: Duration, per_host: usize) -> Harness {
        let transport = Arc::new(MemoryTransport::new());
        let limiter = HostLimiter::new(per_host);
        let registry = PlanRegistry::new();
        let snapshotter = Snapshotter::new(
            transport.clone(),
            limiter.clone(),
            SnapshotConfig::default(),
        );
        let planner = Planner::new(
            Arc::new(snapshotter),
            DiffPlanner::default(),
            chrono::Duration::minutes(15),
        );
        let executor = Executor::new(
            transport.clone(),
            limiter,
            registry.clone(),
            Arc::new(FixedGate),
            ExecutorConfig {
                transfer_timeout: timeout,
            },
        );
        Harness {
            transport,
            registry,
            planner,
            executor,
        }
    }

    impl Harness {
        async fn plan(&self, mode: SyncMode, allow_delete: bool) -> String {
            self.plan_roots(&["/data"], mode, allow_delete).await
        }

        async fn plan_roots(
            &self,
            roots: &[&str],
            mode: SyncMode,
            allow_delete: bool,
        ) -> String {
            let plan = self
                .planner
                .plan(PlanRequest {
                    mode,
                    source: Endpoint::new("server-1", "host-a"),
                    target: Endpoint::new("server-2", "host-b"),
                    roots: roots.iter().map(|r| r.to_string()).collect(),
                    allow_delete,
                })
                .await
                .unwrap();
            self.registry.insert(plan)
        }
    }

    fn run(plan_id: &str, resolutions: Vec<ConflictResolution>) -> RunRequest {
        RunRequest {
            plan_id: plan_id.to_string(),
            conflict_resolutions: resolutions,
            confirm_ticket: "ok".to_string(),
        }
    }

    #[tokio::test]
    async fn test_one_way_copy_applies() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_file("host-a", "/data/a.txt", &[1u8; 100], 1000);
        h.transport.put_dir("host-b", "/data", 1000);

        let plan_id = h.plan(SyncMode::OneWay, false).await;
        let report = h.executor.execute(&run(&plan_id, vec![])).await.unwrap();

        assert!(report.ok);
        assert_eq!(report.applied, 1);
        assert_eq!(report.bytes_transferred, 100);
        assert_eq!(h.transport.read("host-b", "/data/a.txt").unwrap(), vec![1u8; 100]);
    }

    #[tokio::test]
    async fn test_ticket_checked_before_claim() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_file("host-a", "/data/a.txt", b"a", 1000);
        h.transport.put_dir("host-b", "/data", 1000);
        let plan_id = h.plan(SyncMode::OneWay, false).await;

        let mut request = run(&plan_id, vec![]);
        request.confirm_ticket = "forged".to_string();
        assert!(matches!(
            h.executor.execute(&request).await,
            Err(SyncError::TicketInvalid)
        ));

        request.confirm_ticket = "stale".to_string();
        assert!(matches!(
            h.executor.execute(&request).await,
            Err(SyncError::TicketExpired)
        ));

        // The plan survived the refused attempts
        assert_eq!(h.registry.len(), 1);
        assert!(h.transport.copies().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_of_same_plan_fails() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_file("host-a", "/data/a.txt", b"a", 1000);
        h.transport.put_dir("host-b", "/data", 1000);
        let plan_id = h.plan(SyncMode::OneWay, false).await;

        h.executor.execute(&run(&plan_id, vec![])).await.unwrap();
        let second = h.executor.execute(&run(&plan_id, vec![])).await;
        assert!(matches!(second, Err(SyncError::PlanNotFound(_))));
        assert_eq!(h.transport.copies().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_conflict_is_skipped() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_file("host-a", "/data/notes.txt", b"mine", 1000);
        h.transport.put_file("host-b", "/data/notes.txt", b"theirs!", 2000);
        let plan_id = h.plan(SyncMode::Bidirectional, false).await;

        let report = h.executor.execute(&run(&plan_id, vec![])).await.unwrap();

        assert!(!report.ok);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.results[0].action, EffectiveAction::Unresolved);
        assert_eq!(report.results[0].outcome, EntryOutcome::Skipped);
        assert!(h.transport.copies().is_empty());
        assert_eq!(h.transport.read("host-b", "/data/notes.txt").unwrap(), b"theirs!");
    }

    #[tokio::test]
    async fn test_keep_b_copies_target_to_source() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_file("host-a", "/data/notes.txt", b"mine", 1000);
        h.transport.put_file("host-b", "/data/notes.txt", b"theirs!", 2000);
        let plan_id = h.plan(SyncMode::Bidirectional, false).await;

        let resolutions = vec![ConflictResolution::new(
            "/data",
            "notes.txt",
            ConflictDecision::KeepB,
        )];
        let report = h.executor.execute(&run(&plan_id, resolutions)).await.unwrap();

        assert!(report.ok);
        assert_eq!(report.results[0].action, EffectiveAction::CopyToSource);
        assert_eq!(h.transport.read("host-a", "/data/notes.txt").unwrap(), b"theirs!");
    }

    #[tokio::test]
    async fn test_keep_both_preserves_target() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_file("host-a", "/data/notes.txt", b"mine", 1000);
        h.transport.put_file("host-b", "/data/notes.txt", b"theirs!", 2000);
        let plan_id = h.plan(SyncMode::Bidirectional, false).await;

        let resolutions = vec![ConflictResolution::new(
            "/data",
            "notes.txt",
            ConflictDecision::KeepBoth,
        )];
        let report = h.executor.execute(&run(&plan_id, resolutions)).await.unwrap();
        assert!(report.ok);

        let on_target = h.transport.relative_paths("host-b", "/data");
        assert_eq!(on_target.len(), 2);
        let preserved = on_target
            .iter()
            .find(|p| p.starts_with("notes.conflict-server-2-"))
            .unwrap();
        assert_eq!(
            h.transport.read("host-b", &format!("/data/{}", preserved)).unwrap(),
            b"theirs!"
        );
        assert_eq!(h.transport.read("host-b", "/data/notes.txt").unwrap(), b"mine");
    }

    #[tokio::test]
    async fn test_resolution_for_unknown_path_rejected() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_file("host-a", "/data/notes.txt", b"mine", 1000);
        h.transport.put_file("host-b", "/data/notes.txt", b"theirs!", 2000);
        let plan_id = h.plan(SyncMode::Bidirectional, false).await;

        let resolutions = vec![ConflictResolution::new(
            "/data",
            "not-a-conflict.txt",
            ConflictDecision::KeepA,
        )];
        let err = h
            .executor
            .execute(&run(&plan_id, resolutions))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownConflict { .. }));
        assert!(h.transport.copies().is_empty());
    }

    #[tokio::test]
    async fn test_delete_only_with_plan_flag() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_dir("host-a", "/data", 1000);
        h.transport.put_file("host-b", "/data/extra.txt", b"x", 1000);

        let keep_id = h.plan(SyncMode::OneWay, false).await;
        let report = h.executor.execute(&run(&keep_id, vec![])).await.unwrap();
        assert!(report.ok);
        assert!(h.transport.deletes().is_empty());
        assert!(h.transport.exists("host-b", "/data/extra.txt"));

        let delete_id = h.plan(SyncMode::OneWay, true).await;
        let report = h.executor.execute(&run(&delete_id, vec![])).await.unwrap();
        assert!(report.ok);
        assert_eq!(report.results[0].action, EffectiveAction::DeleteOnTarget);
        assert!(!h.transport.exists("host-b", "/data/extra.txt"));
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_batch() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_file("host-a", "/data/a.txt", b"a", 1000);
        h.transport.put_file("host-a", "/data/b.txt", b"b", 1000);
        h.transport.put_file("host-a", "/data/c.txt", b"c", 1000);
        h.transport.put_dir("host-b", "/data", 1000);
        h.transport.fail_path(RemotePath::new("host-b", "/data/b.txt"));

        let plan_id = h.plan(SyncMode::OneWay, false).await;
        let report = h.executor.execute(&run(&plan_id, vec![])).await.unwrap();

        assert!(!report.ok);
        assert_eq!(report.applied, 2);
        assert_eq!(report.failed, 1);
        let outcomes: Vec<_> = report
            .results
            .iter()
            .map(|r| (r.relative_path.as_str(), r.outcome))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("a.txt", EntryOutcome::Applied),
                ("b.txt", EntryOutcome::Failed),
                ("c.txt", EntryOutcome::Applied),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_transfer_fails_only_that_entry() {
        let h = harness(Duration::from_secs(2));
        h.transport.put_file("host-a", "/data/a.txt", b"a", 1000);
        h.transport.put_dir("host-b", "/data", 1000);
        let plan_id = h.plan(SyncMode::OneWay, false).await;

        h.transport.set_delay("host-b", Duration::from_secs(30));
        let report = h.executor.execute(&run(&plan_id, vec![])).await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(report.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Timeout"));
    }

    #[tokio::test]
    async fn test_calls_are_recorded_in_plan_order() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_file("host-a", "/data/b.txt", b"b", 1000);
        h.transport.put_file("host-a", "/data/a.txt", b"a", 1000);
        h.transport.put_dir("host-b", "/data", 1000);
        let plan_id = h.plan(SyncMode::OneWay, false).await;
        h.executor.execute(&run(&plan_id, vec![])).await.unwrap();

        let copies: Vec<_> = h
            .transport
            .copies()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Copy { to, .. } => Some(to.path),
                _ => None,
            })
            .collect();
        assert_eq!(copies, vec!["/data/a.txt", "/data/b.txt"]);
    }

    #[tokio::test]
    async fn test_empty_dir_does_not_wipe_populated_target_dir() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_dir("host-a", "/data/d", 1000);
        h.transport.put_file("host-b", "/data/d/keep.txt", b"keep", 1000);

        let plan_id = h.plan(SyncMode::OneWay, false).await;
        let report = h.executor.execute(&run(&plan_id, vec![])).await.unwrap();

        assert!(report.ok);
        assert!(h.transport.copies().is_empty());
        assert_eq!(h.transport.read("host-b", "/data/d/keep.txt").unwrap(), b"keep");
    }

    #[tokio::test]
    async fn test_empty_dir_next_to_populated_dir_round_trips_files() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_dir("host-a", "/data/d", 1000);
        h.transport.put_file("host-b", "/data/d/x.txt", b"x", 1000);

        let plan_id = h.plan(SyncMode::Bidirectional, false).await;
        let report = h.executor.execute(&run(&plan_id, vec![])).await.unwrap();

        assert!(report.ok);
        assert_eq!(h.transport.read("host-a", "/data/d/x.txt").unwrap(), b"x");
        assert_eq!(h.transport.read("host-b", "/data/d/x.txt").unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_file_never_replaces_directory_without_decision() {
        let h = harness(Duration::from_secs(5));
        h.transport.put_file("host-a", "/data/d", b"file", 1000);
        h.transport.put_file("host-b", "/data/d/keep.txt", b"keep", 1000);

        for mode in [SyncMode::OneWay, SyncMode::Bidirectional] {
            let plan_id = h.plan(mode, false).await;
            let report = h.executor.execute(&run(&plan_id, vec![])).await.unwrap();

            let d = report.results.iter().find(|r| r.relative_path == "d").unwrap();
            assert_eq!(d.action, EffectiveAction::Unresolved);
            assert_eq!(d.outcome, EntryOutcome::Skipped);
            assert_eq!(h.transport.read("host-b", "/data/d/keep.txt").unwrap(), b"keep");
            assert_eq!(h.transport.read("host-a", "/data/d").unwrap(), b"file");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_limit_bounds_copies_across_roots() {
        let roots = ["/r1", "/r2", "/r3"];

        for (per_host, expected_peak) in [(1, 1), (3, 3)] {
            let h = harness_with_limit(Duration::from_secs(30), per_host);
            for root in roots {
                h.transport.put_file("host-a", &format!("{}/a.txt", root), b"a", 1000);
                h.transport.put_file("host-a", &format!("{}/b.txt", root), b"b", 1000);
                h.transport.put_dir("host-b", root, 1000);
            }
            let plan_id = h.plan_roots(&roots, SyncMode::OneWay, false).await;

            h.transport.set_delay("host-b", Duration::from_millis(50));
            let report = h.executor.execute(&run(&plan_id, vec![])).await.unwrap();

            assert!(report.ok);
            assert_eq!(report.applied, 6);
            assert_eq!(h.transport.peak_in_flight("host-b"), expected_peak);
        }
    }
}
