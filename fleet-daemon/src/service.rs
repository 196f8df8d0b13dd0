//! Sync service facade
//!
//! Owns the engine pieces for the daemon's lifetime and turns loosely typed
//! API requests into engine requests: server names are resolved against the
//! configuration, omitted fields take configured defaults and `b_to_a` is
//! rewritten into a one-way plan in the other direction.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fleet_sync::plan::Endpoint;
use fleet_sync::{
    ConfirmGate, DiffPlanner, Executor, ExecutorConfig, HostLimiter, PlanRegistry, PlanRequest,
    Planner, RunReport, RunRequest, SnapshotConfig, Snapshotter, SyncMode, SyncPlan, Transport,
    SYNC_RUN_ACTION,
};

use crate::config::{Config, ServerConfig};
use crate::errors::{Result, ServiceError};
use crate::security::TicketBook;

/// Modes accepted from clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedMode {
    #[serde(alias = "a_to_b")]
    OneWay,
    Bidirectional,
    /// One-way from the second configured server to the first
    BToA,
}

impl From<RequestedMode> for SyncMode {
    fn from(mode: RequestedMode) -> Self {
        match mode {
            RequestedMode::Bidirectional => SyncMode::Bidirectional,
            RequestedMode::OneWay | RequestedMode::BToA => SyncMode::OneWay,
        }
    }
}

/// Plan request as sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPlanRequest {
    pub mode: RequestedMode,
    #[serde(default)]
    pub source_server: Option<String>,
    #[serde(default)]
    pub target_server: Option<String>,
    #[serde(default)]
    pub roots: Option<Vec<String>>,
    #[serde(default)]
    pub allow_delete: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub code: String,
    #[serde(default = "default_confirm_action")]
    pub action: String,
}

fn default_confirm_action() -> String {
    SYNC_RUN_ACTION.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmResponse {
    pub ok: bool,
    pub confirm_ticket: String,
    pub action: String,
    pub expires_in_seconds: i64,
    pub expires_at: DateTime<Utc>,
}

fn endpoint(server: &ServerConfig) -> Endpoint {
    Endpoint::new(&server.name, &server.ssh_host)
}

pub struct SyncService {
    config: Config,
    registry: PlanRegistry,
    tickets: Arc<TicketBook>,
    planner: Planner,
    executor: Executor,
}

impl SyncService {
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let limiter = HostLimiter::new(config.sync.max_concurrency_per_host);
        let registry = PlanRegistry::new();
        let tickets = Arc::new(TicketBook::new(
            config.security.operation_confirm_code.clone(),
            ChronoDuration::seconds(config.security.confirm_ttl_secs as i64),
        ));

        let snapshotter = Snapshotter::new(
            Arc::clone(&transport),
            limiter.clone(),
            SnapshotConfig {
                excludes: config.exclude_set()?,
                with_hashes: config.sync.hash_contents,
                timeout: config.snapshot_timeout(),
            },
        );
        let planner = Planner::new(
            Arc::new(snapshotter),
            DiffPlanner::new(config.sync.mtime_tolerance_secs),
            ChronoDuration::seconds(config.sync.plan_ttl_secs),
        );
        let gate: Arc<dyn ConfirmGate> = tickets.clone();
        let executor = Executor::new(
            transport,
            limiter,
            registry.clone(),
            gate,
            ExecutorConfig {
                transfer_timeout: config.transfer_timeout(),
            },
        );

        Ok(Self {
            config,
            registry,
            tickets,
            planner,
            executor,
        })
    }

    /// Snapshot both servers and store a new plan
    pub async fn plan(&self, request: SyncPlanRequest) -> Result<SyncPlan> {
        let (source, target) = self.resolve_servers(
            request.mode,
            request.source_server.as_deref(),
            request.target_server.as_deref(),
        )?;

        let roots = request
            .roots
            .unwrap_or_else(|| self.config.sync.roots.clone());
        if let Some(root) = roots.iter().find(|r| !r.starts_with('/')) {
            return Err(ServiceError::InvalidRequest(format!(
                "roots must be absolute paths: {}",
                root
            )));
        }
        let allow_delete = request.allow_delete.unwrap_or(self.config.sync.allow_delete);

        let plan = self
            .planner
            .plan(PlanRequest {
                mode: request.mode.into(),
                source: endpoint(source),
                target: endpoint(target),
                roots,
                allow_delete,
            })
            .await?;

        self.registry.insert(plan.clone());
        Ok(plan)
    }

    /// Look at a stored plan without claiming it
    pub fn preview(&self, plan_id: &str) -> Result<SyncPlan> {
        Ok(self.registry.peek(plan_id)?)
    }

    pub async fn run(&self, request: &RunRequest) -> Result<RunReport> {
        Ok(self.executor.execute(request).await?)
    }

    pub fn confirm(&self, request: &ConfirmRequest) -> Result<ConfirmResponse> {
        let issued = self.tickets.issue_with_code(&request.code, &request.action)?;
        Ok(ConfirmResponse {
            ok: true,
            confirm_ticket: issued.ticket,
            action: issued.action,
            expires_in_seconds: self.tickets.ttl().num_seconds(),
            expires_at: issued.expires_at,
        })
    }

    /// Sweep expired plans and tickets
    pub fn evict_expired(&self) -> (usize, usize) {
        let plans = self.registry.evict_expired();
        let tickets = self.tickets.prune_expired();
        if plans + tickets > 0 {
            info!("Evicted {} plans and {} tickets", plans, tickets);
        }
        (plans, tickets)
    }

    fn resolve_servers(
        &self,
        mode: RequestedMode,
        source: Option<&str>,
        target: Option<&str>,
    ) -> Result<(&ServerConfig, &ServerConfig)> {
        let servers = &self.config.servers;
        if servers.len() < 2 {
            return Err(ServiceError::InvalidRequest(
                "at least two servers are required".into(),
            ));
        }

        let source = source.filter(|s| !s.is_empty());
        let target = target.filter(|s| !s.is_empty());
        let (source, target) = match (source, target) {
            (Some(source), Some(target)) => (self.lookup(source)?, self.lookup(target)?),
            (None, None) if servers.len() > 2 => {
                return Err(ServiceError::InvalidRequest(
                    "source_server and target_server are required with more than two servers"
                        .into(),
                ));
            }
            (None, None) if mode == RequestedMode::BToA => (&servers[1], &servers[0]),
            (None, None) => (&servers[0], &servers[1]),
            _ => {
                return Err(ServiceError::InvalidRequest(
                    "source_server and target_server must be given together".into(),
                ));
            }
        };

        if source.name == target.name {
            return Err(ServiceError::InvalidRequest(
                "source_server and target_server must be different".into(),
            ));
        }
        debug!("Resolved {:?} sync {} -> {}", mode, source.name, target.name);
        Ok((source, target))
    }

    fn lookup(&self, key: &str) -> Result<&ServerConfig> {
        self.config
            .server(key)
            .ok_or_else(|| ServiceError::UnknownServer(key.to_string()))
    }
}
