//! Shared fixtures for cross-crate tests

use std::sync::Arc;

use anyhow::Result;

use fleet_daemon::{
    Config, ConfirmRequest, RequestedMode, ServerConfig, SyncPlanRequest, SyncService,
};
use fleet_sync::{
    ConflictResolution, MemoryTransport, RunReport, RunRequest, SyncPlan, SYNC_RUN_ACTION,
};

pub const HOST_A: &str = "root@10.0.0.1";
pub const HOST_B: &str = "root@10.0.0.2";
pub const CONFIRM_CODE: &str = "2468";

/// Two-server fleet over an in-memory transport
pub struct TestFleet {
    pub transport: Arc<MemoryTransport>,
    pub service: SyncService,
}

impl TestFleet {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        config.servers = vec![
            ServerConfig::new("server-1", HOST_A),
            ServerConfig::new("server-2", HOST_B),
        ];
        config.sync.roots = vec!["/data".to_string()];
        config.security.operation_confirm_code = Some(CONFIRM_CODE.to_string());
        adjust(&mut config);

        let transport = Arc::new(MemoryTransport::new());
        transport.add_host(HOST_A);
        transport.add_host(HOST_B);
        let service = SyncService::new(config, transport.clone()).expect("valid test config");
        Self { transport, service }
    }

    pub async fn plan(&self, mode: RequestedMode, allow_delete: Option<bool>) -> Result<SyncPlan> {
        Ok(self
            .service
            .plan(SyncPlanRequest {
                mode,
                source_server: None,
                target_server: None,
                roots: None,
                allow_delete,
            })
            .await?)
    }

    pub fn ticket(&self) -> Result<String> {
        let confirm = self.service.confirm(&ConfirmRequest {
            code: CONFIRM_CODE.to_string(),
            action: SYNC_RUN_ACTION.to_string(),
        })?;
        Ok(confirm.confirm_ticket)
    }

    pub async fn run(
        &self,
        plan_id: &str,
        resolutions: Vec<ConflictResolution>,
    ) -> Result<RunReport> {
        let request = RunRequest {
            plan_id: plan_id.to_string(),
            conflict_resolutions: resolutions,
            confirm_ticket: self.ticket()?,
        };
        Ok(self.service.run(&request).await?)
    }
}
