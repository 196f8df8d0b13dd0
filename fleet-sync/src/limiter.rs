//! Per-host bounded concurrency
//!
//! Every remote call acquires a permit for each host it touches so that one
//! plan cannot open an unbounded number of sessions against a host.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::{Result, SyncError};

/// Hands out per-host permits, creating a semaphore the first time a host is seen
#[derive(Clone)]
pub struct HostLimiter {
    per_host: usize,
    semaphores: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.max(1),
            semaphores: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn per_host(&self) -> usize {
        self.per_host
    }

    fn semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut semaphores = self
            .semaphores
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        semaphores
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
            .clone()
    }

    /// Acquire one permit per distinct host.
    ///
    /// Hosts are locked in sorted order so two calls touching the same pair
    /// of hosts cannot deadlock each other.
    pub async fn acquire(&self, hosts: &[&str]) -> Result<Vec<OwnedSemaphorePermit>> {
        let mut sorted: Vec<&str> = hosts.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut permits = Vec::with_capacity(sorted.len());
        for host in sorted {
            let permit = self
                .semaphore(host)
                .acquire_owned()
                .await
                .map_err(|_| SyncError::Transport(format!("host limiter closed for {}", host)))?;
            permits.push(permit);
        }
        Ok(permits)
    }

    /// Permits currently free for `host`
    pub fn available(&self, host: &str) -> usize {
        self.semaphore(host).available_permits()
    }
}
