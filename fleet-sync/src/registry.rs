//! Plan storage with single-use claims
//!
//! The registry is an ordinary value: the daemon builds one for its lifetime
//! and tests build as many isolated ones as they like. Claiming removes the
//! plan from the map and marks its id in flight under a single lock, so of
//! any number of concurrent claimants exactly one receives the plan.

use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::errors::{Result, SyncError};
use crate::plan::SyncPlan;

#[derive(Default)]
struct RegistryState {
    plans: HashMap<String, SyncPlan>,
    in_flight: HashSet<String>,
}

/// Process-wide store of generated plans
#[derive(Clone, Default)]
pub struct PlanRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a plan and return its id
    pub fn insert(&self, plan: SyncPlan) -> String {
        let plan_id = plan.plan_id.clone();
        debug!("Registering plan {} (expires {})", plan_id, plan.expires_at);
        self.lock().plans.insert(plan_id.clone(), plan);
        plan_id
    }

    /// Look at a plan without claiming it
    pub fn peek(&self, plan_id: &str) -> Result<SyncPlan> {
        self.peek_at(plan_id, Utc::now())
    }

    pub fn peek_at(&self, plan_id: &str, now: DateTime<Utc>) -> Result<SyncPlan> {
        let mut state = self.lock();
        if state.in_flight.contains(plan_id) {
            return Err(SyncError::PlanInUse(plan_id.to_string()));
        }
        match state.plans.get(plan_id) {
            None => Err(SyncError::PlanNotFound(plan_id.to_string())),
            Some(plan) if plan.is_expired_at(now) => {
                state.plans.remove(plan_id);
                Err(SyncError::PlanExpired(plan_id.to_string()))
            }
            Some(plan) => Ok(plan.clone()),
        }
    }

    /// Take a plan for execution.
    ///
    /// The plan leaves the registry on this call whatever happens next. While
    /// the returned claim is alive, further claims fail with `PlanInUse`;
    /// afterwards the id is simply unknown.
    pub fn claim(&self, plan_id: &str) -> Result<PlanClaim> {
        self.claim_at(plan_id, Utc::now())
    }

    pub fn claim_at(&self, plan_id: &str, now: DateTime<Utc>) -> Result<PlanClaim> {
        let mut state = self.lock();
        if state.in_flight.contains(plan_id) {
            return Err(SyncError::PlanInUse(plan_id.to_string()));
        }
        let plan = state
            .plans
            .remove(plan_id)
            .ok_or_else(|| SyncError::PlanNotFound(plan_id.to_string()))?;
        if plan.is_expired_at(now) {
            info!("Plan {} expired at {}", plan_id, plan.expires_at);
            return Err(SyncError::PlanExpired(plan_id.to_string()));
        }
        state.in_flight.insert(plan_id.to_string());
        info!("Plan {} claimed for execution", plan_id);

        Ok(PlanClaim {
            plan,
            state: Arc::clone(&self.state),
        })
    }

    /// Drop every plan whose expiry has passed
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let before = state.plans.len();
        state.plans.retain(|_, plan| !plan.is_expired_at(now));
        let evicted = before - state.plans.len();
        if evicted > 0 {
            info!("Evicted {} expired plans, {} remaining", evicted, state.plans.len());
        }
        evicted
    }

    /// Forget every stored plan. In-flight claims are unaffected.
    pub fn clear(&self) {
        self.lock().plans.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold on a claimed plan
pub struct PlanClaim {
    plan: SyncPlan,
    state: Arc<Mutex<RegistryState>>,
}

impl Deref for PlanClaim {
    type Target = SyncPlan;

    fn deref(&self) -> &SyncPlan {
        &self.plan
    }
}

impl Drop for PlanClaim {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight.remove(&self.plan.plan_id);
        debug!("Released claim on plan {}", self.plan.plan_id);
    }
}
