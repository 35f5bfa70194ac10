//! Liveness store: the fixed set of heartbeat targets and their state.
//!
//! The target map is built once and never changes. Each target guards its
//! own liveness with a mutex, so probes for different targets never contend
//! and readers take one short lock per target.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;

use crate::health::report::RoundReport;
use crate::health::state::{Liveness, LivenessState, Update};

/// A monitored endpoint.
#[derive(Debug)]
pub struct HeartbeatTarget {
    name: String,
    address: String,
    liveness: Mutex<Liveness>,
}

impl HeartbeatTarget {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            liveness: Mutex::new(Liveness::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn lock(&self) -> MutexGuard<'_, Liveness> {
        self.liveness.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LivenessState {
        self.lock().state
    }

    /// Copy of the full liveness record.
    pub fn liveness(&self) -> Liveness {
        self.lock().clone()
    }

    pub(crate) fn record_success(&self, round: u64, recovery_successes: u32) -> Update {
        self.lock().record_success(round, recovery_successes)
    }

    pub(crate) fn record_failure(&self, round: u64, error: impl Into<String>) -> Update {
        self.lock().record_failure(round, error)
    }
}

/// Row of the liveness listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetStatus {
    pub name: String,
    pub ip: String,
    pub state: LivenessState,
}

/// All heartbeat targets plus the last round's report.
#[derive(Debug, Default)]
pub struct LivenessStore {
    targets: BTreeMap<String, Arc<HeartbeatTarget>>,
    last_round: RwLock<Option<RoundReport>>,
}

impl LivenessStore {
    /// Build the store from `(name, address)` pairs. Every target starts
    /// Offline. A repeated name keeps the last address.
    pub fn new<I, N, A>(targets: I) -> Self
    where
        I: IntoIterator<Item = (N, A)>,
        N: Into<String>,
        A: Into<String>,
    {
        let targets = targets
            .into_iter()
            .map(|(name, address)| {
                let target = HeartbeatTarget::new(name, address);
                (target.name.clone(), Arc::new(target))
            })
            .collect();
        Self {
            targets,
            last_round: RwLock::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<HeartbeatTarget>> {
        self.targets.get(name)
    }

    pub fn state(&self, name: &str) -> Option<LivenessState> {
        self.targets.get(name).map(|t| t.state())
    }

    /// Targets in name order.
    pub fn targets(&self) -> impl Iterator<Item = &Arc<HeartbeatTarget>> {
        self.targets.values()
    }

    /// Current state of every target, in name order.
    pub fn snapshot(&self) -> Vec<TargetStatus> {
        self.targets
            .values()
            .map(|t| TargetStatus {
                name: t.name.clone(),
                ip: t.address.clone(),
                state: t.state(),
            })
            .collect()
    }

    pub fn last_round(&self) -> Option<RoundReport> {
        self.last_round
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Keep `report` unless a newer round has already been published.
    pub(crate) fn publish_round(&self, report: RoundReport) {
        let mut slot = self.last_round.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map_or(true, |current| current.round < report.round) {
            *slot = Some(report);
        }
    }
}
