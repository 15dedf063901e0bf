//! Admission Controller: per-endpoint and global concurrency ceilings.

use super::store::{EndpointPolicy, EndpointPolicyStore};
use crate::endpoint::Endpoint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Decides whether an attempt may start, and hands out the slot that tracks it.
#[derive(Debug)]
pub struct AdmissionController {
    global_max: AtomicUsize,
}

impl AdmissionController {
    pub fn new(global_max: usize) -> Self {
        Self {
            global_max: AtomicUsize::new(global_max),
        }
    }

    pub fn global_max(&self) -> usize {
        self.global_max.load(Ordering::Acquire)
    }

    pub fn set_global_max(&self, max: usize) {
        self.global_max.store(max, Ordering::Release);
    }

    /// Read-only check: `active < max_concurrent` for the endpoint and globally.
    pub fn can_admit<E: Endpoint>(&self, store: &EndpointPolicyStore<E>, endpoint: E) -> bool {
        let policy = store.get(endpoint);
        policy.active() < policy.max_concurrent() && store.global_active() < self.global_max()
    }

    /// Check and claim a slot in one step.
    ///
    /// The global counter is claimed first and released last, so the sum of the
    /// per-endpoint counts never exceeds it.
    pub fn try_admit<E: Endpoint>(
        &self,
        store: &EndpointPolicyStore<E>,
        endpoint: E,
    ) -> Option<AdmissionPermit> {
        let policy = store.get(endpoint);
        let global = store.global_counter().clone();

        if !increment_below(&global, self.global_max()) {
            return None;
        }
        if !increment_below(&policy.active, policy.max_concurrent()) {
            global.fetch_sub(1, Ordering::AcqRel);
            return None;
        }

        Some(AdmissionPermit { policy, global })
    }
}

fn increment_below(counter: &AtomicUsize, limit: usize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < limit).then_some(n + 1)
        })
        .is_ok()
}

/// One admitted attempt. Releases its endpoint and global slot exactly once, on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    policy: Arc<EndpointPolicy>,
    global: Arc<AtomicUsize>,
}

impl AdmissionPermit {
    pub fn policy(&self) -> &Arc<EndpointPolicy> {
        &self.policy
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.policy.active.fetch_sub(1, Ordering::AcqRel);
        self.global.fetch_sub(1, Ordering::AcqRel);
    }
}
