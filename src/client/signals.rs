use crate::endpoint::Endpoint;
use crate::resilience::{AdmissionController, DebounceGate, EndpointPolicyStore};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time view of one endpoint's policy and load.
///
/// Facts only: nothing here feeds back into admission.
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    pub name: &'static str,
    pub active: usize,
    pub max_concurrent: usize,
    pub min_interval: Duration,
    /// Debounce wait a call started now would see.
    pub wait_remaining: Duration,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DispatcherSnapshot {
    pub global_active: usize,
    pub global_max: usize,
    pub endpoints: Vec<EndpointSnapshot>,
}

impl DispatcherSnapshot {
    pub(crate) fn capture<E: Endpoint>(
        store: &EndpointPolicyStore<E>,
        admission: &AdmissionController,
        gate: &DebounceGate,
    ) -> Self {
        let now = Instant::now();
        let endpoints = E::all()
            .iter()
            .map(|endpoint| {
                let policy = store.get(*endpoint);
                EndpointSnapshot {
                    name: endpoint.name(),
                    active: policy.active(),
                    max_concurrent: policy.max_concurrent(),
                    min_interval: policy.min_interval(),
                    wait_remaining: gate.must_wait(&policy, now),
                    headers: policy.headers(),
                }
            })
            .collect();

        Self {
            global_active: store.global_active(),
            global_max: admission.global_max(),
            endpoints,
        }
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointSnapshot> {
        self.endpoints
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }
}
