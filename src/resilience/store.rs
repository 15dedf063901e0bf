//! Per-endpoint policy state shared by every in-flight call.
//!
//! Counters are atomics mutated only through
//! [`AdmissionPermit`](super::admission::AdmissionPermit); debounce timestamps and
//! headers sit behind per-endpoint locks, so no lock spans more than one endpoint.

use crate::endpoint::Endpoint;
use arc_swap::ArcSwapOption;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

pub const AUTHORIZATION: &str = "Authorization";

pub(crate) fn lock_unpoisoned<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_unpoisoned<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_unpoisoned<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DebounceState {
    pub min_interval: Duration,
    /// `None` means the endpoint has never been requested.
    pub last_request: Option<Instant>,
}

/// Policy and live counters for one endpoint.
#[derive(Debug)]
pub struct EndpointPolicy {
    pub(crate) max_concurrent: AtomicUsize,
    pub(crate) active: AtomicUsize,
    pub(crate) debounce: Mutex<DebounceState>,
    headers: RwLock<HashMap<String, String>>,
}

impl EndpointPolicy {
    fn new(max_concurrent: usize, headers: HashMap<String, String>) -> Self {
        Self {
            max_concurrent: AtomicUsize::new(max_concurrent),
            active: AtomicUsize::new(0),
            debounce: Mutex::new(DebounceState {
                min_interval: Duration::ZERO,
                last_request: None,
            }),
            headers: RwLock::new(headers),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::Acquire)
    }

    /// Attempts currently executing against this endpoint.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn min_interval(&self) -> Duration {
        lock_unpoisoned(&self.debounce).min_interval
    }

    pub fn last_request(&self) -> Option<Instant> {
        lock_unpoisoned(&self.debounce).last_request
    }

    /// Snapshot of the headers attached to the next attempt.
    pub fn headers(&self) -> HashMap<String, String> {
        read_unpoisoned(&self.headers).clone()
    }

    fn upsert_header(&self, name: &str, value: &str) {
        write_unpoisoned(&self.headers).insert(name.to_string(), value.to_string());
    }

    fn remove_header(&self, name: &str) {
        write_unpoisoned(&self.headers).remove(name);
    }
}

/// Endpoint Policy Store.
///
/// Entries are created lazily with the store defaults and are never removed.
pub struct EndpointPolicyStore<E: Endpoint> {
    policies: RwLock<HashMap<E, Arc<EndpointPolicy>>>,
    default_max_concurrent: usize,
    global_active: Arc<AtomicUsize>,
    auth_token: ArcSwapOption<String>,
    /// Held for a whole token broadcast so concurrent setters cannot interleave.
    auth_broadcast: Mutex<()>,
}

impl<E: Endpoint> EndpointPolicyStore<E> {
    pub fn new(default_max_concurrent: usize) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            default_max_concurrent,
            global_active: Arc::new(AtomicUsize::new(0)),
            auth_token: ArcSwapOption::empty(),
            auth_broadcast: Mutex::new(()),
        }
    }

    pub fn default_max_concurrent(&self) -> usize {
        self.default_max_concurrent
    }

    /// Policy for `endpoint`, created with defaults if absent.
    pub fn get(&self, endpoint: E) -> Arc<EndpointPolicy> {
        if let Some(policy) = read_unpoisoned(&self.policies).get(&endpoint) {
            return policy.clone();
        }

        let mut policies = write_unpoisoned(&self.policies);
        policies
            .entry(endpoint)
            .or_insert_with(|| {
                let mut headers = HashMap::new();
                if let Some(token) = self.auth_token.load_full() {
                    headers.insert(AUTHORIZATION.to_string(), bearer(&token));
                }
                Arc::new(EndpointPolicy::new(self.default_max_concurrent, headers))
            })
            .clone()
    }

    /// Endpoints that currently have a policy entry.
    pub fn known_endpoints(&self) -> Vec<E> {
        read_unpoisoned(&self.policies).keys().copied().collect()
    }

    pub fn set_max_concurrent(&self, endpoint: E, max: usize) {
        self.get(endpoint)
            .max_concurrent
            .store(max, Ordering::Release);
    }

    pub fn set_max_concurrent_all(&self, max: usize) {
        for endpoint in E::all() {
            self.set_max_concurrent(*endpoint, max);
        }
    }

    /// Set the minimum spacing between request starts.
    ///
    /// `last_request` seeds the debounce clock; `None` keeps the recorded value.
    pub fn set_min_interval(&self, endpoint: E, interval: Duration, last_request: Option<Instant>) {
        let policy = self.get(endpoint);
        let mut debounce = lock_unpoisoned(&policy.debounce);
        debounce.min_interval = interval;
        if last_request.is_some() {
            debounce.last_request = last_request;
        }
    }

    pub fn set_min_interval_all(&self, interval: Duration) {
        for endpoint in E::all() {
            self.set_min_interval(*endpoint, interval, None);
        }
    }

    pub fn set_header(&self, endpoint: E, name: &str, value: &str) {
        self.get(endpoint).upsert_header(name, value);
    }

    pub fn set_header_all(&self, name: &str, value: &str) {
        for endpoint in E::all() {
            self.set_header(*endpoint, name, value);
        }
    }

    /// Broadcast `Authorization: Bearer <token>` to every endpoint, or remove it on `None`.
    ///
    /// Attempts already executing keep the headers they started with.
    pub fn set_auth_token(&self, token: Option<String>) {
        let _broadcast = lock_unpoisoned(&self.auth_broadcast);
        let token = token.map(Arc::new);
        self.auth_token.store(token.clone());
        for endpoint in E::all() {
            let policy = self.get(*endpoint);
            match &token {
                Some(token) => policy.upsert_header(AUTHORIZATION, &bearer(token)),
                None => policy.remove_header(AUTHORIZATION),
            }
        }
        tracing::debug!(
            endpoints = E::all().len(),
            cleared = token.is_none(),
            "bearer token broadcast"
        );
    }

    pub fn auth_token(&self) -> Option<Arc<String>> {
        self.auth_token.load_full()
    }

    pub fn headers(&self, endpoint: E) -> HashMap<String, String> {
        self.get(endpoint).headers()
    }

    /// Attempts executing against `endpoint` right now.
    pub fn active(&self, endpoint: E) -> usize {
        read_unpoisoned(&self.policies)
            .get(&endpoint)
            .map(|p| p.active())
            .unwrap_or(0)
    }

    /// Attempts executing across all endpoints.
    ///
    /// Never lower than the sum of the per-endpoint counts: it is raised before and
    /// lowered after them.
    pub fn global_active(&self) -> usize {
        self.global_active.load(Ordering::Acquire)
    }

    pub(crate) fn global_counter(&self) -> &Arc<AtomicUsize> {
        &self.global_active
    }
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}
