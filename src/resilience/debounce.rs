//! Debounce Gate: minimum spacing between successive request starts to one endpoint.

use super::store::{lock_unpoisoned, EndpointPolicy};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default)]
pub struct DebounceGate;

impl DebounceGate {
    pub fn new() -> Self {
        Self
    }

    /// `max(0, last_request + min_interval - now)`; zero for a never-requested endpoint.
    pub fn must_wait(&self, policy: &EndpointPolicy, now: Instant) -> Duration {
        let state = lock_unpoisoned(&policy.debounce);
        match state.last_request {
            Some(last) => (last + state.min_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Stamp `now` as the endpoint's last request start if the gate is clear.
    ///
    /// Returns `false` when another attempt started inside the interval since the
    /// caller last looked; the caller then waits again.
    pub fn try_begin(&self, policy: &EndpointPolicy, now: Instant) -> bool {
        let mut state = lock_unpoisoned(&policy.debounce);
        let clear = match state.last_request {
            Some(last) => last + state.min_interval <= now,
            None => true,
        };
        if clear {
            state.last_request = Some(now);
        }
        clear
    }
}
