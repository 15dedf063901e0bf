//! Dispatcher: admission, debounce, in-flight tracking and retries around one logical call.
//!
//! Per attempt:
//!
//! 1. admission check, refused with [`Error::TooManyRequests`]
//! 2. debounce wait, then a second admission check that claims the permit
//! 3. the caller's operation under the per-attempt timeout
//! 4. permit released, outcome classified by the [`RetryPolicy`]
//!
//! The permit is an RAII guard, so every exit path (success, error, timeout,
//! cancellation or a dropped future) returns the in-flight slots.

use super::signals::DispatcherSnapshot;
use crate::endpoint::Endpoint;
use crate::resilience::{
    AdmissionController, AdmissionPermit, DebounceGate, EndpointPolicyStore, RetryPolicy,
};
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// What the operation gets to know about the attempt it is running.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based.
    pub number: u32,
    /// Shared by every attempt of one call.
    pub request_id: String,
}

pub struct Dispatcher<E: Endpoint> {
    store: Arc<EndpointPolicyStore<E>>,
    admission: AdmissionController,
    gate: DebounceGate,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl<E: Endpoint> Dispatcher<E> {
    pub fn new(
        store: Arc<EndpointPolicyStore<E>>,
        global_max: usize,
        retry: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            store,
            admission: AdmissionController::new(global_max.max(1)),
            gate: DebounceGate::new(),
            retry,
            attempt_timeout,
        }
    }

    pub fn store(&self) -> &Arc<EndpointPolicyStore<E>> {
        &self.store
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Snapshot current admission state for diagnostics.
    pub fn signals(&self) -> DispatcherSnapshot {
        DispatcherSnapshot::capture(&self.store, &self.admission, &self.gate)
    }

    /// Run `op` for `endpoint` under admission, debounce and retry control.
    pub async fn execute<T, F, Fut>(&self, endpoint: E, op: F) -> Result<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_cancel(endpoint, CancellationToken::new(), op)
            .await
    }

    /// Like [`execute`](Self::execute); cancelling `cancel` ends the call with
    /// `Timeout { cancelled: true }`.
    pub async fn execute_with_cancel<T, F, Fut>(
        &self,
        endpoint: E,
        cancel: CancellationToken,
        op: F,
    ) -> Result<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::debug_span!(
            "dispatch",
            endpoint = endpoint.name(),
            request_id = %request_id
        );
        self.run(endpoint, cancel, request_id, op)
            .instrument(span)
            .await
    }

    /// Folds capturable failures into `Ok(Err(_))`; everything else stays an `Err`.
    pub async fn try_execute<T, F, Fut>(
        &self,
        endpoint: E,
        op: F,
    ) -> Result<std::result::Result<T, Error>>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.execute(endpoint, op).await {
            Ok(v) => Ok(Ok(v)),
            Err(e) if e.is_capturable() => Ok(Err(e)),
            Err(e) => Err(e),
        }
    }

    async fn run<T, F, Fut>(
        &self,
        endpoint: E,
        cancel: CancellationToken,
        request_id: String,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let name = endpoint.name();
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let permit = self.admit(endpoint, &cancel).await?;
            debug!(
                attempt,
                already_running = permit.policy().active().saturating_sub(1),
                "request started"
            );

            let attempt_started = Instant::now();
            let call = op(Attempt {
                number: attempt,
                request_id: request_id.clone(),
            });
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::timeout(name, true)),
                r = tokio::time::timeout(self.attempt_timeout, call) => {
                    r.unwrap_or_else(|_| Err(Error::timeout(name, false)))
                }
            };
            drop(permit);

            let error = match outcome {
                Ok(value) => {
                    info!(
                        attempts = attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "request completed"
                    );
                    return Ok(value);
                }
                Err(e) => e,
            };

            warn!(
                attempt,
                elapsed_ms = attempt_started.elapsed().as_millis() as u64,
                error = %error,
                "request failed"
            );

            let decision = self.retry.decide(&error, attempt);
            if decision.retry {
                debug!(attempt, delay_ms = decision.delay.as_millis() as u64, "retry scheduled");
                sleep_or_cancel(decision.delay, &cancel, name).await?;
                continue;
            }

            if error.is_retryable() {
                return Err(Error::RetriesExhausted {
                    endpoint: name.to_string(),
                    attempts: attempt,
                    source: Box::new(error),
                });
            }
            return Err(error);
        }
    }

    /// Admission check, debounce wait, then a claiming re-check.
    async fn admit(&self, endpoint: E, cancel: &CancellationToken) -> Result<AdmissionPermit> {
        let name = endpoint.name();
        if !self.admission.can_admit(&self.store, endpoint) {
            debug!(
                active = self.store.active(endpoint),
                global_active = self.store.global_active(),
                "admission refused"
            );
            return Err(Error::too_many_requests(name));
        }

        let policy = self.store.get(endpoint);
        loop {
            let wait = self.gate.must_wait(&policy, Instant::now());
            if !wait.is_zero() {
                debug!(wait_ms = wait.as_millis() as u64, "debouncing");
                sleep_or_cancel(wait, cancel, name).await?;
            }

            let permit = self
                .admission
                .try_admit(&self.store, endpoint)
                .ok_or_else(|| {
                    debug!("admission refused after debounce");
                    Error::too_many_requests(name)
                })?;

            // Someone else may have started inside the interval while we slept.
            if self.gate.try_begin(&policy, Instant::now()) {
                return Ok(permit);
            }
            drop(permit);
        }
    }
}

async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
    endpoint: &str,
) -> Result<()> {
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(Error::timeout(endpoint, true))
        } else {
            Ok(())
        };
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::timeout(endpoint, true)),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::test_support::Api;
    use crate::resilience::Backoff;
    use crate::transport::TransportError;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn dispatcher(
        global_max: usize,
        endpoint_max: usize,
        retry: RetryPolicy,
    ) -> Arc<Dispatcher<Api>> {
        let store = Arc::new(EndpointPolicyStore::new(endpoint_max));
        Arc::new(Dispatcher::new(
            store,
            global_max,
            retry,
            Duration::from_secs(60),
        ))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn transient() -> Error {
        Error::Transport(TransportError::Other("connection reset".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt_releases_slots() {
        let d = dispatcher(10, 2, RetryPolicy::default());
        let v = d.execute(Api::Login, |_| async { Ok(7) }).await.unwrap();
        assert_eq!(v, 7);
        assert_eq!(d.store().active(Api::Login), 0);
        assert_eq!(d.store().global_active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_ceiling_refuses_third_call() {
        let d = dispatcher(10, 2, RetryPolicy::default());
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);

        let mut held = Vec::new();
        for _ in 0..2 {
            let d = d.clone();
            let rx = release_rx.clone();
            held.push(tokio::spawn(async move {
                d.execute(Api::FooModel, move |_| {
                    let mut rx = rx.clone();
                    async move {
                        let _ = rx.wait_for(|released| *released).await;
                        Ok(())
                    }
                })
                .await
            }));
        }
        settle().await;
        assert_eq!(d.store().active(Api::FooModel), 2);

        let err = d
            .execute(Api::FooModel, |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(err.is_too_many_requests());

        // other endpoints still have room
        d.execute(Api::BarModel, |_| async { Ok(()) }).await.unwrap();

        release_tx.send(true).unwrap();
        for h in held {
            h.await.unwrap().unwrap();
        }
        assert_eq!(d.store().active(Api::FooModel), 0);
        assert_eq!(d.store().global_active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_ceiling_of_one_across_endpoints() {
        let d = dispatcher(1, 2, RetryPolicy::default());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = Mutex::new(Some(rx));

        let first = {
            let d = d.clone();
            tokio::spawn(async move {
                d.execute(Api::Login, move |_| {
                    let rx = rx.lock().unwrap().take();
                    async move {
                        if let Some(rx) = rx {
                            let _ = rx.await;
                        }
                        Ok(())
                    }
                })
                .await
            })
        };
        settle().await;
        assert_eq!(d.store().global_active(), 1);

        let called = AtomicU32::new(0);
        let err = d
            .execute(Api::Upload, |_| {
                called.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();
        assert!(err.is_too_many_requests());
        assert_eq!(called.load(Ordering::SeqCst), 0);

        tx.send(()).unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(d.store().global_active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_spaces_sequential_calls() {
        let d = dispatcher(10, 2, RetryPolicy::default());
        d.store()
            .set_min_interval(Api::Login, Duration::from_millis(1000), None);

        let starts = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let starts = starts.clone();
            d.execute(Api::Login, move |_| {
                starts.lock().unwrap().push(Instant::now());
                async { Ok(()) }
            })
            .await
            .unwrap();
        }

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_debounced_calls_never_start_inside_interval() {
        let d = dispatcher(10, 5, RetryPolicy::default());
        d.store()
            .set_min_interval(Api::FooModel, Duration::from_millis(500), None);

        let starts = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let d = d.clone();
            let starts = starts.clone();
            handles.push(tokio::spawn(async move {
                d.execute(Api::FooModel, move |_| {
                    starts.lock().unwrap().push(Instant::now());
                    async { Ok(()) }
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let mut starts = starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_then_succeed() {
        let d = dispatcher(10, 2, RetryPolicy::new(3, Backoff::LegacyXor));
        let calls = Arc::new(Mutex::new(Vec::new()));

        let begin = Instant::now();
        let v = d
            .execute(Api::BarModel, |attempt| {
                calls.lock().unwrap().push((attempt.number, Instant::now()));
                async move {
                    if attempt.number < 3 {
                        Err(transient())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(v, "done");
        let calls = calls.lock().unwrap();
        let numbers: Vec<u32> = calls.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        // 1^2 = 3s, then 2^2 = 0s
        assert_eq!(calls[1].1 - begin, Duration::from_secs(3));
        assert_eq!(calls[2].1 - calls[1].1, Duration::ZERO);
        assert_eq!(d.store().active(Api::BarModel), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_delays_grow() {
        let backoff = Backoff::Exponential {
            base_ms: 100,
            max_ms: 10_000,
        };
        let d = dispatcher(10, 2, RetryPolicy::new(4, backoff));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let err = d
            .execute(Api::Login, |_| {
                starts.lock().unwrap().push(Instant::now());
                async { Err::<(), _>(transient()) }
            })
            .await
            .unwrap_err();

        match err {
            Error::RetriesExhausted { attempts, source, .. } => {
                assert_eq!(attempts, 4);
                assert!(source.is_retryable());
            }
            other => panic!("unexpected error: {other}"),
        }

        let starts = starts.lock().unwrap();
        let gaps: Vec<Duration> = starts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_not_retried_and_releases_slot() {
        let store = Arc::new(EndpointPolicyStore::<Api>::new(2));
        let d = Dispatcher::new(
            store,
            10,
            RetryPolicy::new(5, Backoff::Fixed { delay_ms: 10 }),
            Duration::from_secs(2),
        );
        let calls = AtomicU32::new(0);

        let err = d
            .execute(Api::Download, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { cancelled: false, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(d.store().active(Api::Download), 0);
        assert_eq!(d.store().global_active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_releases_slot() {
        let d = dispatcher(10, 2, RetryPolicy::default());
        let cancel = CancellationToken::new();

        let call = {
            let d = d.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                d.execute_with_cancel(Api::Upload, cancel, |_| {
                    futures::future::pending::<Result<()>>()
                })
                .await
            })
        };
        settle().await;
        assert_eq!(d.store().active(Api::Upload), 1);

        cancel.cancel();
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Timeout { cancelled: true, .. }));
        assert_eq!(d.store().active(Api::Upload), 0);
        assert_eq!(d.store().global_active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_debounce_wait() {
        let d = dispatcher(10, 2, RetryPolicy::default());
        d.store()
            .set_min_interval(Api::Login, Duration::from_secs(10), Some(Instant::now()));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let call = {
            let d = d.clone();
            let cancel = cancel.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                d.execute_with_cancel(Api::Login, cancel, move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Timeout { cancelled: true, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(d.store().global_active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_errors_surface_as_is() {
        let d = dispatcher(10, 2, RetryPolicy::new(3, Backoff::LegacyXor));
        let calls = AtomicU32::new(0);
        let err = d
            .execute(Api::Upload, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "missing.png",
                    )))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_execute_captures_refusals() {
        let d = dispatcher(10, 2, RetryPolicy::default());
        d.store().set_max_concurrent(Api::Login, 0);

        let outcome = d
            .try_execute(Api::Login, |_| async { Ok(()) })
            .await
            .unwrap();
        assert!(outcome.unwrap_err().is_too_many_requests());

        let raised = d
            .try_execute(Api::FooModel, |_| async {
                Err::<(), _>(Error::configuration_with_context(
                    "boom",
                    crate::ErrorContext::new(),
                ))
            })
            .await;
        assert!(raised.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_id_is_stable_across_attempts() {
        let d = dispatcher(10, 2, RetryPolicy::new(2, Backoff::Fixed { delay_ms: 1 }));
        let ids = Mutex::new(Vec::new());
        let _ = d
            .execute(Api::Login, |attempt| {
                ids.lock().unwrap().push(attempt.request_id);
                async { Err::<(), _>(transient()) }
            })
            .await;
        let ids = ids.lock().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
        assert!(Uuid::parse_str(&ids[0]).is_ok());
    }
}
