//! # Throttling Primitives Module
//!
//! The building blocks the [`Dispatcher`](crate::client::Dispatcher) composes around every
//! outbound attempt.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`store`] | Per-endpoint limits, live counters, debounce clock and headers |
//! | [`admission`] | Per-endpoint and global concurrency ceilings |
//! | [`debounce`] | Minimum spacing between request starts to one endpoint |
//! | [`retry`] | Failure classification and backoff schedule |
//!
//! ## Admission
//!
//! An attempt holds an [`AdmissionPermit`] while it executes. The permit is the only
//! way the in-flight counters move, and dropping it releases both the endpoint and
//! the global slot, on success, failure, timeout or cancellation alike.
//!
//! ```rust
//! use api_throttle::resilience::{AdmissionController, EndpointPolicyStore};
//! # use api_throttle::Endpoint;
//! # #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! # enum Api { Login }
//! # impl Endpoint for Api {
//! #     fn all() -> &'static [Self] { &[Api::Login] }
//! #     fn name(&self) -> &'static str { "Login" }
//! # }
//!
//! let store = EndpointPolicyStore::<Api>::new(1);
//! let admission = AdmissionController::new(10);
//!
//! let permit = admission.try_admit(&store, Api::Login).expect("slot available");
//! assert!(admission.try_admit(&store, Api::Login).is_none());
//! drop(permit);
//! assert!(admission.can_admit(&store, Api::Login));
//! ```

pub mod admission;
pub mod debounce;
pub mod retry;
pub mod store;

pub use admission::{AdmissionController, AdmissionPermit};
pub use debounce::DebounceGate;
pub use retry::{Backoff, RetryDecision, RetryPolicy};
pub use store::{EndpointPolicy, EndpointPolicyStore};
