//! # api-throttle
//!
//! Client-side HTTP request dispatcher with per-endpoint and global concurrency limits,
//! debouncing, retries with backoff and bearer-token propagation.
//!
//! ## Overview
//!
//! Application code names its API operations as a closed [`Endpoint`] set and its
//! deployment targets as an [`Environment`] set. Every call to an endpoint runs through
//! the [`Dispatcher`]:
//!
//! - **Admission**: refused with [`Error::TooManyRequests`] when the endpoint's own
//!   ceiling or the global ceiling is reached. Refusals are never retried.
//! - **Debounce**: an endpoint with a minimum interval waits until that much time has
//!   passed since its last request started.
//! - **Retry**: transient transport failures are retried up to `max_attempts` with a
//!   configurable [`Backoff`]; timeouts and cancellations are not.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use api_throttle::{ApiClient, Endpoint, Environment, Response};
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Api { Login, FooModel }
//!
//! impl Endpoint for Api {
//!     fn all() -> &'static [Self] { &[Api::Login, Api::FooModel] }
//!     fn name(&self) -> &'static str {
//!         match self { Api::Login => "Login", Api::FooModel => "FooModel" }
//!     }
//! }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Env { Dev }
//!
//! impl Environment for Env {
//!     fn all() -> &'static [Self] { &[Env::Dev] }
//!     fn name(&self) -> &'static str { "dev" }
//! }
//!
//! #[tokio::main]
//! async fn main() -> api_throttle::Result<()> {
//!     let client = ApiClient::<Env, Api>::builder()
//!         .environment(Env::Dev, "https://dev.api.com")
//!         .current_environment(Env::Dev)
//!         .max_attempts(3)
//!         .build()?;
//!
//!     client.set_max_concurrent(Api::Login, 1);
//!     client.set_min_interval(Api::Login, Duration::from_secs(5), None);
//!     client.set_auth_token(Some("token".to_string()));
//!
//!     let foo: Response<serde_json::Value> = client.get(Api::FooModel).await?;
//!     println!("{:?}", foo.data);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`endpoint`] | Endpoint and environment identifier traits |
//! | [`config`] | Limits, environments, env-var and YAML configuration |
//! | [`resilience`] | Policy store, admission, debounce and retry primitives |
//! | [`client`] | Dispatcher state machine and the typed API client |
//! | [`transport`] | reqwest transport and connectivity probe |
//! | [`types`] | Response envelope |
//! | [`utils`] | File-name helpers |

pub mod client;
pub mod config;
pub mod endpoint;
pub mod resilience;
pub mod transport;
pub mod types;
pub mod utils;

pub use client::{
    ApiClient, ApiClientBuilder, Attempt, Dispatcher, DispatcherSnapshot, EndpointSnapshot,
};
pub use config::{ApiConfig, EndpointSettings};
pub use endpoint::{Endpoint, Environment};
pub use resilience::{Backoff, RetryPolicy};
pub use types::Response;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
