//! Throttled client surface.
//!
//! [`Dispatcher`] is the state machine every call runs through; [`ApiClient`] binds it to
//! the HTTP transport, the environment URLs and the endpoint configuration.

pub mod builder;
pub mod core;
pub mod dispatcher;
pub mod signals;

pub use builder::ApiClientBuilder;
pub use core::ApiClient;
pub use dispatcher::{Attempt, Dispatcher};
pub use signals::{DispatcherSnapshot, EndpointSnapshot};
