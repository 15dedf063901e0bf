//! Envelope types returned to callers.

pub mod response;

pub use response::Response;
