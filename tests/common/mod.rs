//! Shared fixtures for integration tests.

#![allow(dead_code)]

use api_throttle::{ApiClientBuilder, Endpoint, Environment};
use api_throttle::transport::StaticConnectivity;
use mockito::{Server, ServerGuard};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Api {
    Upload,
    Download,
    Login,
    FooModel,
    BarModel,
}

impl Endpoint for Api {
    fn all() -> &'static [Self] {
        &[
            Api::Upload,
            Api::Download,
            Api::Login,
            Api::FooModel,
            Api::BarModel,
        ]
    }

    fn name(&self) -> &'static str {
        match self {
            Api::Upload => "Upload",
            Api::Download => "Download",
            Api::Login => "Login",
            Api::FooModel => "FooModel",
            Api::BarModel => "BarModel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Env {
    Dev,
    Production,
}

impl Environment for Env {
    fn all() -> &'static [Self] {
        &[Env::Dev, Env::Production]
    }

    fn name(&self) -> &'static str {
        match self {
            Env::Dev => "dev",
            Env::Production => "production",
        }
    }
}

/// Test fixture that owns a mock server
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    /// Builder pointed at the mock server as the `dev` environment.
    pub fn client_builder(&self) -> ApiClientBuilder<Env, Api> {
        ApiClientBuilder::new()
            .environment(Env::Dev, self.base_url.clone())
            .current_environment(Env::Dev)
            .connectivity_check(Arc::new(StaticConnectivity(true)))
    }
}
