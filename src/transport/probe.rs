//! Internet reachability probe.

use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_PROBE_URL: &str = "http://google.com/generate_204";

/// Answers "is the network reachable right now".
#[async_trait]
pub trait ConnectivityCheck: Send + Sync {
    async fn has_internet(&self) -> bool;
}

/// Issues a GET against a well-known URL; any HTTP response counts as reachable.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self::with_url(DEFAULT_PROBE_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectivityCheck for HttpProbe {
    async fn has_internet(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "connectivity probe failed");
                false
            }
        }
    }
}

/// Fixed answer, for tests and offline tooling.
pub struct StaticConnectivity(pub bool);

#[async_trait]
impl ConnectivityCheck for StaticConnectivity {
    async fn has_internet(&self) -> bool {
        self.0
    }
}
