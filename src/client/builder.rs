use crate::client::core::ApiClient;
use crate::client::dispatcher::Dispatcher;
use crate::config::ApiConfig;
use crate::endpoint::{Endpoint, Environment};
use crate::error::ErrorContext;
use crate::resilience::{Backoff, EndpointPolicyStore, RetryPolicy};
use crate::transport::{ConnectivityCheck, HttpProbe, HttpTransport};
use crate::{Error, Result};
use arc_swap::ArcSwapOption;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`ApiClient`].
///
/// Starts from defaults plus `API_THROTTLE_*` environment overrides; a config file or
/// explicit setters take precedence.
pub struct ApiClientBuilder<Env: Environment, E: Endpoint> {
    config: ApiConfig<Env>,
    connectivity: Option<Arc<dyn ConnectivityCheck>>,
    probe_url: Option<String>,
    http_client: Option<reqwest::Client>,
    _endpoints: PhantomData<fn() -> E>,
}

impl<Env: Environment, E: Endpoint> ApiClientBuilder<Env, E> {
    pub fn new() -> Self {
        Self {
            config: ApiConfig::from_env(),
            connectivity: None,
            probe_url: None,
            http_client: None,
            _endpoints: PhantomData,
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: ApiConfig<Env>) -> Self {
        self.config = config;
        self
    }

    /// Load a YAML config file, then re-apply environment overrides on top.
    pub fn with_config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.config = ApiConfig::from_yaml_file(path)?.apply_env_overrides();
        Ok(self)
    }

    pub fn environment(mut self, env: Env, base_url: impl Into<String>) -> Self {
        self.config.add_environment(env, base_url);
        self
    }

    pub fn current_environment(mut self, env: Env) -> Self {
        self.config.set_current_environment(env);
        self
    }

    /// Per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn max_concurrent_requests(mut self, n: usize) -> Self {
        self.config.max_concurrent_requests = n.max(1);
        self
    }

    pub fn default_max_endpoint_requests(mut self, n: usize) -> Self {
        self.config.default_max_endpoint_requests = n.max(1);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn upload_field(mut self, name: impl Into<String>) -> Self {
        self.config.upload_field = name.into();
        self
    }

    pub fn download_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.download_root = dir.into();
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.config.bearer_token = Some(token.into());
        self
    }

    /// Inject a connectivity check. Default probes [`crate::transport::probe::DEFAULT_PROBE_URL`].
    pub fn connectivity_check(mut self, check: Arc<dyn ConnectivityCheck>) -> Self {
        self.connectivity = Some(check);
        self
    }

    pub fn probe_url(mut self, url: impl Into<String>) -> Self {
        self.probe_url = Some(url.into());
        self
    }

    /// Use a preconfigured reqwest client; the configured timeout still bounds each attempt.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn build(self) -> Result<ApiClient<Env, E>> {
        let config = self.config;

        let store = Arc::new(EndpointPolicyStore::<E>::new(
            config.default_max_endpoint_requests,
        ));
        if !config.default_min_interval.is_zero() {
            store.set_min_interval_all(config.default_min_interval);
        }
        for (name, value) in &config.headers {
            store.set_header_all(name, value);
        }
        for (name, settings) in &config.endpoints {
            let endpoint = E::all()
                .iter()
                .copied()
                .find(|e| e.name().eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    Error::configuration_with_context(
                        format!("unknown endpoint `{}`", name),
                        ErrorContext::new()
                            .with_field_path(format!("endpoints.{}", name))
                            .with_source("client_builder"),
                    )
                })?;
            if let Some(max) = settings.max_concurrent {
                store.set_max_concurrent(endpoint, max);
            }
            if let Some(ms) = settings.min_interval_ms {
                store.set_min_interval(endpoint, Duration::from_millis(ms), None);
            }
            for (header, value) in &settings.headers {
                store.set_header(endpoint, header, value);
            }
        }
        if let Some(token) = &config.bearer_token {
            store.set_auth_token(Some(token.clone()));
        }

        let transport = match self.http_client {
            Some(client) => HttpTransport::with_client(client),
            None => HttpTransport::new(config.timeout())?,
        };
        let connectivity: Arc<dyn ConnectivityCheck> = match (self.connectivity, self.probe_url) {
            (Some(check), _) => check,
            (None, Some(url)) => Arc::new(HttpProbe::with_url(url)),
            (None, None) => Arc::new(HttpProbe::new()),
        };

        let dispatcher = Dispatcher::new(
            store,
            config.max_concurrent_requests,
            RetryPolicy::new(config.max_attempts, config.backoff),
            config.timeout(),
        );

        tracing::debug!(
            max_concurrent_requests = config.max_concurrent_requests,
            default_max_endpoint_requests = config.default_max_endpoint_requests,
            max_attempts = config.max_attempts,
            timeout_secs = config.timeout_secs,
            "api client built"
        );

        Ok(ApiClient {
            current_environment: ArcSwapOption::new(config.current_environment().map(Arc::new)),
            config,
            dispatcher,
            transport,
            connectivity,
        })
    }
}

impl<Env: Environment, E: Endpoint> Default for ApiClientBuilder<Env, E> {
    fn default() -> Self {
        Self::new()
    }
}
