//! Client configuration: global limits, environments and per-endpoint settings.
//!
//! Values come from, in increasing precedence: defaults, a YAML file, `API_THROTTLE_*`
//! environment variables, then explicit `with_*` calls.
//!
//! ```yaml
//! timeout_secs: 30
//! max_attempts: 3
//! max_concurrent_requests: 10
//! default_max_endpoint_requests: 2
//! backoff:
//!   strategy: exponential
//!   base_ms: 250
//!   max_ms: 8000
//! environments:
//!   dev: https://dev.api.com
//!   production: https://prod.api.com
//! current_environment: dev
//! headers:
//!   Content-Type: application/json
//! endpoints:
//!   login:
//!     max_concurrent: 1
//!     min_interval_ms: 5000
//! ```

use crate::endpoint::Environment;
use crate::error::ErrorContext;
use crate::resilience::Backoff;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;
pub const DEFAULT_MAX_ENDPOINT_REQUESTS: usize = 2;
pub const DEFAULT_UPLOAD_FIELD: &str = "photo";

/// Settings for one endpoint, keyed by endpoint name in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointSettings {
    pub max_concurrent: Option<usize>,
    pub min_interval_ms: Option<u64>,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
    max_concurrent_requests: Option<usize>,
    default_max_endpoint_requests: Option<usize>,
    min_interval_ms: Option<u64>,
    backoff: Option<Backoff>,
    upload_field: Option<String>,
    download_root: Option<PathBuf>,
    bearer_token: Option<String>,
    environments: HashMap<String, String>,
    current_environment: Option<String>,
    headers: HashMap<String, String>,
    endpoints: HashMap<String, EndpointSettings>,
}

#[derive(Debug, Clone)]
pub struct ApiConfig<Env: Environment> {
    /// Per-attempt timeout.
    pub timeout_secs: u64,
    pub max_attempts: u32,
    /// Global ceiling across all endpoints.
    pub max_concurrent_requests: usize,
    /// Ceiling for endpoints without an explicit `max_concurrent`.
    pub default_max_endpoint_requests: usize,
    /// Minimum interval applied to every endpoint without its own.
    pub default_min_interval: Duration,
    pub backoff: Backoff,
    /// Multipart field name for uploaded files.
    pub upload_field: String,
    /// Downloads land under this directory.
    pub download_root: PathBuf,
    pub bearer_token: Option<String>,
    /// Headers attached to every endpoint.
    pub headers: HashMap<String, String>,
    /// Per-endpoint settings keyed by endpoint name (case-insensitive).
    pub endpoints: HashMap<String, EndpointSettings>,
    environments: HashMap<Env, String>,
    current_environment: Option<Env>,
}

impl<Env: Environment> ApiConfig<Env> {
    pub fn new() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            default_max_endpoint_requests: DEFAULT_MAX_ENDPOINT_REQUESTS,
            default_min_interval: Duration::ZERO,
            backoff: Backoff::default(),
            upload_field: DEFAULT_UPLOAD_FIELD.to_string(),
            download_root: PathBuf::from("."),
            bearer_token: None,
            headers: HashMap::new(),
            endpoints: HashMap::new(),
            environments: HashMap::new(),
            current_environment: None,
        }
    }

    /// Defaults plus `API_THROTTLE_*` environment overrides.
    pub fn from_env() -> Self {
        Self::new().apply_env_overrides()
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read config file: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(content).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid config file: {}", e),
                ErrorContext::new().with_source("config_loader"),
            )
        })?;

        let mut cfg = Self::new();
        if let Some(v) = file.timeout_secs {
            cfg.timeout_secs = v;
        }
        if let Some(v) = file.max_attempts {
            cfg.max_attempts = v;
        }
        if let Some(v) = file.max_concurrent_requests {
            cfg.max_concurrent_requests = v;
        }
        if let Some(v) = file.default_max_endpoint_requests {
            cfg.default_max_endpoint_requests = v;
        }
        if let Some(v) = file.min_interval_ms {
            cfg.default_min_interval = Duration::from_millis(v);
        }
        if let Some(v) = file.backoff {
            cfg.backoff = v;
        }
        if let Some(v) = file.upload_field {
            cfg.upload_field = v;
        }
        if let Some(v) = file.download_root {
            cfg.download_root = v;
        }
        cfg.bearer_token = file.bearer_token;
        cfg.headers = file.headers;
        cfg.endpoints = file
            .endpoints
            .into_iter()
            .map(|(name, settings)| (name.to_lowercase(), settings))
            .collect();

        for (name, url) in file.environments {
            let env = Env::from_name(&name)
                .ok_or_else(|| unknown_environment(&name, "environments"))?;
            cfg.environments.insert(env, url);
        }
        if let Some(name) = file.current_environment {
            let env = Env::from_name(&name)
                .ok_or_else(|| unknown_environment(&name, "current_environment"))?;
            cfg.current_environment = Some(env);
        }

        Ok(cfg.normalized())
    }

    /// Apply `API_THROTTLE_*` overrides; unparsable values are ignored.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<u64>("API_THROTTLE_TIMEOUT_SECS") {
            self.timeout_secs = v;
        }
        if let Some(v) = env_parse::<u32>("API_THROTTLE_MAX_ATTEMPTS") {
            self.max_attempts = v;
        }
        if let Some(v) = env_parse::<usize>("API_THROTTLE_MAX_CONCURRENT") {
            self.max_concurrent_requests = v;
        }
        if let Some(v) = env_parse::<usize>("API_THROTTLE_DEFAULT_MAX_ENDPOINT") {
            self.default_max_endpoint_requests = v;
        }
        if let Ok(dir) = env::var("API_THROTTLE_DOWNLOAD_DIR") {
            if !dir.trim().is_empty() {
                self.download_root = PathBuf::from(dir);
            }
        }
        if let Ok(token) = env::var("API_THROTTLE_BEARER_TOKEN") {
            if !token.trim().is_empty() {
                self.bearer_token = Some(token);
            }
        }
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        self.max_concurrent_requests = self.max_concurrent_requests.max(1);
        self.default_max_endpoint_requests = self.default_max_endpoint_requests.max(1);
        self.timeout_secs = self.timeout_secs.max(1);
        self
    }

    pub fn add_environment(&mut self, env: Env, base_url: impl Into<String>) {
        self.environments.insert(env, base_url.into());
    }

    pub fn set_current_environment(&mut self, env: Env) {
        self.current_environment = Some(env);
    }

    pub fn with_environment(mut self, env: Env, base_url: impl Into<String>) -> Self {
        self.add_environment(env, base_url);
        self
    }

    pub fn with_current_environment(mut self, env: Env) -> Self {
        self.set_current_environment(env);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_max_concurrent_requests(mut self, n: usize) -> Self {
        self.max_concurrent_requests = n.max(1);
        self
    }

    pub fn with_default_max_endpoint_requests(mut self, n: usize) -> Self {
        self.default_max_endpoint_requests = n.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_download_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_root = dir.into();
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn current_environment(&self) -> Option<Env> {
        self.current_environment
    }

    pub fn environments(&self) -> &HashMap<Env, String> {
        &self.environments
    }

    /// Settings for an endpoint by name.
    pub fn endpoint_settings(&self, name: &str) -> Option<&EndpointSettings> {
        self.endpoints.get(&name.to_lowercase())
    }

    pub fn current_base_url(&self) -> Result<Url> {
        self.base_url(None)
    }

    /// Base URL for `env`, or for the configured current environment when `None`.
    pub fn base_url(&self, env: Option<Env>) -> Result<Url> {
        if self.environments.is_empty() {
            return Err(Error::configuration_with_context(
                "no environments configured; add one with `add_environment`",
                ErrorContext::new()
                    .with_field_path("environments")
                    .with_source("url_resolver"),
            ));
        }
        let env = env.or(self.current_environment).ok_or_else(|| {
            Error::configuration_with_context(
                "no current environment selected; call `set_current_environment`",
                ErrorContext::new()
                    .with_field_path("current_environment")
                    .with_source("url_resolver"),
            )
        })?;
        let raw = self.environments.get(&env).ok_or_else(|| {
            Error::configuration_with_context(
                format!("environment `{}` has no base URL", env.name()),
                ErrorContext::new()
                    .with_field_path(format!("environments.{}", env.name()))
                    .with_source("url_resolver"),
            )
        })?;
        Url::parse(raw).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid base URL `{}`: {}", raw, e),
                ErrorContext::new()
                    .with_field_path(format!("environments.{}", env.name()))
                    .with_source("url_resolver"),
            )
        })
    }
}

impl<Env: Environment> Default for ApiConfig<Env> {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn unknown_environment(name: &str, field: &str) -> Error {
    Error::configuration_with_context(
        format!("unknown environment `{}`", name),
        ErrorContext::new()
            .with_field_path(field)
            .with_source("config_loader"),
    )
}
