use crate::client::dispatcher::{Attempt, Dispatcher};
use crate::client::signals::DispatcherSnapshot;
use crate::config::ApiConfig;
use crate::endpoint::{Endpoint, Environment};
use crate::error::ErrorContext;
use crate::transport::{ConnectivityCheck, HttpTransport, PreparedRequest};
use crate::types::Response;
use crate::utils::file_name::{last_segment, to_valid_file_name};
use crate::{Error, Result};
use arc_swap::ArcSwapOption;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Throttled API client over a closed set of endpoints `E` and environments `Env`.
///
/// Every call goes through the [`Dispatcher`]. The plain methods return refusals,
/// timeouts and exhausted retries as errors; the `try_*` variants fold those three
/// into [`Response::error`] and only return configuration, local I/O and
/// serialization failures as `Err`.
pub struct ApiClient<Env: Environment, E: Endpoint> {
    pub(crate) config: ApiConfig<Env>,
    pub(crate) current_environment: ArcSwapOption<Env>,
    pub(crate) dispatcher: Dispatcher<E>,
    pub(crate) transport: HttpTransport,
    pub(crate) connectivity: Arc<dyn ConnectivityCheck>,
}

impl<Env: Environment, E: Endpoint> ApiClient<Env, E> {
    pub fn builder() -> crate::client::builder::ApiClientBuilder<Env, E> {
        crate::client::builder::ApiClientBuilder::new()
    }

    pub fn config(&self) -> &ApiConfig<Env> {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher<E> {
        &self.dispatcher
    }

    pub fn signals(&self) -> DispatcherSnapshot {
        self.dispatcher.signals()
    }

    pub async fn is_network_available(&self) -> bool {
        self.connectivity.has_internet().await
    }

    /// Switch the environment used by subsequent calls; in-flight calls keep their URL.
    pub fn set_current_environment(&self, env: Env) {
        tracing::info!(environment = env.name(), "current environment switched");
        self.current_environment.store(Some(Arc::new(env)));
    }

    pub fn current_environment(&self) -> Option<Env> {
        self.current_environment.load().as_deref().copied()
    }

    /// `{base_url}/{endpoint.path_segment()}` for the current environment.
    pub fn endpoint_url(&self, endpoint: E) -> Result<Url> {
        let base = self.config.base_url(self.current_environment())?;
        Ok(HttpTransport::resolve_url(
            &base,
            [endpoint.path_segment().as_str()],
        ))
    }

    pub fn set_max_concurrent_requests(&self, max: usize) {
        self.dispatcher.admission().set_global_max(max.max(1));
    }

    pub fn set_max_concurrent_all(&self, max: usize) {
        self.dispatcher.store().set_max_concurrent_all(max);
    }

    pub fn set_max_concurrent(&self, endpoint: E, max: usize) {
        self.dispatcher.store().set_max_concurrent(endpoint, max);
    }

    pub fn set_min_interval_all(&self, interval: Duration) {
        self.dispatcher.store().set_min_interval_all(interval);
    }

    /// `last_request` seeds the debounce clock; `None` keeps the recorded one.
    pub fn set_min_interval(&self, endpoint: E, interval: Duration, last_request: Option<Instant>) {
        self.dispatcher
            .store()
            .set_min_interval(endpoint, interval, last_request);
    }

    pub fn add_header_all(&self, name: &str, value: &str) {
        self.dispatcher.store().set_header_all(name, value);
    }

    pub fn add_header(&self, endpoint: E, name: &str, value: &str) {
        self.dispatcher.store().set_header(endpoint, name, value);
    }

    /// Set or clear the bearer token on every endpoint.
    pub fn set_auth_token(&self, token: Option<String>) {
        self.dispatcher.store().set_auth_token(token);
    }

    fn prepare(&self, endpoint: E, url: Url, attempt: &Attempt) -> PreparedRequest {
        PreparedRequest {
            endpoint: endpoint.name(),
            url,
            headers: self.dispatcher.store().headers(endpoint),
            request_id: attempt.request_id.clone(),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: E) -> Result<Response<T>> {
        let url = self.endpoint_url(endpoint)?;
        self.dispatcher
            .execute(endpoint, |attempt| {
                let req = self.prepare(endpoint, url.clone(), &attempt);
                async move { self.transport.get_json(&req).await }
            })
            .await
    }

    /// POST `body` form-encoded.
    pub async fn post<B, T>(&self, endpoint: E, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint_url(endpoint)?;
        self.dispatcher
            .execute(endpoint, |attempt| {
                let req = self.prepare(endpoint, url.clone(), &attempt);
                async move { self.transport.post_form(&req, body).await }
            })
            .await
    }

    pub async fn post_json<B, T>(&self, endpoint: E, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint_url(endpoint)?;
        self.dispatcher
            .execute(endpoint, |attempt| {
                let req = self.prepare(endpoint, url.clone(), &attempt);
                async move { self.transport.post_json(&req, body).await }
            })
            .await
    }

    /// Multipart upload: each top-level field of `form_data` as a text part, the
    /// file under the configured upload field.
    pub async fn upload<B>(
        &self,
        endpoint: E,
        form_data: &B,
        file_path: impl AsRef<Path>,
    ) -> Result<Response<()>>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint_url(endpoint)?;
        let fields = form_fields(form_data)?;
        let file_path = file_path.as_ref();
        let file_field = self.config.upload_field.as_str();
        self.dispatcher
            .execute(endpoint, |attempt| {
                let req = self.prepare(endpoint, url.clone(), &attempt);
                let fields = &fields;
                async move {
                    self.transport
                        .upload(&req, file_field, file_path, fields)
                        .await
                }
            })
            .await
    }

    /// GET the endpoint URL and save the body under `download_root/local_dir`.
    ///
    /// `remote_path` only names the local file: its last segment, sanitised. With
    /// `skip_if_exists`, an existing local file is returned without a request.
    pub async fn download(
        &self,
        endpoint: E,
        remote_path: &str,
        local_dir: impl AsRef<Path>,
        skip_if_exists: bool,
    ) -> Result<Response<PathBuf>> {
        let url = self.endpoint_url(endpoint)?;
        let dest = self
            .config
            .download_root
            .join(local_dir.as_ref())
            .join(to_valid_file_name(last_segment(remote_path)));

        if skip_if_exists && tokio::fs::metadata(&dest).await.is_ok() {
            tracing::debug!(path = %dest.display(), "download skipped; file exists");
            return Ok(Response::ok(dest));
        }

        let dest = &dest;
        self.dispatcher
            .execute(endpoint, |attempt| {
                let req = self.prepare(endpoint, url.clone(), &attempt);
                async move { self.transport.download(&req, dest).await }
            })
            .await
            .map(Response::ok)
    }

    pub async fn try_get<T: DeserializeOwned>(&self, endpoint: E) -> Result<Response<T>> {
        capture(self.get(endpoint).await)
    }

    pub async fn try_post<B, T>(&self, endpoint: E, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        capture(self.post(endpoint, body).await)
    }

    pub async fn try_post_json<B, T>(&self, endpoint: E, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        capture(self.post_json(endpoint, body).await)
    }

    pub async fn try_upload<B>(
        &self,
        endpoint: E,
        form_data: &B,
        file_path: impl AsRef<Path>,
    ) -> Result<Response<()>>
    where
        B: Serialize + ?Sized,
    {
        capture(self.upload(endpoint, form_data, file_path).await)
    }

    pub async fn try_download(
        &self,
        endpoint: E,
        remote_path: &str,
        local_dir: impl AsRef<Path>,
        skip_if_exists: bool,
    ) -> Result<Response<PathBuf>> {
        capture(
            self.download(endpoint, remote_path, local_dir, skip_if_exists)
                .await,
        )
    }
}

fn capture<T>(result: Result<Response<T>>) -> Result<Response<T>> {
    match result {
        Err(e) if e.is_capturable() => Ok(Response::from_error(e)),
        other => other,
    }
}

/// Top-level fields of `data` as multipart text parts. Strings are sent as-is,
/// other scalars in their JSON form, nulls skipped.
fn form_fields<B: Serialize + ?Sized>(data: &B) -> Result<Vec<(String, String)>> {
    match serde_json::to_value(data)? {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect()),
        other => Err(Error::configuration_with_context(
            "upload form data must serialize to an object",
            ErrorContext::new()
                .with_details(format!("got {}", other))
                .with_source("upload"),
        )),
    }
}
