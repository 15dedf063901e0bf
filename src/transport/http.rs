use crate::types::Response;
use crate::{Error, Result};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One fully resolved attempt: URL plus the header snapshot taken when it was admitted.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub endpoint: &'static str,
    pub url: Url,
    pub headers: HashMap<String, String>,
    pub request_id: String,
}

/// reqwest-backed transport. Issues exactly one network attempt per call; retries,
/// admission and debouncing live in the dispatcher.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let builder = reqwest::Client::builder().timeout(timeout).pool_max_idle_per_host(
            env::var("API_THROTTLE_POOL_MAX_IDLE_PER_HOST")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(32),
        );

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Append `segments` as path segments under `base`.
    pub fn resolve_url<'a>(base: &Url, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            for segment in segments {
                for part in segment.split('/').filter(|p| !p.is_empty()) {
                    path.push(part);
                }
            }
        }
        url
    }

    fn request(&self, method: reqwest::Method, req: &PreparedRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, req.url.clone())
            .header(REQUEST_ID_HEADER, req.request_id.as_str());
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        builder
    }

    async fn send(
        &self,
        req: &PreparedRequest,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let resp = builder.send().await.map_err(|e| map_reqwest(req, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transport(TransportError::Status {
                status: status.as_u16(),
                url: req.url.to_string(),
            }));
        }
        Ok(resp)
    }

    async fn decode<T: DeserializeOwned>(
        req: &PreparedRequest,
        resp: reqwest::Response,
    ) -> Result<Response<T>> {
        resp.json::<Response<T>>()
            .await
            .map_err(|e| map_reqwest(req, e))
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        req: &PreparedRequest,
    ) -> Result<Response<T>> {
        let resp = self
            .send(req, self.request(reqwest::Method::GET, req))
            .await?;
        Self::decode(req, resp).await
    }

    /// POST `body` as `application/x-www-form-urlencoded`.
    pub async fn post_form<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        req: &PreparedRequest,
        body: &B,
    ) -> Result<Response<T>> {
        let resp = self
            .send(req, self.request(reqwest::Method::POST, req).form(body))
            .await?;
        Self::decode(req, resp).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        req: &PreparedRequest,
        body: &B,
    ) -> Result<Response<T>> {
        let resp = self
            .send(req, self.request(reqwest::Method::POST, req).json(body))
            .await?;
        Self::decode(req, resp).await
    }

    /// Multipart POST: each `(name, value)` as a text part plus the file under `file_field`.
    pub async fn upload(
        &self,
        req: &PreparedRequest,
        file_field: &str,
        file_path: &Path,
        fields: &[(String, String)],
    ) -> Result<Response<()>> {
        let bytes = tokio::fs::read(file_path).await?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let mut form = reqwest::multipart::Form::new();
        for (name, value) in fields {
            form = form.text(name.clone(), value.clone());
        }
        form = form.part(
            file_field.to_string(),
            reqwest::multipart::Part::bytes(bytes).file_name(file_name),
        );

        self.send(req, self.request(reqwest::Method::POST, req).multipart(form))
            .await?;
        Ok(Response {
            success: true,
            ..Response::default()
        })
    }

    /// GET `req.url` and stream the body into `dest`.
    ///
    /// The body lands in `<dest>.part` first and is renamed once complete, so an
    /// interrupted download never looks like an existing file. The partial file is
    /// removed on any error and when the future is dropped mid-stream.
    pub async fn download(&self, req: &PreparedRequest, dest: &Path) -> Result<PathBuf> {
        let resp = self
            .send(req, self.request(reqwest::Method::GET, req))
            .await?;

        if let Some(dir) = dest.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let partial = PartialFile::for_dest(dest);

        let mut file = tokio::fs::File::create(partial.path()).await?;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| map_reqwest(req, e))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        partial.persist(dest).await?;
        Ok(dest.to_path_buf())
    }
}

/// `<dest>.part`, deleted on drop unless persisted.
struct PartialFile {
    path: PathBuf,
    persisted: bool,
}

impl PartialFile {
    fn for_dest(dest: &Path) -> Self {
        let mut path = dest.as_os_str().to_owned();
        path.push(".part");
        Self {
            path: PathBuf::from(path),
            persisted: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(mut self, dest: &Path) -> std::io::Result<()> {
        tokio::fs::rename(&self.path, dest).await?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.persisted {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "partial download left behind"
                    );
                }
            }
        }
    }
}

/// Timeouts become [`Error::Timeout`]; everything else is a transient transport failure.
fn map_reqwest(req: &PreparedRequest, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout {
            endpoint: req.endpoint.to_string(),
            cancelled: false,
        }
    } else {
        Error::Transport(TransportError::Http(e))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Transport error: {0}")]
    Other(String),
}
