use thiserror::Error;

/// Structured error context for configuration and local I/O failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key or field that caused the error
    /// (e.g., "environments", "endpoints.login.max_concurrent")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "url_resolver")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the dispatcher and its transport.
#[derive(Debug, Error)]
pub enum Error {
    /// Admission refused: the endpoint or the global concurrency ceiling is reached.
    #[error("Too many requests in flight for endpoint `{endpoint}`")]
    TooManyRequests { endpoint: String },

    /// The attempt timed out or was cancelled by the caller.
    #[error("Request to endpoint `{endpoint}` {}", timeout_outcome(.cancelled))]
    Timeout { endpoint: String, cancelled: bool },

    #[error("Network transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Request to endpoint `{endpoint}` failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        endpoint: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn timeout_outcome(cancelled: &bool) -> &'static str {
    if *cancelled {
        "was cancelled"
    } else {
        "timed out"
    }
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub(crate) fn too_many_requests(endpoint: &str) -> Self {
        Error::TooManyRequests {
            endpoint: endpoint.to_string(),
        }
    }

    pub(crate) fn timeout(endpoint: &str, cancelled: bool) -> Self {
        Error::Timeout {
            endpoint: endpoint.to_string(),
            cancelled,
        }
    }

    /// Transient failures that the dispatcher may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_too_many_requests(&self) -> bool {
        matches!(self, Error::TooManyRequests { .. })
    }

    /// Errors the non-raising API folds into the response envelope instead of returning.
    pub fn is_capturable(&self) -> bool {
        matches!(
            self,
            Error::TooManyRequests { .. } | Error::Timeout { .. } | Error::RetriesExhausted { .. }
        )
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }
}
