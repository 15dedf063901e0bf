use crate::Error;
use serde::{Deserialize, Serialize};

/// Uniform envelope returned by every call variant.
///
/// `success`, `message` and `data` come from the server body; `error` is filled only by the
/// non-raising API when a call was refused, timed out or ran out of attempts.
#[derive(Debug, Serialize, Deserialize)]
pub struct Response<T> {
    #[serde(default, alias = "Success")]
    pub success: bool,
    #[serde(default, alias = "Message", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default = "Option::default", alias = "Data")]
    pub data: Option<T>,
    #[serde(skip)]
    pub error: Option<Error>,
}

impl<T> Response<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    /// An unsuccessful envelope carrying `error`.
    pub fn from_error(error: Error) -> Self {
        Self {
            success: false,
            message: Some(error.to_string()),
            data: None,
            error: Some(error),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success && self.error.is_none()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

impl<T> Default for Response<T> {
    fn default() -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: None,
        }
    }
}
