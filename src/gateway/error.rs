//! Error types for the completion gateway.

use thiserror::Error;

/// Additional context from a failed completion call, for debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// HTTP status code returned by the remote API.
    pub http_status: Option<u16>,
    /// Request ID from the provider (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when requesting a stage completion.
///
/// The `Display` output of [`CompletionError::RequestFailed`] is the bare
/// message, since that text is what gets recorded on a failed stage.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Non-2xx status, transport failure, or an unparseable body.
    #[error("{message}")]
    RequestFailed {
        message: String,
        context: Option<ErrorContext>,
    },

    /// The HTTP client could not be constructed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CompletionError {
    /// Create a request failure without HTTP context (transport errors).
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::RequestFailed {
            message: message.into(),
            context: None,
        }
    }

    /// Create a request failure carrying the HTTP status and request id.
    pub fn request_failed_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::RequestFailed {
            message: message.into(),
            context: Some(context),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RequestFailed { .. } => "request_failed",
            Self::Config(_) => "config_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RequestFailed { context, .. } => context.as_ref(),
            Self::Config(_) => None,
        }
    }

    /// HTTP status of the failed call, if the server answered at all.
    pub fn http_status(&self) -> Option<u16> {
        self.context().and_then(|c| c.http_status)
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        let context = err.status().map(|s| ErrorContext::new().with_status(s.as_u16()));
        Self::RequestFailed {
            message: err.to_string(),
            context,
        }
    }
}
