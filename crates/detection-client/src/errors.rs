use std::time::Duration;

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("unrecognized payload shape: {0}")]
    UnrecognizedShape(String),
}

#[derive(Clone, Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream transport failure: {0}")]
    Transport(String),
    #[error("upstream rate limited")]
    RateLimited,
    #[error("upstream returned status {status}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
}

impl UpstreamError {
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            UpstreamError::RateLimited => Some(429),
            _ => None,
        }
    }

    /// Timeouts, transport failures and 5xx responses: worth falling back on.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Transport(_) => true,
            UpstreamError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Short label for logs and metric dimensions.
    pub fn label(&self) -> &'static str {
        match self {
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::Transport(_) => "transport",
            UpstreamError::RateLimited => "rate_limited",
            UpstreamError::Status { status, .. } if *status >= 500 => "server_error",
            UpstreamError::Status { .. } => "client_error",
            UpstreamError::Payload(_) => "payload",
            UpstreamError::InvalidUrl(_) => "invalid_url",
        }
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;
