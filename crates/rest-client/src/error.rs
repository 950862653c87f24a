use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("resource not found")]
    NotFound,

    /// Any other non-success status.
    #[error("unexpected status {status}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("response decoding failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("host not configured: {0}")]
    MissingHost(String),
}

impl RequestError {
    /// Network failures, timeouts and 5xx responses are worth another
    /// attempt; business rejections are not.
    pub fn is_transient(&self) -> bool {
        match self {
            RequestError::Transport(_) | RequestError::Timeout(_) => true,
            RequestError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RequestError>;
