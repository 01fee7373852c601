use thiserror::Error;

/// Centralized error type for lyra-net
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Invalid range header: {0}")]
    InvalidRange(String),
    #[error("Timeout")]
    Timeout,
    #[error("Request failed after {max_retries} retries: {source}")]
    RetryExhausted {
        max_retries: u32,
        source: Box<NetError>,
    },
    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },
}

impl NetError {
    /// Creates an HTTP status error
    pub fn http_status(status: u16, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// Creates a timeout error
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates an HTTP error from a generic string
    pub fn http<S: Into<String>>(msg: S) -> Self {
        Self::Http(msg.into())
    }

    /// Checks if this error is considered retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Http(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("timeout") || msg.contains("connection") || msg.contains("network")
            }
            NetError::Timeout => true,
            NetError::HttpStatus { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            NetError::RetryExhausted { .. } | NetError::InvalidRange(_) => false,
        }
    }

    /// Checks if this error indicates a timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            NetError::Timeout => true,
            NetError::RetryExhausted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Gets the HTTP status code, looking through retry wrappers.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            NetError::HttpStatus { status, .. } => Some(*status),
            NetError::RetryExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        match error.status() {
            Some(status) => Self::HttpStatus {
                status: status.as_u16(),
                url: error.url().map(ToString::to_string).unwrap_or_default(),
            },
            None => Self::Http(error.to_string()),
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;
