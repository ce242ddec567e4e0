//! Error types for the dashboard engine

use std::fmt;

pub type Result<T> = std::result::Result<T, DashboardError>;

#[derive(Debug)]
pub enum DashboardError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP client could not be constructed
    Http(reqwest::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// Configuration error
    Config(String),

    /// Worker pool failed to deliver a result
    Pool(String),

    /// Generic error with message
    Other(String),
}

impl fmt::Display for DashboardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DashboardError::Io(err) => write!(f, "IO error: {}", err),
            DashboardError::Http(err) => write!(f, "HTTP error: {}", err),
            DashboardError::Json(err) => write!(f, "JSON error: {}", err),
            DashboardError::Config(msg) => write!(f, "Configuration error: {}", msg),
            DashboardError::Pool(msg) => write!(f, "Worker pool error: {}", msg),
            DashboardError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for DashboardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DashboardError::Io(err) => Some(err),
            DashboardError::Http(err) => Some(err),
            DashboardError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DashboardError {
    fn from(err: std::io::Error) -> Self {
        DashboardError::Io(err)
    }
}

impl From<reqwest::Error> for DashboardError {
    fn from(err: reqwest::Error) -> Self {
        DashboardError::Http(err)
    }
}

impl From<serde_json::Error> for DashboardError {
    fn from(err: serde_json::Error) -> Self {
        DashboardError::Json(err)
    }
}

/// Failure of a single remote sub-request during a refresh.
#[derive(Debug)]
pub enum FetchError {
    /// Request could not be sent or the response never arrived
    Http(reqwest::Error),

    /// Server responded with an unexpected status code
    Status { code: u16, url: String, body: String },

    /// Response body could not be decoded
    Json(serde_json::Error),

    /// Generic error with message
    Other(String),
}

impl FetchError {
    /// Whether the underlying failure was a request timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Http(err) => err.is_timeout(),
            _ => false,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Http(err) => write!(f, "request failed: {}", err),
            FetchError::Status { code, url, body } => {
                if body.is_empty() {
                    write!(f, "unexpected status code {} from {}", code, url)
                } else {
                    write!(f, "unexpected status code {} from {}: {}", code, url, body)
                }
            }
            FetchError::Json(err) => write!(f, "could not decode response: {}", err),
            FetchError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Http(err) => Some(err),
            FetchError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Http(err)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Json(err)
    }
}

/// Outcome of a refresh cycle that did not fully succeed.
///
/// `NoContent` means the cycle produced nothing displayable and the unit
/// should show as unavailable. `PartialContent` means some of the fanned-out
/// sub-requests failed but the rest delivered usable content.
#[derive(Debug)]
pub enum UpdateError {
    NoContent(Option<String>),
    PartialContent { failed: usize, total: usize },
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::NoContent(None) => write!(f, "failed to retrieve any content"),
            UpdateError::NoContent(Some(detail)) => {
                write!(f, "failed to retrieve any content: {}", detail)
            }
            UpdateError::PartialContent { failed, total } => {
                write!(
                    f,
                    "failed to retrieve some of the content: missing {} of {}",
                    failed, total
                )
            }
        }
    }
}

impl std::error::Error for UpdateError {}

/// Failure while building a unit's display fragment.
#[derive(Debug)]
pub enum RenderError {
    Fmt(fmt::Error),
    Other(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Fmt(err) => write!(f, "formatting failed: {}", err),
            RenderError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RenderError {}

impl From<fmt::Error> for RenderError {
    fn from(err: fmt::Error) -> Self {
        RenderError::Fmt(err)
    }
}
