//! Remote API error types.

use thiserror::Error;

/// Errors raised while talking to the remote store or its website.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response.
    #[error("HTTP {status}: {}", status_message(.reason, .body.as_deref()))]
    Status {
        status: u16,
        reason: String,
        body: Option<String>,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("response is missing {0}")]
    MissingField(&'static str),

    #[error("public shared folder link not found under {0}")]
    SharedLinkNotFound(String),

    #[error("could not scrape shared folder listing from {0}")]
    ScrapeFailed(String),

    #[error("{0} is already queued for upload in this batch")]
    DuplicateUpload(String),

    #[error(transparent)]
    Core(#[from] vmtest_core::Error),
}

impl RemoteError {
    /// Build a status error; an empty body is dropped.
    pub fn status(status: reqwest::StatusCode, body: &str) -> Self {
        Self::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body: (!body.is_empty()).then(|| body.to_string()),
        }
    }

    /// HTTP status code, if this is a status error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn status_message(reason: &str, body: Option<&str>) -> String {
    match body {
        Some(body) if reason.is_empty() => body.to_string(),
        Some(body) => format!("{reason}: {body}"),
        None => reason.to_string(),
    }
}

/// Result type for remote operations.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
