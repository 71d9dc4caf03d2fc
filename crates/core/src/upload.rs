//! Upload commit metadata and chunked-upload session arguments.

use serde::{Deserialize, Serialize};

/// Collision policy applied when the destination already exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Never overwrite; conflicts fail or rename.
    Add,
    /// Replace any existing file.
    Overwrite,
}

/// Metadata committed with the final request of an upload.
///
/// Optional fields are only serialized when set by the caller so the server
/// applies its own defaults otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Destination path in the remote store.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<WriteMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autorename: Option<bool>,
}

impl CommitInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: None,
            autorename: None,
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_autorename(mut self, autorename: bool) -> Self {
        self.autorename = Some(autorename);
        self
    }
}

/// Position within an open upload session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCursor {
    pub session_id: String,
    /// Bytes sent so far in this session.
    pub offset: u64,
}

/// Argument of an append request.
#[derive(Clone, Debug, Serialize)]
pub struct AppendArg<'a> {
    pub cursor: &'a UploadCursor,
}

/// Argument of a finish request.
#[derive(Clone, Debug, Serialize)]
pub struct FinishArg<'a> {
    pub cursor: &'a UploadCursor,
    pub commit: &'a CommitInfo,
}

/// Response of a session start request.
#[derive(Clone, Debug, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}

/// Aggregated result of one upload batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}
