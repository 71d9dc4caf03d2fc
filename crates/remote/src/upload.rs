//! Concurrent uploads to the remote store.
//!
//! Each queued upload runs as its own task. Content up to one chunk goes in a
//! single request; anything larger goes through an upload session: start,
//! one append per chunk, and a finish request carrying the last chunk and the
//! commit metadata.

use crate::client::{RemoteClient, check_status};
use crate::error::{RemoteError, RemoteResult};
use bytes::Bytes;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};
use vmtest_core::upload::{AppendArg, FinishArg, StartSessionResponse, UploadCursor};
use vmtest_core::{CHUNK_SIZE, CommitInfo, UploadOutcome, format_duration};

const UPLOAD: &str = "/2/files/upload";
const SESSION_START: &str = "/2/files/upload_session/start";
const SESSION_APPEND: &str = "/2/files/upload_session/append_v2";
const SESSION_FINISH: &str = "/2/files/upload_session/finish";

/// Request metadata header of the content endpoints.
const API_ARG_HEADER: &str = "Dropbox-API-Arg";

/// Content of one upload.
#[derive(Clone, Debug)]
pub enum UploadSource {
    /// A local file, read one chunk at a time.
    Path(PathBuf),
    /// In-memory content.
    Bytes(Bytes),
}

enum ChunkReader {
    File(tokio::fs::File),
    Bytes(Bytes),
}

impl ChunkReader {
    async fn open(source: UploadSource) -> RemoteResult<Self> {
        Ok(match source {
            UploadSource::Path(path) => Self::File(tokio::fs::File::open(path).await?),
            UploadSource::Bytes(data) => Self::Bytes(data),
        })
    }

    /// Next chunk of at most [`CHUNK_SIZE`] bytes; empty at end of input.
    async fn next_chunk(&mut self) -> RemoteResult<Bytes> {
        match self {
            Self::File(file) => {
                let mut buf = Vec::with_capacity(CHUNK_SIZE);
                (&mut *file)
                    .take(CHUNK_SIZE as u64)
                    .read_to_end(&mut buf)
                    .await?;
                Ok(Bytes::from(buf))
            }
            Self::Bytes(remaining) => {
                let len = remaining.len().min(CHUNK_SIZE);
                Ok(remaining.split_to(len))
            }
        }
    }
}

/// Upload one source to the destination named by `commit`.
pub async fn upload(
    client: &RemoteClient,
    source: UploadSource,
    commit: &CommitInfo,
) -> RemoteResult<()> {
    let mut reader = ChunkReader::open(source).await?;
    let mut chunk = reader.next_chunk().await?;
    let mut next = reader.next_chunk().await?;

    if next.is_empty() {
        content_request(client, UPLOAD, commit, chunk).await?;
        return Ok(());
    }

    let started: StartSessionResponse =
        content_request(client, SESSION_START, &serde_json::json!({}), Bytes::new())
            .await?
            .json()
            .await?;
    let mut cursor = UploadCursor {
        session_id: started.session_id,
        offset: 0,
    };

    while !next.is_empty() {
        let len = chunk.len() as u64;
        content_request(client, SESSION_APPEND, &AppendArg { cursor: &cursor }, chunk).await?;
        cursor.offset += len;
        chunk = next;
        next = reader.next_chunk().await?;
    }

    let finish = FinishArg {
        cursor: &cursor,
        commit,
    };
    content_request(client, SESSION_FINISH, &finish, chunk).await?;
    Ok(())
}

async fn content_request<A: Serialize + ?Sized>(
    client: &RemoteClient,
    path: &str,
    arg: &A,
    body: Bytes,
) -> RemoteResult<reqwest::Response> {
    let arg = header_safe_json(&serde_json::to_string(arg)?);
    let response = client
        .http()
        .post(client.content_url(path))
        .bearer_auth(client.token())
        .header(API_ARG_HEADER, arg)
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(body)
        .send()
        .await?;
    check_status(response).await
}

/// Escape non-ASCII characters as `\uXXXX` so JSON fits in a header value.
fn header_safe_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() && c != '\u{7f}' {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

/// Runs uploads concurrently and collects their outcomes in batches.
///
/// Every queued upload is awaited by the next [`Uploader::wait`], which also
/// starts a fresh batch.
pub struct Uploader {
    client: RemoteClient,
    pending: Vec<(String, JoinHandle<bool>)>,
    span: Span,
}

impl Uploader {
    pub fn new(client: RemoteClient, parent: &Span) -> Self {
        Self {
            client,
            pending: Vec::new(),
            span: tracing::info_span!(parent: parent, "uploader"),
        }
    }

    /// Start uploading a local file.
    pub fn queue_file(&mut self, path: impl Into<PathBuf>, commit: CommitInfo) -> RemoteResult<()> {
        self.queue(UploadSource::Path(path.into()), commit)
    }

    /// Start uploading in-memory content.
    pub fn queue_bytes(&mut self, data: impl Into<Bytes>, commit: CommitInfo) -> RemoteResult<()> {
        self.queue(UploadSource::Bytes(data.into()), commit)
    }

    /// Number of uploads in the current batch.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn queue(&mut self, source: UploadSource, commit: CommitInfo) -> RemoteResult<()> {
        if self.pending.iter().any(|(path, _)| *path == commit.path) {
            return Err(RemoteError::DuplicateUpload(commit.path));
        }

        let destination = commit.path.clone();
        let client = self.client.clone();
        let span = tracing::info_span!(parent: &self.span, "upload", path = %destination);
        let handle = tokio::spawn(
            async move {
                let started = Instant::now();
                let origin = match &source {
                    UploadSource::Path(local) => local.display().to_string(),
                    UploadSource::Bytes(data) => format!("<{} bytes in memory>", data.len()),
                };
                tracing::info!(source = %origin, "uploading");
                match upload(&client, source, &commit).await {
                    Ok(()) => {
                        tracing::info!(elapsed = %format_duration(started.elapsed()), "uploaded");
                        true
                    }
                    Err(err) => {
                        tracing::error!(
                            source = %origin,
                            destination = %commit.path,
                            error = %err,
                            "upload failed"
                        );
                        false
                    }
                }
            }
            .instrument(span),
        );
        self.pending.push((destination, handle));
        Ok(())
    }

    /// Wait for every upload queued since the last call.
    pub async fn wait(&mut self) -> UploadOutcome {
        let mut outcome = UploadOutcome::default();
        let span = &self.span;
        for (path, handle) in std::mem::take(&mut self.pending) {
            match handle.await {
                Ok(true) => outcome.succeeded.push(path),
                Ok(false) => outcome.failed.push(path),
                Err(err) => {
                    tracing::error!(parent: span, path = %path, error = %err, "upload task aborted");
                    outcome.failed.push(path);
                }
            }
        }
        outcome
    }
}
