//! Core domain types and shared logic for vmtest kernel publishing.
//!
//! This crate defines the data model used across all other crates:
//! - Release identifiers and the published-artifact filename mapping
//! - The insertion-ordered build queue
//! - Build jobs and build results
//! - Upload commit metadata and batch outcomes
//! - INDEX file rendering and download-link rewriting
//! - Configuration

pub mod build;
pub mod config;
pub mod error;
pub mod index;
pub mod release;
pub mod upload;

pub use build::{BuildJob, BuildResult};
pub use config::{AppConfig, BuildConfig, BuildTools, RemoteConfig};
pub use error::{Error, Result};
pub use index::{INDEX_FILENAME, IndexListing, download_url};
pub use release::{BuildQueue, ManifestRelease, Release, ReleaseManifest};
pub use upload::{CommitInfo, UploadOutcome, WriteMode};

use std::time::Duration;

/// Upload chunk size: 8 MiB
pub const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Format an elapsed duration as `<minutes>m<seconds>s`, rounding to the
/// nearest second.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64().round() as u64;
    format!("{}m{}s", secs / 60, secs % 60)
}
