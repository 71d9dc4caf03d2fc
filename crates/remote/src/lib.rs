//! Remote store access for vmtest kernel publishing.
//!
//! Provides:
//! - An authenticated HTTP client for the remote API and website
//! - Release catalog resolution (manifest vs. published artifacts)
//! - Concurrent chunked uploads
//! - Shared folder listing and INDEX file synchronization

pub mod catalog;
pub mod client;
pub mod error;
pub mod index;
pub mod shared;
pub mod upload;

pub use catalog::CatalogResolver;
pub use client::RemoteClient;
pub use error::{RemoteError, RemoteResult};
pub use index::IndexSynchronizer;
pub use shared::{EntryStream, FolderEntry, SharedFolders, WebSharedFolders};
pub use upload::{UploadSource, Uploader};
