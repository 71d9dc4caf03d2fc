//! Regeneration of the INDEX files of the public shared tree.

use crate::client::RemoteClient;
use crate::error::RemoteResult;
use crate::shared::{SharedFolders, WebSharedFolders};
use crate::upload::Uploader;
use futures::StreamExt;
use tracing::Span;
use vmtest_core::index::{index_path, split_lines};
use vmtest_core::{CommitInfo, INDEX_FILENAME, IndexListing, RemoteConfig, WriteMode, download_url};

/// Entries of one directory, split by kind, plus its published INDEX lines.
#[derive(Debug, Default)]
struct DirectoryListing {
    files: Vec<(String, String)>,
    dirs: Vec<(String, String)>,
    previous: Vec<String>,
}

/// Keeps every INDEX file under the share root in sync with the actual
/// directory contents.
pub struct IndexSynchronizer<F = WebSharedFolders> {
    folders: F,
    config: RemoteConfig,
    span: Span,
}

impl IndexSynchronizer<WebSharedFolders> {
    pub fn new(client: RemoteClient, parent: &Span) -> Self {
        let config = client.config().clone();
        Self::with_folders(WebSharedFolders::new(client), config, parent)
    }
}

impl<F: SharedFolders> IndexSynchronizer<F> {
    pub fn with_folders(folders: F, config: RemoteConfig, parent: &Span) -> Self {
        Self {
            folders,
            config,
            span: tracing::info_span!(parent: parent, "index"),
        }
    }

    /// Crawl the shared tree, queue an overwrite for every stale INDEX file
    /// and wait for the uploads.
    ///
    /// Returns `true` only if every directory was listed and every queued
    /// update was written. Never fails; errors are logged.
    pub async fn synchronize(&self, uploader: &mut Uploader) -> bool {
        match self.try_synchronize(uploader).await {
            Ok(ok) => ok,
            Err(err) => {
                tracing::error!(parent: &self.span, error = %err, "updating INDEX files failed");
                false
            }
        }
    }

    async fn try_synchronize(&self, uploader: &mut Uploader) -> RemoteResult<bool> {
        tracing::info!(parent: &self.span, "finding shared folder link");
        let root = self.folders.public_link(&self.config.share_root).await?;

        tracing::info!(parent: &self.span, "walking shared folder");
        let failed_dirs = self.refresh_tree(&root, uploader).await;

        let outcome = uploader.wait().await;
        if !outcome.is_success() {
            tracing::error!(parent: &self.span, "updates failed: {}", outcome.failed.join(", "));
        }
        Ok(failed_dirs == 0 && outcome.is_success())
    }

    /// Depth-first walk from the root link. Returns the number of directories
    /// that could not be refreshed.
    async fn refresh_tree(&self, root: &str, uploader: &mut Uploader) -> usize {
        let mut failed = 0;
        let mut stack = vec![(String::new(), root.to_string())];

        while let Some((path, link)) = stack.pop() {
            let listing = match self.list_directory(&link).await {
                Ok(listing) => listing,
                Err(err) => {
                    tracing::error!(parent: &self.span, path = %path, error = %err, "listing shared folder failed");
                    failed += 1;
                    continue;
                }
            };

            if let Err(err) = self.refresh_index(&path, &listing, uploader) {
                tracing::error!(parent: &self.span, path = %path, error = %err, "computing INDEX failed");
                failed += 1;
            }

            let prefix = if path.is_empty() {
                String::new()
            } else {
                format!("{path}/")
            };
            stack.extend(
                listing
                    .dirs
                    .into_iter()
                    .map(|(name, link)| (format!("{prefix}{name}"), link)),
            );
        }

        failed
    }

    async fn list_directory(&self, link: &str) -> RemoteResult<DirectoryListing> {
        let mut listing = DirectoryListing::default();
        let mut entries = self.folders.list_entries(link);
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            if entry.is_dir {
                listing.dirs.push((entry.name, entry.link));
                continue;
            }
            if entry.name == INDEX_FILENAME {
                let text = self.folders.fetch_text(&download_url(&entry.link)?).await?;
                listing.previous = split_lines(&text);
            }
            listing.files.push((entry.name, entry.link));
        }
        Ok(listing)
    }

    fn refresh_index(
        &self,
        path: &str,
        listing: &DirectoryListing,
        uploader: &mut Uploader,
    ) -> RemoteResult<()> {
        let index = IndexListing::render(&listing.files, &listing.dirs)?;
        let index_path = index_path(path);
        if index.matches(&listing.previous) {
            tracing::info!(parent: &self.span, "{index_path} is up to date");
            return Ok(());
        }

        let diff = index.unified_diff(&listing.previous, &index_path);
        tracing::info!(parent: &self.span, "updating {index_path}:\n{}", diff.trim_end_matches('\n'));
        let commit = CommitInfo::new(self.config.index_destination(&index_path))
            .with_mode(WriteMode::Overwrite);
        uploader.queue_bytes(index.content(), commit)
    }
}
