//! Release catalog resolution: which manifest releases still need building.

use crate::client::{RemoteClient, check_status};
use crate::error::{RemoteError, RemoteResult};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::Span;
use vmtest_core::{BuildQueue, Release, ReleaseManifest};

const LIST_FOLDER: &str = "/2/files/list_folder";
const LIST_FOLDER_CONTINUE: &str = "/2/files/list_folder/continue";

/// Prefix of the `error_summary` returned when the listed folder does not exist.
const PATH_NOT_FOUND: &str = "path/not_found/";

#[derive(Debug, Serialize)]
struct ListFolderArg<'a> {
    path: &'a str,
}

#[derive(Debug, Serialize)]
struct ListFolderContinueArg<'a> {
    cursor: &'a str,
}

#[derive(Debug, Deserialize)]
struct ListFolderPage {
    entries: Vec<ListFolderEntry>,
    cursor: Option<String>,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ListFolderEntry {
    #[serde(rename = ".tag")]
    tag: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_summary: String,
}

/// Resolves the build queue from the release manifest and the listing of
/// already-published artifacts.
pub struct CatalogResolver {
    client: RemoteClient,
    span: Span,
}

impl CatalogResolver {
    pub fn new(client: RemoteClient, parent: &Span) -> Self {
        Self {
            client,
            span: tracing::info_span!(parent: parent, "catalog"),
        }
    }

    /// Tracked releases from the release manifest, in manifest order.
    pub async fn manifest_releases(&self) -> RemoteResult<Vec<Release>> {
        let url = &self.client.config().manifest_url;
        let response = self.client.http().get(url).send().await?;
        let manifest: ReleaseManifest = check_status(response).await?.json().await?;
        Ok(manifest.tracked_releases())
    }

    /// Releases with a compressed vmlinux already in the artifact folder.
    ///
    /// A missing artifact folder yields an empty set.
    pub async fn published_releases(&self) -> RemoteResult<HashSet<Release>> {
        let dir = self.client.config().artifact_dir.clone();
        let mut published = HashSet::new();
        let mut request = self
            .client
            .http()
            .post(self.client.api_url(LIST_FOLDER))
            .json(&ListFolderArg { path: &dir });

        loop {
            let response = request.bearer_auth(self.client.token()).send().await?;
            if response.status() == StatusCode::CONFLICT {
                let body = response.text().await.unwrap_or_default();
                if is_path_not_found(&body) {
                    tracing::info!(parent: &self.span, path = %dir, "artifact folder does not exist");
                    break;
                }
                return Err(RemoteError::status(StatusCode::CONFLICT, &body));
            }
            let page: ListFolderPage = check_status(response).await?.json().await?;

            published.extend(
                page.entries
                    .iter()
                    .filter(|entry| entry.tag == "file")
                    .filter_map(|entry| Release::from_artifact_filename(&entry.name)),
            );

            if !page.has_more {
                break;
            }
            let cursor = page.cursor.ok_or(RemoteError::MissingField("cursor"))?;
            request = self
                .client
                .http()
                .post(self.client.api_url(LIST_FOLDER_CONTINUE))
                .json(&ListFolderContinueArg { cursor: &cursor });
        }

        Ok(published)
    }

    /// Explicit commits first, then every tracked manifest release that has
    /// not been published, deduplicated in first-seen order.
    pub async fn resolve(&self, explicit: &[String]) -> RemoteResult<BuildQueue> {
        tracing::info!(parent: &self.span, "getting list of kernel.org releases and available releases");
        let (catalog, published) =
            tokio::try_join!(self.manifest_releases(), self.published_releases())?;

        let catalog_list: Vec<&str> = catalog.iter().map(Release::as_str).collect();
        let mut published_list: Vec<&str> = published.iter().map(Release::as_str).collect();
        published_list.sort_unstable();
        tracing::info!(parent: &self.span, "kernel.org releases: {}", catalog_list.join(", "));
        tracing::info!(parent: &self.span, "available releases: {}", published_list.join(", "));

        let mut queue = BuildQueue::new(explicit.iter().cloned());
        queue.extend_missing(&catalog, &published);
        Ok(queue)
    }
}

fn is_path_not_found(body: &str) -> bool {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|err| err.error_summary.starts_with(PATH_NOT_FOUND))
        .unwrap_or(false)
}
