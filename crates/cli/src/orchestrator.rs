//! One run: resolve what to build, build it, upload the results and refresh
//! the INDEX files.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::Span;
use vmtest_builder::KernelBuilder;
use vmtest_core::{AppConfig, BuildQueue, BuildResult, CommitInfo};
use vmtest_remote::{CatalogResolver, IndexSynchronizer, RemoteClient, Uploader};

/// What a run should do.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Commits to build, in order.
    pub commits: Vec<String>,
    /// Also build every tracked release that is not published yet.
    pub build_missing: bool,
    /// Upload the artifacts of successful builds.
    pub upload: bool,
    /// Extra `(local path, remote destination)` uploads.
    pub extra_uploads: Vec<(PathBuf, String)>,
    /// Refresh the INDEX files.
    pub index: bool,
}

impl RunOptions {
    pub fn builds(&self) -> bool {
        !self.commits.is_empty() || self.build_missing
    }

    /// Whether any remote operation was requested.
    pub fn needs_token(&self) -> bool {
        self.build_missing || self.upload || !self.extra_uploads.is_empty() || self.index
    }
}

/// Outcome of a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub builds_succeeded: Vec<String>,
    pub builds_failed: Vec<String>,
    pub uploads_succeeded: Vec<String>,
    pub uploads_failed: Vec<String>,
    /// Result of the INDEX refresh; `None` when it did not run.
    pub index: Option<bool>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.builds_failed.is_empty() && self.uploads_failed.is_empty() && self.index != Some(false)
    }

    fn log_summary(&self) {
        if !self.builds_succeeded.is_empty() {
            tracing::info!("successfully built: {}", self.builds_succeeded.join(", "));
        }
        if !self.builds_failed.is_empty() {
            tracing::error!("builds failed: {}", self.builds_failed.join(", "));
        }
        if !self.uploads_succeeded.is_empty() {
            tracing::info!("successfully uploaded: {}", self.uploads_succeeded.join(", "));
        }
        if !self.uploads_failed.is_empty() {
            tracing::error!("uploads failed: {}", self.uploads_failed.join(", "));
        }
    }
}

pub struct Orchestrator {
    options: RunOptions,
    config: AppConfig,
    builder: KernelBuilder,
    span: Span,
}

impl Orchestrator {
    pub fn new(options: RunOptions, config: AppConfig, parent: &Span) -> Self {
        let span = tracing::info_span!(parent: parent, "run");
        let builder = KernelBuilder::new(config.build.clone(), &span);
        Self {
            options,
            config,
            builder,
            span,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Checks that must pass before asking for a token or touching anything.
    pub fn preflight(&self) -> Result<()> {
        if self.options.builds() {
            self.builder
                .ensure_kernel_tree()
                .context("-b/-k must be run from linux.git")?;
        }
        Ok(())
    }

    /// Run everything requested. Per-item failures end up in the report;
    /// only a failure to resolve the build queue is an error.
    pub async fn run(&self, token: Option<String>) -> Result<RunReport> {
        let client = match token {
            Some(token) if self.options.needs_token() => {
                Some(RemoteClient::new(self.config.remote.clone(), token)?)
            }
            _ => None,
        };

        let queue = self.resolve_queue(client.as_ref()).await?;
        let mut uploader = client
            .as_ref()
            .map(|client| Uploader::new(client.clone(), &self.span));
        let mut report = RunReport::default();

        if let Some(uploader) = uploader.as_mut() {
            for (source, destination) in &self.options.extra_uploads {
                let commit = CommitInfo::new(destination.clone()).with_autorename(false);
                queue_upload(uploader, source.clone(), commit, &mut report);
            }
        }

        if !queue.is_empty() {
            let commits: Vec<&str> = queue.iter().collect();
            tracing::info!(parent: &self.span, "releases to build: {}", commits.join(", "));
        }
        for commit in queue {
            let Some(result) = self.builder.build(&commit).await else {
                report.builds_failed.push(commit);
                continue;
            };
            report.builds_succeeded.push(commit);
            if self.options.upload
                && let Some(uploader) = uploader.as_mut()
            {
                self.queue_artifacts(uploader, &result, &mut report);
            }
        }

        if (self.options.upload || !self.options.extra_uploads.is_empty())
            && let Some(uploader) = uploader.as_mut()
        {
            let outcome = uploader.wait().await;
            report.uploads_succeeded.extend(outcome.succeeded);
            report.uploads_failed.extend(outcome.failed);
        }

        report.log_summary();

        if !report.builds_failed.is_empty() || !report.uploads_failed.is_empty() {
            tracing::error!(parent: &self.span, "builds and/or uploads failed");
            return Ok(report);
        }

        if self.options.index
            && let (Some(client), Some(uploader)) = (client, uploader.as_mut())
        {
            let synchronizer = IndexSynchronizer::new(client, &self.span);
            report.index = Some(synchronizer.synchronize(uploader).await);
        }

        Ok(report)
    }

    async fn resolve_queue(&self, client: Option<&RemoteClient>) -> Result<BuildQueue> {
        if !self.options.build_missing {
            return Ok(BuildQueue::new(self.options.commits.iter().cloned()));
        }
        let client = client.context("a token is required to list kernel.org releases")?;
        CatalogResolver::new(client.clone(), &self.span)
            .resolve(&self.options.commits)
            .await
            .context("failed to get kernel.org releases and/or available releases")
    }

    fn queue_artifacts(&self, uploader: &mut Uploader, result: &BuildResult, report: &mut RunReport) {
        let remote = &self.config.remote;
        let artifacts = [
            (
                result.compressed_vmlinux(),
                remote.vmlinux_destination(&result.release),
            ),
            (result.image(), remote.image_destination(&result.release)),
        ];
        for (source, destination) in artifacts {
            let commit = CommitInfo::new(destination).with_autorename(false);
            queue_upload(uploader, source, commit, report);
        }
    }
}

/// Queue one upload; a rejected destination counts as a failed upload.
fn queue_upload(uploader: &mut Uploader, source: PathBuf, commit: CommitInfo, report: &mut RunReport) {
    let destination = commit.path.clone();
    if let Err(err) = uploader.queue_file(source, commit) {
        tracing::error!(path = %destination, error = %err, "could not queue upload");
        report.uploads_failed.push(destination);
    }
}
