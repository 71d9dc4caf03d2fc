//! Kernel builds.
//!
//! Each commit is built in its own `build-<commit>` directory under the kernel
//! source tree: the commit is checked out, the baseline configuration is
//! copied in, the kernel is built with reproducible build identity and debug
//! prefix, and the resulting vmlinux is stripped of relocations and
//! compressed. All subprocess output goes to `build.log` in the build
//! directory.

use crate::error::{BuildError, Result};
use crate::process::Cmd;
use std::ffi::OsString;
use std::path::Path;
use std::time::Instant;
use tracing::Span;
use vmtest_core::{BuildConfig, BuildJob, BuildResult, format_duration};

/// Builds kernels one commit at a time from a kernel git checkout.
///
/// Builds check out commits in the shared source tree, so they must not run
/// concurrently.
pub struct KernelBuilder {
    config: BuildConfig,
    jobs: usize,
    span: Span,
}

impl KernelBuilder {
    pub fn new(config: BuildConfig, parent: &Span) -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            config,
            jobs,
            span: tracing::info_span!(parent: parent, "kernel_builder"),
        }
    }

    /// Override the parallel job count passed to make.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Refuse to build outside a kernel git checkout.
    pub fn ensure_kernel_tree(&self) -> Result<()> {
        let source = &self.config.source_dir;
        if source.join(".git").exists() && source.join("kernel").is_dir() {
            Ok(())
        } else {
            Err(BuildError::NotKernelTree(source.clone()))
        }
    }

    /// Build one commit. Failures are logged and yield `None`.
    pub async fn build(&self, commit: &str) -> Option<BuildResult> {
        match self.try_build(commit).await {
            Ok(result) => Some(result),
            Err(err) => {
                tracing::error!(parent: &self.span, commit = %commit, error = %err, "build failed");
                None
            }
        }
    }

    /// Build one commit, returning the first error.
    ///
    /// An unknown revision fails before any directory is created; an existing
    /// build directory fails without touching it.
    pub async fn try_build(&self, commit: &str) -> Result<BuildResult> {
        if !self.revision_exists(commit).await? {
            return Err(BuildError::UnknownRevision(commit.to_string()));
        }

        let job = BuildJob::new(&self.config.source_dir, commit);
        tracing::info!(
            parent: &self.span,
            build_dir = %job.build_dir.display(),
            log = %job.log_path.display(),
            "preparing build directory"
        );
        self.prepare(&job).await?;

        self.checkout(&job).await?;
        tokio::fs::copy(&self.config.baseline_config, job.build_dir.join(".config"))
            .await
            .map_err(|source| BuildError::Prepare {
                path: self.config.baseline_config.clone(),
                source,
            })?;

        let kbuild = self.kbuild_args(&job)?;

        tracing::info!(parent: &self.span, commit = %commit, "building");
        let started = Instant::now();
        self.make(&job, &kbuild)
            .args(["olddefconfig", "all"])
            .run()
            .await?;
        tracing::info!(
            parent: &self.span,
            commit = %commit,
            elapsed = %format_duration(started.elapsed()),
            "built"
        );

        let kernelrelease = self.make(&job, &kbuild).args(["-s", "kernelrelease"]);
        let image_name = self.make(&job, &kbuild).args(["-s", "image_name"]);
        let ((), release, image_path) = tokio::try_join!(
            self.post_process_vmlinux(&job),
            kernelrelease.output(),
            image_name.output(),
        )?;

        Ok(BuildResult {
            build_dir: job.build_dir,
            release,
            image_path,
        })
    }

    async fn revision_exists(&self, commit: &str) -> Result<bool> {
        Cmd::new(&self.config.tools.git)
            .args(["rev-parse", "--verify", "-q"])
            .arg(format!("{commit}^{{commit}}"))
            .current_dir(&self.config.source_dir)
            .succeeds()
            .await
    }

    async fn prepare(&self, job: &BuildJob) -> Result<()> {
        let mut dir = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        dir.mode(0o755);
        dir.create(&job.build_dir)
            .await
            .map_err(|source| BuildError::Prepare {
                path: job.build_dir.clone(),
                source,
            })?;
        tokio::fs::File::create(&job.log_path)
            .await
            .map_err(|source| BuildError::Prepare {
                path: job.log_path.clone(),
                source,
            })?;
        Ok(())
    }

    async fn checkout(&self, job: &BuildJob) -> Result<()> {
        Cmd::new(&self.config.tools.git)
            .arg("checkout")
            .arg(&job.commit)
            .current_dir(&self.config.source_dir)
            .log_to(&job.log_path)
            .run()
            .await
    }

    /// Arguments shared by every make invocation of a build.
    fn kbuild_args(&self, job: &BuildJob) -> Result<Vec<OsString>> {
        let build_dir = std::path::absolute(&job.build_dir)?;
        let mut flags = OsString::from("-fdebug-prefix-map=");
        flags.push(build_dir.as_os_str());
        flags.push("=");

        let mut args = vec![
            OsString::from(format!("KBUILD_BUILD_USER={}", self.config.build_user)),
            OsString::from(format!("KBUILD_BUILD_HOST={}", self.config.build_host)),
        ];
        for var in ["KAFLAGS=", "KCFLAGS="] {
            let mut arg = OsString::from(var);
            arg.push(&flags);
            args.push(arg);
        }
        let mut out = OsString::from("O=");
        out.push(build_dir.as_os_str());
        args.push(out);
        args.push("-j".into());
        args.push(self.jobs.to_string().into());
        Ok(args)
    }

    fn make(&self, job: &BuildJob, kbuild: &[OsString]) -> Cmd {
        let mut cmd = Cmd::new(&self.config.tools.make)
            .args(kbuild)
            .current_dir(&self.config.source_dir)
            .log_to(&job.log_path);
        if let Ok(pwd) = std::path::absolute(&self.config.source_dir) {
            cmd = cmd.env("PWD", pwd);
        }
        cmd
    }

    async fn post_process_vmlinux(&self, job: &BuildJob) -> Result<()> {
        let vmlinux = job.build_dir.join("vmlinux");
        let stripped = job.build_dir.join("vmlinux.norel");
        let compressed = job.build_dir.join("vmlinux.zst");

        tracing::info!(parent: &self.span, path = %vmlinux.display(), "removing relocations");
        Cmd::new(&self.config.tools.objcopy)
            .arg("--remove-relocations=*")
            .arg(&vmlinux)
            .arg(&stripped)
            .log_to(&job.log_path)
            .run()
            .await?;

        self.compress(job, &stripped, &compressed).await
    }

    async fn compress(&self, job: &BuildJob, input: &Path, output: &Path) -> Result<()> {
        tracing::info!(parent: &self.span, path = %input.display(), "compressing");
        let started = Instant::now();
        Cmd::new(&self.config.tools.zstd)
            .args(["-T0", "-19", "-q", "--long"])
            .arg(input)
            .arg("-o")
            .arg(output)
            .log_to(&job.log_path)
            .run()
            .await?;
        tracing::info!(
            parent: &self.span,
            path = %input.display(),
            elapsed = %format_duration(started.elapsed()),
            "compressed"
        );
        Ok(())
    }
}
