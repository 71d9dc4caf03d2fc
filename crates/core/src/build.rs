//! Build job and build result types.

use std::path::{Path, PathBuf};

/// Name of the per-build log file inside the build directory.
pub const BUILD_LOG_NAME: &str = "build.log";

/// A commit selected for building.
///
/// Lives only for the duration of one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildJob {
    /// Commit reference (hash, tag or branch).
    pub commit: String,
    /// Exclusive build directory; must not exist before the build.
    pub build_dir: PathBuf,
    /// Log file receiving all subprocess output.
    pub log_path: PathBuf,
}

impl BuildJob {
    /// Create a job whose build directory is named deterministically from the
    /// commit, under `source_dir`.
    pub fn new(source_dir: &Path, commit: &str) -> Self {
        let build_dir = source_dir.join(Self::dir_name(commit));
        let log_path = build_dir.join(BUILD_LOG_NAME);
        Self {
            commit: commit.to_string(),
            build_dir,
            log_path,
        }
    }

    /// `build-<commit>`, with path separators flattened so the directory is a
    /// direct child of the source tree.
    pub fn dir_name(commit: &str) -> String {
        format!("build-{}", commit.replace('/', "_"))
    }
}

/// Outcome of a successful build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildResult {
    pub build_dir: PathBuf,
    /// Kernel release as reported by the build system (`uname -r` form).
    pub release: String,
    /// Boot image path relative to the build directory (e.g. `arch/x86/boot/bzImage`).
    pub image_path: String,
}

impl BuildResult {
    /// The compressed, relocation-stripped vmlinux.
    pub fn compressed_vmlinux(&self) -> PathBuf {
        self.build_dir.join("vmlinux.zst")
    }

    /// The boot image.
    pub fn image(&self) -> PathBuf {
        self.build_dir.join(&self.image_path)
    }
}
