//! Configuration types shared across crates.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.remote.validate()
    }
}

/// Remote endpoints and published layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// JSON API base URL (listing, sharing).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Content API base URL (uploads).
    #[serde(default = "default_content_url")]
    pub content_url: String,
    /// Website base URL (shared folder pagination).
    #[serde(default = "default_web_url")]
    pub web_url: String,
    /// Release manifest URL.
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,
    /// Publicly shared root folder; INDEX files are kept under it.
    #[serde(default = "default_share_root")]
    pub share_root: String,
    /// Folder holding published kernel artifacts.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
}

fn default_api_url() -> String {
    "https://api.dropboxapi.com".to_string()
}

fn default_content_url() -> String {
    "https://content.dropboxapi.com".to_string()
}

fn default_web_url() -> String {
    "https://www.dropbox.com".to_string()
}

fn default_manifest_url() -> String {
    "https://www.kernel.org/releases.json".to_string()
}

fn default_share_root() -> String {
    "/Public".to_string()
}

fn default_artifact_dir() -> String {
    "/Public/x86_64".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            content_url: default_content_url(),
            web_url: default_web_url(),
            manifest_url: default_manifest_url(),
            share_root: default_share_root(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl RemoteConfig {
    /// Validate endpoint schemes and remote path shapes.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("api_url", &self.api_url),
            ("content_url", &self.content_url),
            ("web_url", &self.web_url),
            ("manifest_url", &self.manifest_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "{name} must start with http:// or https://"
                )));
            }
        }
        for (name, path) in [
            ("share_root", &self.share_root),
            ("artifact_dir", &self.artifact_dir),
        ] {
            if !path.starts_with('/') || path.ends_with('/') {
                return Err(Error::Config(format!(
                    "{name} must be an absolute remote path without a trailing slash"
                )));
            }
        }
        Ok(())
    }

    /// Destination of the compressed vmlinux for a kernel release.
    pub fn vmlinux_destination(&self, release: &str) -> String {
        format!("{}/vmlinux-{release}.zst", self.artifact_dir)
    }

    /// Destination of the boot image for a kernel release.
    pub fn image_destination(&self, release: &str) -> String {
        format!("{}/vmlinuz-{release}", self.artifact_dir)
    }

    /// Destination of an INDEX file given its path relative to the share root.
    pub fn index_destination(&self, index_path: &str) -> String {
        format!("{}/{index_path}", self.share_root)
    }
}

/// Kernel build settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Kernel git checkout; builds run here and build directories are created here.
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Baseline kernel configuration copied into every build directory.
    #[serde(default = "default_baseline_config")]
    pub baseline_config: PathBuf,
    /// Fixed `KBUILD_BUILD_USER`.
    #[serde(default = "default_build_identity")]
    pub build_user: String,
    /// Fixed `KBUILD_BUILD_HOST`.
    #[serde(default = "default_build_identity")]
    pub build_host: String,
    #[serde(default)]
    pub tools: BuildTools,
}

/// External programs invoked by the builder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildTools {
    #[serde(default = "default_git")]
    pub git: PathBuf,
    #[serde(default = "default_make")]
    pub make: PathBuf,
    #[serde(default = "default_objcopy")]
    pub objcopy: PathBuf,
    #[serde(default = "default_zstd")]
    pub zstd: PathBuf,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_baseline_config() -> PathBuf {
    PathBuf::from("vmtest/config")
}

fn default_build_identity() -> String {
    "drgn".to_string()
}

fn default_git() -> PathBuf {
    PathBuf::from("git")
}

fn default_make() -> PathBuf {
    PathBuf::from("make")
}

fn default_objcopy() -> PathBuf {
    PathBuf::from("objcopy")
}

fn default_zstd() -> PathBuf {
    PathBuf::from("zstd")
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            baseline_config: default_baseline_config(),
            build_user: default_build_identity(),
            build_host: default_build_identity(),
            tools: BuildTools::default(),
        }
    }
}

impl Default for BuildTools {
    fn default() -> Self {
        Self {
            git: default_git(),
            make: default_make(),
            objcopy: default_objcopy(),
            zstd: default_zstd(),
        }
    }
}
