//! Release identifiers, release manifest filtering and the build queue.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Monikers of manifest releases that are tracked for building.
pub const TRACKED_MONIKERS: [&str; 3] = ["mainline", "stable", "longterm"];

/// Version prefix of the legacy major series that is never built.
///
/// 3.x kernels lack the linker page-size fix required to boot under vmtest.
pub const LEGACY_VERSION_PREFIX: &str = "3.";

static ARTIFACT_FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^vmlinux-(\d+)\.(\d+)\.(\d+)(-rc\d+)?\.zst$")
        .expect("Invalid artifact filename regex")
});

/// A kernel release identifier in tag form (e.g. `v5.10`, `v5.8-rc2`).
///
/// Releases are compared only by string equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Release(String);

impl Release {
    /// Create a release identifier from its tag form.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Map a published artifact filename to the release it was built from.
    ///
    /// `vmlinux-5.10.0.zst` maps to `v5.10`, `vmlinux-5.4.3.zst` to `v5.4.3`
    /// and `vmlinux-5.8.0-rc2.zst` to `v5.8-rc2`. Any other name yields `None`.
    pub fn from_artifact_filename(name: &str) -> Option<Self> {
        let caps = ARTIFACT_FILENAME.captures(name)?;
        let mut tag = format!("v{}.{}", &caps[1], &caps[2]);
        if &caps[3] != "0" {
            tag.push('.');
            tag.push_str(&caps[3]);
        }
        if let Some(rc) = caps.get(4) {
            tag.push_str(rc.as_str());
        }
        Some(Self(tag))
    }

    /// Get the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The remote release manifest document.
#[derive(Clone, Debug, Deserialize)]
pub struct ReleaseManifest {
    pub releases: Vec<ManifestRelease>,
}

/// One entry of the release manifest.
#[derive(Clone, Debug, Deserialize)]
pub struct ManifestRelease {
    pub moniker: String,
    pub version: String,
}

impl ManifestRelease {
    /// Whether this entry should be built: a tracked moniker outside the
    /// legacy series.
    pub fn is_tracked(&self) -> bool {
        TRACKED_MONIKERS.contains(&self.moniker.as_str())
            && !self.version.starts_with(LEGACY_VERSION_PREFIX)
    }

    pub fn release(&self) -> Release {
        Release(format!("v{}", self.version))
    }
}

impl ReleaseManifest {
    /// Tracked releases in manifest order.
    pub fn tracked_releases(&self) -> Vec<Release> {
        self.releases
            .iter()
            .filter(|entry| entry.is_tracked())
            .map(ManifestRelease::release)
            .collect()
    }
}

/// Insertion-ordered, deduplicating queue of commits to build.
///
/// Backed by an ordered map to unit values: membership is a key lookup and
/// iteration follows first insertion.
#[derive(Clone, Debug, Default)]
pub struct BuildQueue {
    entries: IndexMap<String, ()>,
}

impl BuildQueue {
    /// Create a queue seeded with explicitly requested commits.
    pub fn new<I, S>(explicit: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut queue = Self::default();
        for commit in explicit {
            queue.push(commit);
        }
        queue
    }

    /// Append a commit unless already queued. Returns whether it was added.
    pub fn push(&mut self, commit: impl Into<String>) -> bool {
        self.entries.insert(commit.into(), ()).is_none()
    }

    /// Append, in catalog order, every catalog release not yet published.
    pub fn extend_missing(&mut self, catalog: &[Release], published: &HashSet<Release>) {
        for release in catalog {
            if !published.contains(release) {
                self.push(release.as_str());
            }
        }
    }

    pub fn contains(&self, commit: &str) -> bool {
        self.entries.contains_key(commit)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl IntoIterator for BuildQueue {
    type Item = String;
    type IntoIter = indexmap::map::IntoKeys<String, ()>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_keys()
    }
}
