//! INDEX file rendering and download-link rewriting.
//!
//! An INDEX file lists the entries of one shared directory, one per line:
//! `<name>\t<download-url>\n` for files and `<name>/\t<download-url>\n` for
//! subdirectories, sorted bytewise.

use crate::error::{Error, Result};
use similar::TextDiff;
use url::Url;

/// Literal filename of index files.
pub const INDEX_FILENAME: &str = "INDEX";

/// Rewrite a shared link into a direct-download URL.
///
/// Forces `dl=1`: an existing `dl` parameter is replaced in place (later
/// duplicates dropped), otherwise `dl=1` is appended. All other parameters
/// keep their order.
pub fn download_url(href: &str) -> Result<String> {
    let mut url = Url::parse(href).map_err(|e| Error::InvalidUrl {
        url: href.to_string(),
        reason: e.to_string(),
    })?;

    let mut seen_dl = false;
    let mut pairs: Vec<(String, String)> = Vec::new();
    for (name, value) in url.query_pairs() {
        if name == "dl" {
            if !seen_dl {
                seen_dl = true;
                pairs.push(("dl".to_string(), "1".to_string()));
            }
        } else {
            pairs.push((name.into_owned(), value.into_owned()));
        }
    }
    if !seen_dl {
        pairs.push(("dl".to_string(), "1".to_string()));
    }

    url.query_pairs_mut().clear().extend_pairs(pairs);
    Ok(url.into())
}

/// Remote path of the INDEX file for a directory relative to the share root.
pub fn index_path(dir: &str) -> String {
    if dir.is_empty() {
        INDEX_FILENAME.to_string()
    } else {
        format!("{dir}/{INDEX_FILENAME}")
    }
}

/// Split text into lines, keeping line terminators.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

/// Computed INDEX content for one directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexListing {
    lines: Vec<String>,
}

impl IndexListing {
    /// Render the listing from `(name, shared link)` pairs.
    ///
    /// Links are rewritten with [`download_url`] before rendering.
    pub fn render(files: &[(String, String)], dirs: &[(String, String)]) -> Result<Self> {
        let mut lines = Vec::with_capacity(files.len() + dirs.len());
        for (name, href) in files {
            lines.push(format!("{name}\t{}\n", download_url(href)?));
        }
        for (name, href) in dirs {
            lines.push(format!("{name}/\t{}\n", download_url(href)?));
        }
        lines.sort();
        Ok(Self { lines })
    }

    pub fn content(&self) -> String {
        self.lines.concat()
    }

    /// Whether previously published lines already match this listing.
    pub fn matches(&self, previous: &[String]) -> bool {
        self.lines == previous
    }

    /// Unified diff from the previous lines to this listing.
    pub fn unified_diff(&self, previous: &[String], path: &str) -> String {
        let old = previous.concat();
        let new = self.content();
        TextDiff::from_lines(&old, &new)
            .unified_diff()
            .header(&format!("a/{path}"), &format!("b/{path}"))
            .to_string()
    }
}
