//! Kernel build error types.

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown revision: {0}")]
    UnknownRevision(String),

    #[error("{} is not a kernel git checkout", .0.display())]
    NotKernelTree(PathBuf),

    /// Creating the build directory or its files failed; an existing build
    /// directory lands here too.
    #[error("preparing {} failed: {source}", .path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("command '{command}' returned non-zero exit status {}{}", exit_code(.status), log_hint(.log.as_deref()))]
    Command {
        command: String,
        status: ExitStatus,
        log: Option<PathBuf>,
    },

    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn exit_code(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => code.to_string(),
        None => status.to_string(),
    }
}

fn log_hint(log: Option<&Path>) -> String {
    log.map(|path| format!("; see {}", path.display()))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, BuildError>;
