//! Subprocess execution with output redirected to a build log.

use crate::error::{BuildError, Result};
use std::ffi::{OsStr, OsString};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// A command to run, built up fluently.
///
/// Output that is not captured goes to the log file when one is set and is
/// discarded otherwise.
#[derive(Clone, Debug)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    log: Option<PathBuf>,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            log: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Append uncaptured output to `path`.
    pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.log = Some(path.into());
        self
    }

    /// Shell-quoted command line, for error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|arg| quote(&arg.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion with stdout and stderr going to the log.
    pub async fn run(&self) -> Result<()> {
        let mut command = self.command();
        command.stdout(self.log_stdio()?).stderr(self.log_stdio()?);
        let status = command.status().await.map_err(|source| self.spawn_error(source))?;
        if !status.success() {
            return Err(self.exit_error(status));
        }
        Ok(())
    }

    /// Run to completion and return trimmed stdout; stderr goes to the log.
    pub async fn output(&self) -> Result<String> {
        let mut command = self.command();
        command.stdout(Stdio::piped()).stderr(self.log_stdio()?);
        let child = command.spawn().map_err(|source| self.spawn_error(source))?;
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(self.exit_error(output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Whether the command exits successfully. Failure to start is an error.
    pub async fn succeeds(&self) -> Result<bool> {
        let mut command = self.command();
        command.stdout(self.log_stdio()?).stderr(self.log_stdio()?);
        let status = command.status().await.map_err(|source| self.spawn_error(source))?;
        Ok(status.success())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        command
    }

    fn log_stdio(&self) -> Result<Stdio> {
        let Some(path) = &self.log else {
            return Ok(Stdio::null());
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Stdio::from(file))
    }

    fn spawn_error(&self, source: std::io::Error) -> BuildError {
        BuildError::Spawn {
            command: self.command_line(),
            source,
        }
    }

    fn exit_error(&self, status: std::process::ExitStatus) -> BuildError {
        BuildError::Command {
            command: self.command_line(),
            status,
            log: self.log.clone(),
        }
    }
}

/// Quote an argument for display in a POSIX shell.
fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
