//! Build vmtest kernels and publish them.

mod orchestrator;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use orchestrator::{Orchestrator, RunOptions};
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vmtest_core::AppConfig;

const DEFAULT_CONFIG_PATH: &str = "vmtest.toml";

#[derive(Parser, Debug)]
#[command(name = "vmtestctl")]
#[command(about = "Tool for managing vmtest kernel builds and files")]
#[command(version)]
struct Cli {
    /// Build the given kernel release; may be given multiple times. Must be
    /// run from a Linux kernel git repository
    #[arg(short = 'b', long = "build", value_name = "COMMIT")]
    build: Vec<String>,

    /// Build new kernels listed on kernel.org
    #[arg(short = 'k', long = "build-kernel-org")]
    build_kernel_org: bool,

    /// Upload built kernels
    #[arg(short = 'u', long = "upload")]
    upload: bool,

    /// Upload the given file; may be given multiple times
    #[arg(
        short = 'U',
        long = "upload-file",
        num_args = 2,
        value_names = ["SRC_PATH", "DST_PATH"],
        action = ArgAction::Append
    )]
    upload_files: Vec<String>,

    /// Update the INDEX files
    #[arg(short = 'i', long = "index")]
    index: bool,

    /// Configuration file path
    #[arg(long, env = "VMTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Remote API token; prompted for when needed and not given
    #[arg(long, env = "VMTEST_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            commits: self.build.clone(),
            build_missing: self.build_kernel_org,
            upload: self.upload,
            extra_uploads: self
                .upload_files
                .chunks_exact(2)
                .map(|pair| (PathBuf::from(&pair[0]), pair[1].clone()))
                .collect(),
            index: self.index,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let span = tracing::info_span!("vmtestctl");
    let orchestrator = Orchestrator::new(cli.run_options(), config, &span);
    orchestrator.preflight()?;

    let token = if orchestrator.options().needs_token() {
        Some(read_token(cli.token.clone())?)
    } else {
        None
    };

    let report = orchestrator.run(token).await?;
    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Load configuration from the TOML file (when present) and `VMTEST_`
/// environment variables.
fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = explicit.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
    let mut figment = Figment::new();

    if path.exists() {
        figment = figment.merge(Toml::file(path));
    } else if explicit.is_some() {
        anyhow::bail!("config file {} does not exist", path.display());
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("VMTEST_").split("__").ignore(&["token", "config"]))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// The token from the flag or environment, else prompted for on a terminal,
/// else one line of standard input.
fn read_token(token: Option<String>) -> Result<String> {
    if let Some(token) = token {
        return non_empty(token);
    }

    let stdin = std::io::stdin();
    let mut line = String::new();
    if stdin.is_terminal() {
        eprint!("Enter Dropbox app API token: ");
        std::io::stderr().flush()?;
        let _echo = EchoOff::new();
        stdin
            .lock()
            .read_line(&mut line)
            .context("failed to read token from terminal")?;
        eprintln!();
    } else {
        stdin
            .lock()
            .read_line(&mut line)
            .context("failed to read token from stdin")?;
    }
    non_empty(line)
}

/// Turns terminal echo off while alive.
struct EchoOff;

impl EchoOff {
    fn new() -> Self {
        stty("-echo");
        Self
    }
}

impl Drop for EchoOff {
    fn drop(&mut self) {
        stty("echo");
    }
}

fn stty(mode: &str) {
    #[cfg(unix)]
    {
        let _ = std::process::Command::new("stty")
            .arg(mode)
            .stdin(std::process::Stdio::inherit())
            .status();
    }
    #[cfg(not(unix))]
    let _ = mode;
}

fn non_empty(token: String) -> Result<String> {
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("token is empty");
    }
    Ok(token.to_string())
}
