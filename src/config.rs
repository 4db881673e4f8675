//! CLI and file configuration for the demo binary, resolved into a single
//! [`AppConfig`] by merging a TOML overlay over CLI defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::server::ProcessingServerOptions;

/// Command-line arguments for the demo binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "processing-server-demo")]
pub struct CliArgs {
    /// Optional TOML config file; values there override these CLI defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value_t = 15)]
    pub stop_timeout_secs: u64,

    #[arg(long, default_value_t = 15)]
    pub shutdown_timeout_secs: u64,

    #[arg(long, default_value_t = 5)]
    pub last_chance_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub max_attempts: u32,

    #[arg(long, default_value_t = 3600)]
    pub max_retry_delay_secs: u64,

    #[arg(long, default_value_t = 15)]
    pub restart_delay_secs: u64,
}

/// Mirrors [`CliArgs`]' overridable fields; every field optional so a
/// partial TOML file only overrides what it mentions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub stop_timeout_secs: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
    pub last_chance_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub max_retry_delay_secs: Option<u64>,
    pub restart_delay_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path:?}"))?;
        toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
    }
}

/// Resolved configuration: file overrides CLI, field by field.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_options: ProcessingServerOptions,
}

impl AppConfig {
    pub fn resolve(cli: &CliArgs, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let stop_timeout_secs = file.stop_timeout_secs.unwrap_or(cli.stop_timeout_secs);
        let shutdown_timeout_secs = file
            .shutdown_timeout_secs
            .unwrap_or(cli.shutdown_timeout_secs);
        let last_chance_timeout_secs = file
            .last_chance_timeout_secs
            .unwrap_or(cli.last_chance_timeout_secs);
        let max_attempts = file.max_attempts.unwrap_or(cli.max_attempts);
        let max_retry_delay_secs = file
            .max_retry_delay_secs
            .unwrap_or(cli.max_retry_delay_secs);
        let restart_delay_secs = file.restart_delay_secs.unwrap_or(cli.restart_delay_secs);

        if max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }

        Ok(Self {
            server_options: ProcessingServerOptions {
                stop_timeout: Duration::from_secs(stop_timeout_secs),
                shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
                last_chance_timeout: Duration::from_secs(last_chance_timeout_secs),
                restart_delay: Duration::from_secs(restart_delay_secs),
                max_attempts,
                max_retry_delay: Duration::from_secs(max_retry_delay_secs),
            },
        })
    }
}
