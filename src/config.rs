//! Process configuration.
//!
//! Values come from command-line flags with environment variable fallbacks,
//! so the service can be run from a container with nothing but env vars.

use crate::error::AppError;
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Default port for the webhook listener.
pub const DEFAULT_PORT: u16 = 4040;

/// Default location of the SQLite database.
pub const DEFAULT_DATABASE_PATH: &str = "/tmp/gitlab-mr-coverage.db";

/// GitLab merge request coverage reporter.
#[derive(Debug, Clone, Parser)]
#[command(name = "mr-coverage", version, about)]
pub struct Config {
    /// Port the webhook listener binds to.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address the webhook listener binds to.
    #[arg(long, env = "BIND_ADDRESS", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_address: IpAddr,

    /// Path to the SQLite database file.
    #[arg(long, env = "DATABASE_PATH", default_value = DEFAULT_DATABASE_PATH)]
    pub database_path: PathBuf,

    /// Base URL of the GitLab instance (e.g. `https://gitlab.com`).
    #[arg(long, env = "GITLAB_URL")]
    pub gitlab_url: String,

    /// Personal access token with `api` scope.
    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
    pub gitlab_token: String,

    /// Shared secret GitLab sends in `X-Gitlab-Token`. Unchecked when unset.
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    /// Timeout for each GitLab API request, in seconds.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        let url = self.gitlab_url.trim();
        if url.is_empty() {
            return Err(AppError::config_field("GitLab URL is required", "gitlab_url"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AppError::config_field(
                format!("GitLab URL must start with http:// or https://, got {}", url),
                "gitlab_url",
            ));
        }
        if self.gitlab_token.trim().is_empty() {
            return Err(AppError::config_field(
                "GitLab token is required",
                "gitlab_token",
            ));
        }
        self.log_level_filter()?;
        if self.request_timeout_secs == 0 {
            return Err(AppError::config_field(
                "Request timeout must be positive",
                "request_timeout_secs",
            ));
        }
        Ok(())
    }

    /// Parsed log level.
    pub fn log_level_filter(&self) -> Result<log::LevelFilter, AppError> {
        self.log_level.parse().map_err(|e| {
            AppError::config_field(
                format!("Invalid log level {:?}: {}", self.log_level, e),
                "log_level",
            )
        })
    }

    /// Socket address for the webhook listener.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}
