//! Command-line interface parsing for origin-cache
//!
//! This module handles parsing of CLI arguments using clap and turns them
//! into the [`Settings`] a scope is built from. Every subcommand runs as an
//! offline task in its own scope.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use reqwest::Url;
use thiserror::Error;

use crate::config::{detect_production, Settings};

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// A duration flag was given as zero
    #[error("Invalid --{0}: must be greater than zero")]
    ZeroDuration(&'static str),

    /// A duration flag is too large to represent
    #[error("Invalid --{0}: value is too large")]
    OutOfRange(&'static str),
}

/// origin-cache - fetch resources through the replaying disk cache
#[derive(Parser, Debug)]
#[command(name = "origin-cache")]
#[command(about = "Fetch resources from external origins through a TTL disk cache")]
#[command(version)]
pub struct Cli {
    /// Always fetch from the network (detected from the runtime if not set)
    #[arg(long, global = true, env = "ORIGIN_CACHE_PRODUCTION")]
    pub production: bool,

    /// Directory holding cache entries
    #[arg(long, global = true, value_name = "DIR", env = "ORIGIN_CACHE_ROOT")]
    pub storage_root: Option<PathBuf>,

    /// Hours a cached entry stays fresh
    #[arg(long, global = true, value_name = "HOURS")]
    pub ttl_hours: Option<u64>,

    /// Seconds before a network fetch gives up
    #[arg(long, global = true, value_name = "SECONDS")]
    pub timeout_secs: Option<u64>,

    /// Vault secret sent to origins as a bearer token
    #[arg(long, global = true, value_name = "NAME", env = "ORIGIN_CACHE_TOKEN_SECRET")]
    pub token_secret: Option<String>,

    /// Write URLs under this base as relative references in JSON output
    #[arg(long, global = true, value_name = "URL", env = "ORIGIN_CACHE_BASE_URL")]
    pub base_url: Option<Url>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Offline tasks
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch a resource and write its body to stdout
    ///
    /// Examples:
    ///   origin-cache fetch https://example.org/a
    ///   origin-cache fetch https://example.org/a --meta
    Fetch {
        /// Resource URL
        url: String,
        /// Print the resource metadata as JSON instead of the body
        #[arg(long)]
        meta: bool,
    },
    /// Remove expired cache entries
    Sweep,
    /// Remove all cache entries
    Clear,
}

impl Cli {
    /// Builds scope settings from the parsed arguments
    ///
    /// # Returns
    /// * `Ok(Settings)` with mode defaults overridden by the given flags
    /// * `Err(CliError)` if a duration flag is zero or too large
    pub fn settings(&self) -> Result<Settings, CliError> {
        self.settings_for(self.production || detect_production())
    }

    fn settings_for(&self, production: bool) -> Result<Settings, CliError> {
        let mut settings = Settings::for_mode(production);

        if let Some(ref root) = self.storage_root {
            settings.storage_root = root.clone();
        }
        if let Some(hours) = self.ttl_hours {
            if hours == 0 {
                return Err(CliError::ZeroDuration("ttl-hours"));
            }
            let secs = hours
                .checked_mul(60 * 60)
                .ok_or(CliError::OutOfRange("ttl-hours"))?;
            settings.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeout_secs {
            if secs == 0 {
                return Err(CliError::ZeroDuration("timeout-secs"));
            }
            let timeout = Duration::from_secs(secs);
            // Fetch deadlines are computed as `Instant::now() + timeout`
            if Instant::now().checked_add(timeout).is_none() {
                return Err(CliError::OutOfRange("timeout-secs"));
            }
            settings.timeout = timeout;
        }
        settings.token_secret = self.token_secret.clone();
        settings.codec_base = self.base_url.clone();

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_fetch() {
        let cli = Cli::parse_from(["origin-cache", "fetch", "https://example.org/a"]);
        assert_eq!(
            cli.command,
            Command::Fetch {
                url: "https://example.org/a".to_string(),
                meta: false
            }
        );
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["origin-cache", "sweep", "--ttl-hours", "2"]);
        assert_eq!(cli.command, Command::Sweep);
        assert_eq!(cli.ttl_hours, Some(2));
    }

    #[test]
    fn test_settings_defaults_for_mode() {
        let cli = Cli::parse_from(["origin-cache", "clear"]);

        let settings = cli.settings_for(false).unwrap();
        assert_eq!(settings, Settings::for_mode(false));

        let settings = cli.settings_for(true).unwrap();
        assert!(settings.production);
    }

    #[test]
    fn test_settings_overrides() {
        let cli = Cli::parse_from([
            "origin-cache",
            "--storage-root",
            "/var/cache/origins",
            "--ttl-hours",
            "6",
            "--timeout-secs",
            "5",
            "--token-secret",
            "api-token",
            "--base-url",
            "https://example.org/api/",
            "sweep",
        ]);

        let settings = cli.settings_for(false).unwrap();
        assert_eq!(settings.storage_root, PathBuf::from("/var/cache/origins"));
        assert_eq!(settings.ttl, Duration::from_secs(6 * 3600));
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.token_secret.as_deref(), Some("api-token"));
        assert_eq!(
            settings.codec_base.as_ref().map(Url::as_str),
            Some("https://example.org/api/")
        );
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let cli = Cli::parse_from(["origin-cache", "--ttl-hours", "0", "sweep"]);

        let err = cli.settings_for(false).unwrap_err();
        assert!(err.to_string().contains("ttl-hours"));
    }

    #[test]
    fn test_oversized_ttl_is_rejected() {
        let cli = Cli::parse_from([
            "origin-cache",
            "--ttl-hours",
            "18446744073709551615",
            "sweep",
        ]);

        let err = cli.settings_for(false).unwrap_err();
        assert!(matches!(err, CliError::OutOfRange("ttl-hours")));
    }

    #[test]
    fn test_oversized_timeout_is_rejected() {
        let cli = Cli::parse_from([
            "origin-cache",
            "--timeout-secs",
            "18446744073709551615",
            "sweep",
        ]);

        let err = cli.settings_for(false).unwrap_err();
        assert!(matches!(err, CliError::OutOfRange("timeout-secs")));
    }
}
