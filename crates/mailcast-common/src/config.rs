//! Configuration for Mailcast

use crate::types::EmailAddress;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix, e.g. `MAILCAST__SMTP__HOST`
pub const ENV_PREFIX: &str = "MAILCAST";

/// Upper bound for the statistics cache TTLs, one day
pub const MAX_CACHE_TTL_SECS: u64 = 86_400;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Outbound SMTP configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Dispatch and statistics tuning
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    1
}

/// Outbound SMTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Username for SMTP AUTH
    pub username: Option<String>,

    /// Password for SMTP AUTH
    pub password: Option<String>,

    /// TLS mode: "starttls", "tls" or "none"
    #[serde(default = "default_smtp_tls")]
    pub tls: String,

    /// Sender address used for every mailing
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Per-send timeout in seconds
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            tls: default_smtp_tls(),
            from_address: default_from_address(),
            timeout_secs: default_smtp_timeout(),
        }
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> String {
    "starttls".to_string()
}

fn default_from_address() -> String {
    "noreply@localhost".to_string()
}

fn default_smtp_timeout() -> u64 {
    30
}

/// Dispatch and statistics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Interval between trigger passes in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Expiry of cached attempt statistics in seconds
    #[serde(default = "default_stats_cache_ttl")]
    pub stats_cache_ttl_secs: u64,

    /// Expiry of cached mailing summaries in seconds
    #[serde(default = "default_summary_cache_ttl")]
    pub summary_cache_ttl_secs: u64,

    /// Number of most recent attempts kept in a stats snapshot
    #[serde(default = "default_recent_attempts_limit")]
    pub recent_attempts_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            stats_cache_ttl_secs: default_stats_cache_ttl(),
            summary_cache_ttl_secs: default_summary_cache_ttl(),
            recent_attempts_limit: default_recent_attempts_limit(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}

fn default_stats_cache_ttl() -> u64 {
    120
}

fn default_summary_cache_ttl() -> u64 {
    60
}

fn default_recent_attempts_limit() -> usize {
    10
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from an optional file overlaid with `MAILCAST__*`
    /// environment variables
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => [
                PathBuf::from("./mailcast.toml"),
                PathBuf::from("/etc/mailcast/config.toml"),
            ]
            .into_iter()
            .find(|p| p.exists()),
        };

        let mut builder = config::Config::builder();

        if let Some(file) = file {
            tracing::debug!(path = %file.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(file)
                    .format(config::FileFormat::Toml)
                    .required(path.is_some()),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Check the settings that cannot be expressed with serde defaults
    pub fn validate(&self) -> crate::Result<()> {
        if self.database.url.as_deref().map_or(true, str::is_empty) {
            return Err(crate::Error::Config("database.url is required".to_string()));
        }

        if !matches!(self.smtp.tls.as_str(), "starttls" | "tls" | "none") {
            return Err(crate::Error::Config(format!(
                "Unsupported smtp.tls mode: {}",
                self.smtp.tls
            )));
        }

        if EmailAddress::parse(&self.smtp.from_address).is_none() {
            return Err(crate::Error::Config(format!(
                "Invalid smtp.from_address: {}",
                self.smtp.from_address
            )));
        }

        if self.dispatch.poll_interval_secs == 0 {
            return Err(crate::Error::Config(
                "dispatch.poll_interval_secs must be positive".to_string(),
            ));
        }

        for (name, secs) in [
            ("stats_cache_ttl_secs", self.dispatch.stats_cache_ttl_secs),
            ("summary_cache_ttl_secs", self.dispatch.summary_cache_ttl_secs),
        ] {
            if secs > MAX_CACHE_TTL_SECS {
                return Err(crate::Error::Config(format!(
                    "dispatch.{} must be at most {}",
                    name, MAX_CACHE_TTL_SECS
                )));
            }
        }

        Ok(())
    }
}
