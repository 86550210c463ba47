//! Configuration module for feedmail.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{FeedmailError, Result};

/// Feed list and polling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedsConfig {
    /// Feed URLs to poll, processed in this order every cycle.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Interval between feed check cycles in minutes.
    #[serde(default = "default_check_interval")]
    pub check_interval_minutes: u64,
    /// Pause between consecutive emails of one feed in milliseconds.
    #[serde(default = "default_send_delay")]
    pub send_delay_ms: u64,
}

fn default_check_interval() -> u64 {
    30
}

fn default_send_delay() -> u64 {
    1000
}

impl FeedsConfig {
    /// Check interval as a `Duration`.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes * 60)
    }

    /// Send delay as a `Duration`.
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            check_interval_minutes: default_check_interval(),
            send_delay_ms: default_send_delay(),
        }
    }
}

/// HTTP fetch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_total_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_feed_size() -> u64 {
    crate::feed::MAX_FEED_SIZE
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
            max_redirects: default_max_redirects(),
            max_feed_size_bytes: default_max_feed_size(),
        }
    }
}

/// Outbound SMTP configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// SMTP relay host.
    #[serde(default = "default_smtp_host")]
    pub host: String,
    /// SMTP port. 465 uses implicit TLS, anything else STARTTLS.
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Login user name.
    #[serde(default)]
    pub username: String,
    /// Login password (usually an app password).
    #[serde(default)]
    pub password: String,
    /// Sender address. Falls back to `username` when empty.
    #[serde(default)]
    pub from: String,
    /// The single recipient of every email.
    #[serde(default)]
    pub recipient: String,
    /// Timeout for one SMTP exchange in seconds.
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_timeout() -> u64 {
    30
}

impl SmtpConfig {
    /// Effective sender address.
    pub fn sender(&self) -> &str {
        if self.from.is_empty() {
            &self.username
        } else {
            &self.from
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from: String::new(),
            recipient: String::new(),
            timeout_secs: default_smtp_timeout(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Delivery records older than this many days are purged (0 disables).
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_db_path() -> String {
    "data/feedmail.db".to_string()
}

fn default_retention_days() -> u32 {
    90
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            retention_days: default_retention_days(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory holding the log files.
    #[serde(default = "default_log_directory")]
    pub directory: String,
    /// File name prefix; files are named `<prefix>.<period>.log`.
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
    /// Rotation period: minutely, hourly, daily or never.
    #[serde(default = "default_log_rotation")]
    pub rotation: String,
    /// Number of log files to keep; 0 keeps all of them.
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> String {
    "data/logs".to_string()
}

fn default_log_file_prefix() -> String {
    "feedmail".to_string()
}

fn default_log_rotation() -> String {
    "daily".to_string()
}

fn default_log_max_files() -> usize {
    31
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_directory(),
            file_prefix: default_log_file_prefix(),
            rotation: default_log_rotation(),
            max_files: default_log_max_files(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Feeds to poll.
    #[serde(default)]
    pub feeds: FeedsConfig,
    /// HTTP fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// SMTP settings.
    #[serde(default)]
    pub smtp: SmtpConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            FeedmailError::Config(format!(
                "failed to read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FeedmailError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDMAIL_SMTP_PASSWORD`: SMTP password
    /// - `FEEDMAIL_SMTP_USERNAME`: SMTP user name
    /// - `FEEDMAIL_RECIPIENT`: recipient address
    pub fn apply_env_overrides(&mut self) {
        if let Some(password) = non_empty_env("FEEDMAIL_SMTP_PASSWORD") {
            self.smtp.password = password;
        }
        if let Some(username) = non_empty_env("FEEDMAIL_SMTP_USERNAME") {
            self.smtp.username = username;
        }
        if let Some(recipient) = non_empty_env("FEEDMAIL_RECIPIENT") {
            self.smtp.recipient = recipient;
        }
    }

    /// Validate the configuration.
    ///
    /// Every problem here is fatal at startup, before any network activity.
    pub fn validate(&self) -> Result<()> {
        if self.feeds.urls.is_empty() {
            return Err(FeedmailError::Config(
                "no feeds configured: add at least one URL to [feeds].urls".to_string(),
            ));
        }
        for url in &self.feeds.urls {
            validate_feed_url(url)?;
        }
        if self.feeds.check_interval_minutes == 0 {
            return Err(FeedmailError::Config(
                "check_interval_minutes must be greater than zero".to_string(),
            ));
        }

        let required = [
            ("smtp.host", self.smtp.host.as_str()),
            ("smtp.username", self.smtp.username.as_str()),
            ("smtp.password", self.smtp.password.as_str()),
            ("smtp.recipient", self.smtp.recipient.as_str()),
            ("smtp.from", self.smtp.sender()),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(FeedmailError::Config(format!(
                "missing required settings: {}. \
                 Set them in config.toml or via FEEDMAIL_* environment variables.",
                missing.join(", ")
            )));
        }

        crate::logging::parse_rotation(&self.logging.rotation)?;
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Check that a configured feed URL is an absolute http(s) URL with a host.
pub fn validate_feed_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(FeedmailError::Config("empty feed URL".to_string()));
    }
    let parsed = url::Url::parse(url)
        .map_err(|e| FeedmailError::Config(format!("invalid feed URL {url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FeedmailError::Config(format!(
                "unsupported URL scheme in {url}: {scheme}"
            )));
        }
    }

    if parsed.host().is_none() {
        return Err(FeedmailError::Config(format!("feed URL has no host: {url}")));
    }
    Ok(())
}
