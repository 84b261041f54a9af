//! Rolegate Configuration Module
//! Handles loading and validating rolegate.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "rolegate.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub system: SystemConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix every route is mounted under, without slashes (e.g. "api").
    #[serde(default = "default_prefix")]
    pub url_path_prefix: String,
    /// Seed default roles, users, APIs and rules on startup.
    #[serde(default = "default_true")]
    pub init_data: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_sweep")]
    pub sweep_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Zero disables the time-based flush.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_header")]
    pub header: String,
}

/// Token bucket shared by every request: one token per `fill_interval_ms`,
/// holding at most `capacity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_fill_interval")]
    pub fill_interval_ms: u64,
    #[serde(default = "default_rate_capacity")]
    pub capacity: u64,
}

fn default_port() -> u16 {
    8088
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_prefix() -> String {
    "api".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cache_ttl() -> u64 {
    24 * 60 * 60
}

fn default_cache_sweep() -> u64 {
    48 * 60 * 60
}

fn default_queue_capacity() -> usize {
    30
}

fn default_workers() -> usize {
    3
}

fn default_batch_size() -> usize {
    5
}

fn default_flush_interval() -> u64 {
    5_000
}

fn default_fill_interval() -> u64 {
    50
}

fn default_rate_capacity() -> u64 {
    200
}

fn default_identity_header() -> String {
    "x-auth-user".to_string()
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl(),
            sweep_secs: default_cache_sweep(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { header: default_identity_header() }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fill_interval_ms: default_fill_interval(),
            capacity: default_rate_capacity(),
        }
    }
}

impl RateLimitConfig {
    pub fn fill_interval(&self) -> Duration {
        Duration::from_millis(self.fill_interval_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }
}

impl AuditConfig {
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_ms > 0).then(|| Duration::from_millis(self.flush_interval_ms))
    }
}

impl Config {
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audit.queue_capacity == 0 {
            return Err(ConfigError::Invalid("audit.queue_capacity must be > 0".into()));
        }
        if self.audit.workers == 0 {
            return Err(ConfigError::Invalid("audit.workers must be > 0".into()));
        }
        if self.audit.batch_size == 0 {
            return Err(ConfigError::Invalid("audit.batch_size must be > 0".into()));
        }
        if self.cache.sweep_secs == 0 {
            return Err(ConfigError::Invalid("cache.sweep_secs must be > 0".into()));
        }
        if self.rate_limit.enabled && (self.rate_limit.fill_interval_ms == 0 || self.rate_limit.capacity == 0) {
            return Err(ConfigError::Invalid(
                "rate_limit.fill_interval_ms and rate_limit.capacity must be > 0".into(),
            ));
        }
        if self.system.url_path_prefix.is_empty() || self.system.url_path_prefix.contains('/') {
            return Err(ConfigError::Invalid(
                "system.url_path_prefix must be a non-empty segment without '/'".into(),
            ));
        }
        Ok(())
    }

    pub fn default_for_project(name: &str) -> Self {
        Self {
            version: "0.1.0".to_string(),
            system: SystemConfig {
                host: default_host(),
                port: default_port(),
                url_path_prefix: default_prefix(),
                init_data: true,
            },
            database: DatabaseConfig {
                path: PathBuf::from(format!("./data/{}.db", name)),
            },
            logs: LogsConfig::default(),
            cache: CacheConfig::default(),
            audit: AuditConfig::default(),
            identity: IdentityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
