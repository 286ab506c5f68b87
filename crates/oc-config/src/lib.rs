//! OrgCache Configuration System
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// SQS rejects batches larger than this
pub const MAX_DISPATCH_BATCH_SIZE: usize = 10;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub source: SourceConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub crawl: CrawlConfig,
    pub writer: WriterConfig,

    /// Enable development mode
    pub dev_mode: bool,
}

/// HTTP server configuration (query surface and health checks)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl HttpConfig {
    /// The address every process binds its HTTP listener to
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port).parse().map_err(|_| {
            ConfigError::ValidationError(format!(
                "http.host/http.port do not form a socket address: {}:{}",
                self.host, self.port
            ))
        })
    }
}

/// Remote directory access: the role to assume and how hard to retry the source API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Role assumed in the directory's management account
    pub role_arn: String,
    /// Pre-shared secret the trust policy requires
    pub external_id: String,
    pub session_name: String,
    pub session_duration_seconds: i32,
    pub region: String,
    /// Endpoint override (LocalStack etc.)
    pub endpoint_url: Option<String>,
    pub retry: RetryConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            role_arn: String::new(),
            external_id: String::new(),
            session_name: "orgcache".to_string(),
            session_duration_seconds: 900,
            region: "us-east-1".to_string(),
            endpoint_url: None,
            retry: RetryConfig::default(),
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.role_arn.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "source.role_arn must be set".to_string(),
            ));
        }
        if self.external_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "source.external_id must be set".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "source.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounded exponential backoff for transient source API failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 20_000,
        }
    }
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// sqs, sqlite or memory
    #[serde(rename = "type")]
    pub queue_type: String,
    pub sqs: SqsConfig,
    pub sqlite: SqliteQueueConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_type: "sqs".to_string(),
            sqs: SqsConfig::default(),
            sqlite: SqliteQueueConfig::default(),
        }
    }
}

/// AWS SQS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqsConfig {
    pub queue_url: String,
    pub region: String,
    pub wait_time_seconds: i32,
    pub visibility_timeout: i32,
    pub endpoint_url: Option<String>,
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            queue_url: String::new(),
            region: "us-east-1".to_string(),
            wait_time_seconds: 20,
            visibility_timeout: 120,
            endpoint_url: None,
        }
    }
}

/// Embedded SQLite queue for local development
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteQueueConfig {
    pub url: String,
    pub queue_name: String,
    pub visibility_timeout: u32,
}

impl Default for SqliteQueueConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/queue.db?mode=rwc".to_string(),
            queue_name: "orgcache-work-units".to_string(),
            visibility_timeout: 120,
        }
    }
}

/// Cache store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// sqlite or memory
    #[serde(rename = "type")]
    pub cache_type: String,
    pub sqlite_url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: "sqlite".to_string(),
            sqlite_url: "sqlite://./data/orgcache.db?mode=rwc".to_string(),
        }
    }
}

/// Scheduled crawl + dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub enabled: bool,
    /// Seconds between crawl cycles (daily by default)
    pub interval_seconds: u64,
    /// Run a cycle immediately instead of waiting one interval
    pub run_on_start: bool,
    /// Wall-clock budget for one cycle
    pub timeout_seconds: u64,
    pub dispatch_batch_size: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 24 * 60 * 60,
            run_on_start: true,
            timeout_seconds: 15 * 60,
            dispatch_batch_size: MAX_DISPATCH_BATCH_SIZE,
        }
    }
}

impl CrawlConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Queue-driven cache writer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Work units pulled per poll; kept small to spare the source API
    pub batch_size: u32,
    /// Wall-clock budget for one work unit
    pub timeout_seconds: u64,
    /// Visibility delay before a failed unit is redelivered
    pub redelivery_delay_seconds: u32,
    /// Pause after an empty poll
    pub idle_backoff_ms: u64,
    /// Visibility granted on each heartbeat while a unit is being written; 0 disables heartbeats
    pub visibility_extension_seconds: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            timeout_seconds: 60,
            redelivery_delay_seconds: 30,
            idle_backoff_ms: 1000,
            visibility_extension_seconds: 60,
        }
    }
}

impl WriterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// How often an in-progress unit's visibility is extended, or `None` when disabled.
    ///
    /// Heartbeats fire at half the extension so the unit never becomes visible mid-write.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        if self.visibility_extension_seconds == 0 {
            return None;
        }
        Some(Duration::from_millis(self.visibility_extension_seconds as u64 * 500))
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        let loader = ConfigLoader::new();
        loader.load()
    }

    /// Check settings every process needs regardless of role
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crawl.dispatch_batch_size == 0
            || self.crawl.dispatch_batch_size > MAX_DISPATCH_BATCH_SIZE
        {
            return Err(ConfigError::ValidationError(format!(
                "crawl.dispatch_batch_size must be between 1 and {}",
                MAX_DISPATCH_BATCH_SIZE
            )));
        }
        if self.writer.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "writer.batch_size must be at least 1".to_string(),
            ));
        }
        if self.crawl.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "crawl.interval_seconds must be at least 1".to_string(),
            ));
        }
        match self.queue.queue_type.as_str() {
            "sqs" | "sqlite" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown queue type: {}",
                    other
                )))
            }
        }
        match self.cache.cache_type.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown cache type: {}",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# OrgCache Configuration
# Environment variables (ORGCACHE_*) override these settings

dev_mode = false

[http]
port = 8080
host = "0.0.0.0"

[source]
role_arn = "arn:aws:iam::123456789012:role/orgcache-reader"
external_id = ""
session_name = "orgcache"
session_duration_seconds = 900
region = "us-east-1"

[source.retry]
max_attempts = 5
initial_backoff_ms = 500
max_backoff_ms = 20000

[queue]
type = "sqs"  # sqs, sqlite, or memory

[queue.sqs]
queue_url = ""
region = "us-east-1"
wait_time_seconds = 20
visibility_timeout = 120

[queue.sqlite]
url = "sqlite://./data/queue.db?mode=rwc"
queue_name = "orgcache-work-units"
visibility_timeout = 120

[cache]
type = "sqlite"  # sqlite or memory
sqlite_url = "sqlite://./data/orgcache.db?mode=rwc"

[crawl]
enabled = true
interval_seconds = 86400
run_on_start = true
timeout_seconds = 900
dispatch_batch_size = 10

[writer]
batch_size = 1
timeout_seconds = 60
redelivery_delay_seconds = 30
idle_backoff_ms = 1000
visibility_extension_seconds = 60
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.crawl.interval_seconds, 86400);
        assert_eq!(config.writer.batch_size, 1);
        assert_eq!(config.source.retry.max_attempts, 5);
    }

    #[test]
    fn test_example_toml_parses() {
        let config: AppConfig = toml::from_str(&AppConfig::example_toml()).unwrap();
        assert_eq!(config.queue.queue_type, "sqs");
        assert_eq!(config.cache.cache_type, "sqlite");
        assert_eq!(config.crawl.dispatch_batch_size, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[writer]\nbatch_size = 2\n\n[queue]\ntype = \"memory\"").unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.writer.batch_size, 2);
        assert_eq!(config.writer.timeout_seconds, 60);
        assert_eq!(config.queue.queue_type, "memory");
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn test_socket_addr_uses_configured_host() {
        let mut http = HttpConfig::default();
        assert_eq!(http.socket_addr().unwrap(), "0.0.0.0:8080".parse::<SocketAddr>().unwrap());

        http.host = "127.0.0.1".to_string();
        http.port = 9001;
        assert_eq!(http.socket_addr().unwrap(), "127.0.0.1:9001".parse::<SocketAddr>().unwrap());

        http.host = "not a host".to_string();
        assert!(matches!(http.socket_addr(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_heartbeat_interval_is_half_the_extension() {
        let mut writer = WriterConfig::default();
        assert_eq!(writer.heartbeat_interval(), Some(Duration::from_secs(30)));

        writer.visibility_extension_seconds = 0;
        assert_eq!(writer.heartbeat_interval(), None);
    }

    #[test]
    fn test_validation_rejects_oversized_dispatch_batch() {
        let mut config = AppConfig::default();
        config.crawl.dispatch_batch_size = 11;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        config.crawl.dispatch_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_backends() {
        let mut config = AppConfig::default();
        config.queue.queue_type = "kafka".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cache.cache_type = "redis".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_source_validation_requires_role_and_external_id() {
        let mut source = SourceConfig::default();
        assert!(source.validate().is_err());

        source.role_arn = "arn:aws:iam::123456789012:role/reader".to_string();
        assert!(source.validate().is_err());

        source.external_id = "shared-secret".to_string();
        assert!(source.validate().is_ok());
    }
}
