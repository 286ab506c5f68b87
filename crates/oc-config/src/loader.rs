//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "orgcache.toml",
    "./config/config.toml",
    "/etc/orgcache/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_env_overrides(&mut config, |key| env::var(key).ok());

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("ORGCACHE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `ORGCACHE_*` overrides; `lookup` abstracts the environment so tests stay hermetic
fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // HTTP
    if let Some(port) = lookup("ORGCACHE_HTTP_PORT").and_then(|v| v.parse().ok()) {
        config.http.port = port;
    }
    if let Some(val) = lookup("ORGCACHE_HTTP_HOST") {
        config.http.host = val;
    }

    // Source
    if let Some(val) = lookup("ORGCACHE_SOURCE_ROLE_ARN") {
        config.source.role_arn = val;
    }
    if let Some(val) = lookup("ORGCACHE_SOURCE_EXTERNAL_ID") {
        config.source.external_id = val;
    }
    if let Some(val) = lookup("ORGCACHE_SOURCE_SESSION_NAME") {
        config.source.session_name = val;
    }
    if let Some(val) = lookup("ORGCACHE_SOURCE_REGION") {
        config.source.region = val;
    }
    if let Some(val) = lookup("ORGCACHE_SOURCE_ENDPOINT_URL") {
        config.source.endpoint_url = Some(val);
    }
    if let Some(attempts) = lookup("ORGCACHE_SOURCE_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.source.retry.max_attempts = attempts;
    }

    // Queue
    if let Some(val) = lookup("ORGCACHE_QUEUE_TYPE") {
        config.queue.queue_type = val;
    }
    if let Some(val) = lookup("ORGCACHE_SQS_QUEUE_URL") {
        config.queue.sqs.queue_url = val;
    }
    if let Some(val) = lookup("ORGCACHE_SQS_REGION") {
        config.queue.sqs.region = val;
    }
    if let Some(val) = lookup("ORGCACHE_SQS_ENDPOINT_URL") {
        config.queue.sqs.endpoint_url = Some(val);
    }
    if let Some(val) = lookup("ORGCACHE_SQLITE_QUEUE_URL") {
        config.queue.sqlite.url = val;
    }

    // Cache
    if let Some(val) = lookup("ORGCACHE_CACHE_TYPE") {
        config.cache.cache_type = val;
    }
    if let Some(val) = lookup("ORGCACHE_CACHE_SQLITE_URL") {
        config.cache.sqlite_url = val;
    }

    // Crawl
    if let Some(val) = lookup("ORGCACHE_CRAWL_ENABLED") {
        config.crawl.enabled = val.parse().unwrap_or(true);
    }
    if let Some(interval) = lookup("ORGCACHE_CRAWL_INTERVAL_SECONDS").and_then(|v| v.parse().ok()) {
        config.crawl.interval_seconds = interval;
    }
    if let Some(val) = lookup("ORGCACHE_CRAWL_RUN_ON_START") {
        config.crawl.run_on_start = val.parse().unwrap_or(true);
    }
    if let Some(timeout) = lookup("ORGCACHE_CRAWL_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
        config.crawl.timeout_seconds = timeout;
    }

    // Writer
    if let Some(size) = lookup("ORGCACHE_WRITER_BATCH_SIZE").and_then(|v| v.parse().ok()) {
        config.writer.batch_size = size;
    }
    if let Some(timeout) = lookup("ORGCACHE_WRITER_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
        config.writer.timeout_seconds = timeout;
    }
    if let Some(secs) = lookup("ORGCACHE_WRITER_VISIBILITY_EXTENSION_SECONDS").and_then(|v| v.parse().ok()) {
        config.writer.visibility_extension_seconds = secs;
    }

    // General
    if let Some(val) = lookup("ORGCACHE_DEV_MODE") {
        config.dev_mode = val.parse().unwrap_or(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            lookup_from(&[
                ("ORGCACHE_HTTP_PORT", "9090"),
                ("ORGCACHE_SOURCE_ROLE_ARN", "arn:aws:iam::1:role/r"),
                ("ORGCACHE_QUEUE_TYPE", "sqlite"),
                ("ORGCACHE_WRITER_BATCH_SIZE", "3"),
                ("ORGCACHE_CRAWL_RUN_ON_START", "false"),
                ("ORGCACHE_WRITER_VISIBILITY_EXTENSION_SECONDS", "0"),
            ]),
        );

        assert_eq!(config.http.port, 9090);
        assert_eq!(config.source.role_arn, "arn:aws:iam::1:role/r");
        assert_eq!(config.queue.queue_type, "sqlite");
        assert_eq!(config.writer.batch_size, 3);
        assert!(!config.crawl.run_on_start);
        assert_eq!(config.writer.visibility_extension_seconds, 0);
    }

    #[test]
    fn test_unparseable_numbers_are_ignored() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, lookup_from(&[("ORGCACHE_HTTP_PORT", "not-a-port")]));
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\nport = 7070").unwrap();

        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        assert_eq!(config.http.port, 7070);
    }
}
