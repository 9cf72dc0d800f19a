//! Application configuration
//!
//! Loaded from a YAML file; every field has a default matching the
//! production values, so a missing or partial file still yields a
//! runnable server. Tests override the brew timings to milliseconds.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::models::Category;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub brew: BrewConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

/// Listener and session-pool settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Concurrent session handlers; further connections wait in the
    /// accept backlog.
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            max_sessions: 10,
        }
    }
}

/// Pipeline timing and capacity settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrewConfig {
    /// Brew worker pool size.
    pub workers: usize,
    /// How many items of one category may brew at once.
    pub capacity_per_category: usize,
    pub tea_brew_ms: u64,
    pub coffee_brew_ms: u64,
    /// Scheduler back-off when the head category is saturated.
    pub retry_interval_ms: u64,
}

impl Default for BrewConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity_per_category: 2,
            tea_brew_ms: 30_000,
            coffee_brew_ms: 45_000,
            retry_interval_ms: 100,
        }
    }
}

impl BrewConfig {
    pub fn brew_duration(&self, category: Category) -> Duration {
        let ms = match category {
            Category::Tea => self.tea_brew_ms,
            Category::Coffee => self.coffee_brew_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Logging settings, consumed by [`crate::logging::init_logging`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub log_dir: String,
    pub log_file: String,
    /// "hourly", "daily", or anything else for a single file.
    pub rotation: String,
    pub log_level: String,
    pub use_json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            log_file: "brewline.log".to_string(),
            rotation: "daily".to_string(),
            log_level: "info".to_string(),
            use_json: false,
        }
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.server.max_sessions, 10);
        assert_eq!(config.brew.workers, 4);
        assert_eq!(config.brew.capacity_per_category, 2);
        assert_eq!(
            config.brew.brew_duration(Category::Tea),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.brew.brew_duration(Category::Coffee),
            Duration::from_secs(45)
        );
        assert_eq!(config.brew.retry_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
server:
  port: 9100
brew:
  tea_brew_ms: 50
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.max_sessions, 10);
        assert_eq!(config.brew.tea_brew_ms, 50);
        assert_eq!(config.brew.coffee_brew_ms, 45_000);
        assert_eq!(config.log.rotation, "daily");
    }

    #[test]
    fn test_full_yaml_deserialize() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8888
  max_sessions: 4
brew:
  workers: 2
  capacity_per_category: 1
  tea_brew_ms: 100
  coffee_brew_ms: 200
  retry_interval_ms: 10
log:
  log_dir: "/tmp/brewline"
  log_file: "test.log"
  rotation: "never"
  log_level: "debug"
  use_json: true
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.brew.capacity_per_category, 1);
        assert!(config.log.use_json);
    }
}
