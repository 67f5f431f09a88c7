// Data Source Configuration
// Serde-backed settings for a connection factory, its pool and its management name

use crate::db::credentials::Password;
use crate::db::traits::Properties;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Invalid(String),
}

/// Everything needed to build a connection factory and the pool around it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Driver-specific connect string (URL)
    pub connect_string: String,
    /// Connect-time options handed to the driver
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<Password>,
    /// Registered name of a custom connection factory type
    #[serde(default)]
    pub connection_factory: Option<String>,
    /// Registered driver name; resolved from the connect string when absent
    #[serde(default)]
    pub driver: Option<String>,
    /// Object name the data source is published under for monitoring
    #[serde(default)]
    pub management_name: Option<String>,
    #[serde(default)]
    pub pool: PoolSettings,
}

impl DataSourceConfig {
    pub fn new(connect_string: impl Into<String>) -> Self {
        Self {
            connect_string: connect_string.into(),
            properties: Properties::new(),
            username: None,
            password: None,
            connection_factory: None,
            driver: None,
            management_name: None,
            pool: PoolSettings::default(),
        }
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_string.trim().is_empty() {
            return Err(ConfigError::Invalid("Connect string is required".to_string()));
        }
        if self.connection_factory.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "Connection factory name must not be empty".to_string(),
            ));
        }
        self.pool.validate()
    }
}

/// Settings for the pool built around the connection factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum connections managed by the pool (default: 8)
    pub max_size: u32,
    /// Idle connections the pool tries to keep (default: none)
    pub min_idle: Option<u32>,
    /// Maximum lifetime of a physical connection in milliseconds; none or 0 disables the check
    pub max_lifetime_ms: Option<u64>,
    /// How long a checkout waits for a connection (default: 30s)
    pub connection_timeout_ms: u64,
    /// Validate connections when they are checked out (default: true)
    pub test_on_check_out: bool,
    /// Log connections discarded for exceeding their lifetime (default: true)
    pub log_expired_connections: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 8,
            min_idle: None,
            max_lifetime_ms: None,
            connection_timeout_ms: 30_000,
            test_on_check_out: true,
            log_expired_connections: true,
        }
    }
}

impl PoolSettings {
    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::Invalid("Pool max_size must be greater than 0".to_string()));
        }
        if let Some(min_idle) = self.min_idle {
            if min_idle > self.max_size {
                return Err(ConfigError::Invalid(format!(
                    "Pool min_idle ({}) exceeds max_size ({})",
                    min_idle, self.max_size
                )));
            }
        }
        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "Pool connection_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let config = DataSourceConfig::new("sqlite::memory:");
        assert_eq!(config.connect_string, "sqlite::memory:");
        assert!(config.properties.is_empty());
        assert!(config.username.is_none());
        assert!(config.password.is_none());
        assert_eq!(config.pool, PoolSettings::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let text = r#"
            connect_string = "postgres://db.internal/app"
            username = "alice"
            password = "secret"
            connection_factory = "tracing.Factory"
            management_name = "dbconnect:type=DataSource,name=app"

            [properties]
            application_name = "billing"

            [pool]
            max_size = 20
            min_idle = 2
            max_lifetime_ms = 600000
        "#;

        let config = DataSourceConfig::from_toml_str(text).unwrap();

        assert_eq!(config.connect_string, "postgres://db.internal/app");
        assert_eq!(config.username.as_deref(), Some("alice"));
        assert_eq!(config.password.as_ref().map(Password::expose), Some("secret"));
        assert_eq!(config.connection_factory.as_deref(), Some("tracing.Factory"));
        assert_eq!(config.properties.get("application_name").map(String::as_str), Some("billing"));
        assert_eq!(config.pool.max_size, 20);
        assert_eq!(config.pool.min_idle, Some(2));
        assert_eq!(config.pool.max_lifetime(), Some(Duration::from_secs(600)));
        // Unset pool fields keep their defaults
        assert_eq!(config.pool.connection_timeout_ms, 30_000);
        assert!(config.pool.log_expired_connections);
    }

    #[test]
    fn test_password_not_serialized() {
        let mut config = DataSourceConfig::new("sqlite::memory:");
        config.password = Some(Password::new("secret"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            DataSourceConfig::from_toml_str("connect_string = \"  \""),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = DataSourceConfig::new("sqlite::memory:");
        config.pool.max_size = 0;
        assert!(config.validate().is_err());

        config.pool.max_size = 2;
        config.pool.min_idle = Some(3);
        assert!(config.validate().is_err());

        config.pool.min_idle = None;
        config.connection_factory = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_lifetime_disables_check() {
        let settings = PoolSettings {
            max_lifetime_ms: Some(0),
            ..Default::default()
        };
        assert!(settings.max_lifetime().is_none());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            DataSourceConfig::from_toml_str("connect_string = "),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = DataSourceConfig::load("/nonexistent/dbconnect.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
