// PostgreSQL Driver
// Implements Driver for PostgreSQL using tokio-postgres

use crate::db::connection::ConnectionError;
use crate::db::credentials::{PASSWORD_KEY, USER_KEY};
use crate::db::traits::{Connection, Driver, Properties};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config, NoTls};

/// PostgreSQL specific connection wrapper
pub struct PostgresConnection {
    pub id: String,
    client: Option<Client>,
    task: Option<JoinHandle<()>>,
}

impl PostgresConnection {
    /// The underlying client, `None` once closed
    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }
}

#[async_trait::async_trait]
impl Connection for PostgresConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn is_alive(&self) -> bool {
        match &self.client {
            Some(client) if !client.is_closed() => client.simple_query("SELECT 1").await.is_ok(),
            _ => false,
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        // Dropping the client ends the connection task
        self.client.take();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| ConnectionError::ConnectionFailed(format!("Connection task failed: {}", e)))?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for PostgresConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// PostgreSQL driver implementation
///
/// Accepts `postgres://`, `postgresql://` and `jdbc:postgresql://` URLs as well
/// as key/value connect strings prefixed with `postgres:`. The `user`,
/// `password`, `dbname`, `application_name`, `options` and `connect_timeout`
/// (seconds) properties override what the URL carries.
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver
    pub fn new() -> Self {
        Self
    }

    /// Build the tokio-postgres config from the connect string and properties
    fn build_config(url: &str, properties: &Properties) -> Result<Config, ConnectionError> {
        let raw = url.strip_prefix("jdbc:").unwrap_or(url);
        let raw = match raw.strip_prefix("postgres:") {
            Some(rest) if !rest.starts_with("//") => rest,
            _ => raw,
        };

        let mut config: Config = raw
            .parse()
            .map_err(|e: tokio_postgres::Error| ConnectionError::InvalidUrl(format!("{}: {}", url, e)))?;

        for (key, value) in properties {
            match key.as_str() {
                USER_KEY => {
                    config.user(value);
                }
                PASSWORD_KEY => {
                    config.password(value);
                }
                "dbname" => {
                    config.dbname(value);
                }
                "application_name" => {
                    config.application_name(value);
                }
                "options" => {
                    config.options(value);
                }
                "connect_timeout" => {
                    let secs = value.parse::<u64>().map_err(|_| {
                        ConnectionError::ConfigError(format!("Invalid value for connect_timeout: {}", value))
                    })?;
                    config.connect_timeout(Duration::from_secs(secs));
                }
                other => {
                    tracing::debug!(property = other, "Ignoring unsupported PostgreSQL property");
                }
            }
        }

        Ok(config)
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Driver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with("postgres://")
            || url.starts_with("postgresql://")
            || url.starts_with("jdbc:postgresql://")
            || url.starts_with("postgres:")
    }

    async fn connect(
        &self,
        url: &str,
        properties: &Properties,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        let config = Self::build_config(url, properties)?;
        let (client, connection) = config.connect(NoTls).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(connection = %task_id, error = %e, "PostgreSQL connection terminated");
            }
        });

        Ok(Box::new(PostgresConnection {
            id,
            client: Some(client),
            task: Some(task),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_name_and_urls() {
        let driver = PostgresDriver::new();
        assert_eq!(driver.name(), "postgresql");
        assert!(driver.accepts_url("postgres://localhost/db"));
        assert!(driver.accepts_url("postgresql://localhost/db"));
        assert!(driver.accepts_url("jdbc:postgresql://localhost:5432/db"));
        assert!(!driver.accepts_url("sqlite::memory:"));
    }

    #[test]
    fn test_config_from_url() {
        let config = PostgresDriver::build_config("postgres://localhost:5432/testdb", &Properties::new()).unwrap();
        assert_eq!(config.get_dbname(), Some("testdb"));
        assert_eq!(config.get_ports(), &[5432]);
        assert!(config.get_user().is_none());
    }

    #[test]
    fn test_jdbc_prefix_is_stripped() {
        let config = PostgresDriver::build_config("jdbc:postgresql://db.internal/app", &Properties::new()).unwrap();
        assert_eq!(config.get_dbname(), Some("app"));
    }

    #[test]
    fn test_key_value_connect_string() {
        let config =
            PostgresDriver::build_config("postgres:host=localhost dbname=kv", &Properties::new()).unwrap();
        assert_eq!(config.get_dbname(), Some("kv"));
    }

    #[test]
    fn test_properties_override_url() {
        let mut props = Properties::new();
        props.insert("user".to_string(), "alice".to_string());
        props.insert("password".to_string(), "secret".to_string());
        props.insert("application_name".to_string(), "dbconnect".to_string());
        props.insert("connect_timeout".to_string(), "5".to_string());

        let config = PostgresDriver::build_config("postgres://bob@localhost/testdb", &props).unwrap();

        assert_eq!(config.get_user(), Some("alice"));
        assert_eq!(config.get_password(), Some(&b"secret"[..]));
        assert_eq!(config.get_application_name(), Some("dbconnect"));
        assert_eq!(config.get_connect_timeout(), Some(&Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_connect_timeout() {
        let mut props = Properties::new();
        props.insert("connect_timeout".to_string(), "later".to_string());

        let result = PostgresDriver::build_config("postgres://localhost/testdb", &props);
        assert!(matches!(result, Err(ConnectionError::ConfigError(_))));
    }

    #[test]
    fn test_invalid_url() {
        let result = PostgresDriver::build_config("postgres://localhost:notaport/db", &Properties::new());
        assert!(matches!(result, Err(ConnectionError::InvalidUrl(_))));
    }
}
