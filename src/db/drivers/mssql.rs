// MS-SQL Driver
// Implements Driver for SQL Server using tiberius

use crate::db::connection::ConnectionError;
use crate::db::credentials::{PASSWORD_KEY, USER_KEY};
use crate::db::traits::{Connection, Driver, Properties};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

pub type MssqlClient = Client<Compat<TcpStream>>;

/// MS-SQL specific connection wrapper
pub struct MssqlConnection {
    pub id: String,
    client: Mutex<Option<MssqlClient>>,
}

impl MssqlConnection {
    /// Exclusive access to the client for running statements
    pub async fn client(&self) -> tokio::sync::MutexGuard<'_, Option<MssqlClient>> {
        self.client.lock().await
    }
}

#[async_trait::async_trait]
impl Connection for MssqlConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn is_alive(&self) -> bool {
        let mut guard = self.client.lock().await;
        let Some(client) = guard.as_mut() else {
            return false;
        };
        let alive = match client.simple_query("SELECT 1").await {
            Ok(stream) => stream.into_results().await.is_ok(),
            Err(_) => false,
        };
        alive
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let mut guard = self.client.lock().await;
        match guard.take() {
            Some(client) => client.close().await.map_err(ConnectionError::from),
            None => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// MS-SQL driver implementation
///
/// Accepts `jdbc:sqlserver://` and `sqlserver://` connect strings in the
/// JDBC format (`host:port;databaseName=...;encrypt=...`). The `user` and
/// `password` properties select SQL Server authentication; `databaseName`,
/// `applicationName`, `encrypt` and `trustServerCertificate` override the
/// connect string.
pub struct MssqlDriver;

impl MssqlDriver {
    /// Create a new MS-SQL driver
    pub fn new() -> Self {
        Self
    }

    /// Create a tiberius Config from the connect string and properties
    fn build_config(url: &str, properties: &Properties) -> Result<Config, ConnectionError> {
        let jdbc = if url.starts_with("jdbc:") {
            url.to_string()
        } else {
            format!("jdbc:{}", url)
        };
        let mut config = Config::from_jdbc_string(&jdbc)
            .map_err(|e| ConnectionError::InvalidUrl(format!("{}: {}", url, e)))?;

        if let Some(user) = properties.get(USER_KEY) {
            let password = properties.get(PASSWORD_KEY).map(String::as_str).unwrap_or("");
            config.authentication(AuthMethod::sql_server(user, password));
        }
        if let Some(database) = properties.get("databaseName") {
            config.database(database);
        }
        if let Some(name) = properties.get("applicationName") {
            config.application_name(name);
        }
        if let Some(encrypt) = properties.get("encrypt") {
            let encrypt = Self::parse_bool("encrypt", encrypt)?;
            config.encryption(if encrypt {
                EncryptionLevel::Required
            } else {
                EncryptionLevel::Off
            });
        }
        if let Some(trust) = properties.get("trustServerCertificate") {
            if Self::parse_bool("trustServerCertificate", trust)? {
                config.trust_cert();
            }
        }

        Ok(config)
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConnectionError> {
        value
            .parse::<bool>()
            .map_err(|_| ConnectionError::ConfigError(format!("Invalid value for {}: {}", key, value)))
    }
}

impl Default for MssqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Driver for MssqlDriver {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with("jdbc:sqlserver://") || url.starts_with("sqlserver://")
    }

    async fn connect(
        &self,
        url: &str,
        properties: &Properties,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        let config = Self::build_config(url, properties)?;

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(format!("TCP connection failed: {}", e)))?;

        tcp.set_nodelay(true)
            .map_err(|e| ConnectionError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e)))?;

        let client = Client::connect(config, tcp.compat_write()).await?;

        Ok(Box::new(MssqlConnection {
            id: uuid::Uuid::new_v4().to_string(),
            client: Mutex::new(Some(client)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_name_and_urls() {
        let driver = MssqlDriver::new();
        assert_eq!(driver.name(), "sqlserver");
        assert!(driver.accepts_url("jdbc:sqlserver://localhost:1433;databaseName=master"));
        assert!(driver.accepts_url("sqlserver://localhost"));
        assert!(!driver.accepts_url("postgres://localhost/db"));
    }

    #[test]
    fn test_config_from_jdbc_string() {
        let config =
            MssqlDriver::build_config("jdbc:sqlserver://db.internal:1444;databaseName=sales", &Properties::new())
                .unwrap();
        assert_eq!(config.get_addr(), "db.internal:1444");
    }

    #[test]
    fn test_config_without_jdbc_prefix() {
        let config = MssqlDriver::build_config("sqlserver://localhost:1433", &Properties::new()).unwrap();
        assert_eq!(config.get_addr(), "localhost:1433");
    }

    #[test]
    fn test_credentials_and_flags_accepted() {
        let mut props = Properties::new();
        props.insert("user".to_string(), "sa".to_string());
        props.insert("password".to_string(), "password123".to_string());
        props.insert("encrypt".to_string(), "true".to_string());
        props.insert("trustServerCertificate".to_string(), "false".to_string());

        assert!(MssqlDriver::build_config("jdbc:sqlserver://localhost:1433", &props).is_ok());
    }

    #[tokio::test]
    async fn test_closed_connection_is_not_alive() {
        let conn = MssqlConnection {
            id: "closed".to_string(),
            client: Mutex::new(None),
        };
        assert!(!conn.is_alive().await);
    }

    #[test]
    fn test_invalid_flag_value() {
        let mut props = Properties::new();
        props.insert("encrypt".to_string(), "maybe".to_string());

        let result = MssqlDriver::build_config("jdbc:sqlserver://localhost:1433", &props);
        assert!(matches!(result, Err(ConnectionError::ConfigError(_))));
    }
}
