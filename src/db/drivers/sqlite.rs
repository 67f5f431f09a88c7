// SQLite Driver
// Implements Driver for SQLite using rusqlite

use crate::db::connection::ConnectionError;
use crate::db::credentials::{PASSWORD_KEY, USER_KEY};
use crate::db::traits::{Connection, Driver, Properties};
use rusqlite::{Connection as RusqliteConnection, OpenFlags};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

/// Property enabling read-only mode ("true"/"false")
pub const READ_ONLY_KEY: &str = "read_only";
/// Property setting the busy timeout in milliseconds
pub const BUSY_TIMEOUT_KEY: &str = "busy_timeout_ms";

/// SQLite specific connection wrapper
pub struct SqliteConnection {
    pub id: String,
    pub path: String,
    conn: Mutex<Option<RusqliteConnection>>,
}

impl SqliteConnection {
    /// Run a closure against the open connection
    pub async fn with_connection<T>(
        &self,
        f: impl FnOnce(&RusqliteConnection) -> rusqlite::Result<T>,
    ) -> Result<T, ConnectionError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(ConnectionError::Closed)?;
        f(conn).map_err(ConnectionError::from)
    }
}

#[async_trait::async_trait]
impl Connection for SqliteConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn is_alive(&self) -> bool {
        self.with_connection(|c| c.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await
            .is_ok()
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let mut guard = self.conn.lock().await;
        match guard.take() {
            Some(conn) => conn.close().map_err(|(_, e)| ConnectionError::from(e)),
            None => Ok(()),
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// SQLite driver implementation
///
/// Accepts `sqlite:<path>`, `sqlite://<path>`, `jdbc:sqlite:<path>` and
/// `sqlite::memory:`. SQLite has no authentication, so `user` and `password`
/// properties are ignored.
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver
    pub fn new() -> Self {
        Self
    }

    /// Extract database path from the connect string
    fn database_path(url: &str) -> Result<String, ConnectionError> {
        let rest = url.strip_prefix("jdbc:").unwrap_or(url);
        let rest = rest
            .strip_prefix("sqlite:")
            .ok_or_else(|| ConnectionError::InvalidUrl(url.to_string()))?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);

        if rest.is_empty() {
            return Err(ConnectionError::InvalidUrl(format!(
                "SQLite database path is required: {}",
                url
            )));
        }

        // Expand ~ to home directory if present
        let path = if let Some(stripped) = rest.strip_prefix("~/") {
            match std::env::var_os("HOME") {
                Some(home) => Path::new(&home).join(stripped).to_string_lossy().to_string(),
                None => rest.to_string(),
            }
        } else {
            rest.to_string()
        };

        Ok(path)
    }

    fn open_flags(properties: &Properties) -> Result<OpenFlags, ConnectionError> {
        let read_only = match properties.get(READ_ONLY_KEY).map(String::as_str) {
            None => false,
            Some(v) => v.parse::<bool>().map_err(|_| {
                ConnectionError::ConfigError(format!("Invalid value for {}: {}", READ_ONLY_KEY, v))
            })?,
        };

        let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if read_only {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(flags)
    }

    /// Open SQLite connection
    fn open_connection(path: &str, properties: &Properties) -> Result<RusqliteConnection, ConnectionError> {
        let flags = Self::open_flags(properties)?;
        let conn = RusqliteConnection::open_with_flags(path, flags).map_err(|e| {
            ConnectionError::ConnectionFailed(format!("Failed to open SQLite database: {}", e))
        })?;

        if let Some(timeout) = properties.get(BUSY_TIMEOUT_KEY) {
            let millis = timeout.parse::<u64>().map_err(|_| {
                ConnectionError::ConfigError(format!("Invalid value for {}: {}", BUSY_TIMEOUT_KEY, timeout))
            })?;
            conn.busy_timeout(Duration::from_millis(millis))?;
        }

        Ok(conn)
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with("sqlite:") || url.starts_with("jdbc:sqlite:")
    }

    async fn connect(
        &self,
        url: &str,
        properties: &Properties,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        let path = Self::database_path(url)?;
        if properties.contains_key(USER_KEY) || properties.contains_key(PASSWORD_KEY) {
            tracing::debug!(path = %path, "Ignoring credentials for SQLite connection");
        }

        let sqlite_conn = Self::open_connection(&path, properties)?;

        Ok(Box::new(SqliteConnection {
            id: uuid::Uuid::new_v4().to_string(),
            path,
            conn: Mutex::new(Some(sqlite_conn)),
        }))
    }
}
