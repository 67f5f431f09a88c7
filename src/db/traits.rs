// Connection Provisioning Traits
// Capabilities the factories are built from: drivers, providers and the factory itself

use crate::db::connection::ConnectionError;
use std::collections::HashMap;

/// Connect-time options passed to a driver (string keys and values)
pub type Properties = HashMap<String, String>;

/// Connection trait - all physical connections must implement this
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection ID
    fn connection_id(&self) -> &str;

    /// Test if the connection is alive
    async fn is_alive(&self) -> bool;

    /// Close the underlying session. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// Allow downcasting for driver-specific operations
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Database driver trait - produces connections from a connect string and properties
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Name the driver is registered under
    fn name(&self) -> &'static str;

    /// Whether this driver understands the given connect string
    fn accepts_url(&self, url: &str) -> bool;

    /// Open a new physical connection
    async fn connect(
        &self,
        url: &str,
        properties: &Properties,
    ) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// A preconfigured source of connections supplied by the embedding application
#[async_trait::async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Connect with the provider's own credentials
    async fn get_connection(&self) -> Result<Box<dyn Connection>, ConnectionError>;

    /// Connect with explicit credentials overriding the provider defaults
    async fn get_connection_as(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// Produces one new physical connection per call.
///
/// Implementations are immutable once constructed and shared between
/// concurrent callers; every call is independent.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create_connection(&self) -> Result<Box<dyn Connection>, ConnectionError>;

    /// Allow downcasting to the concrete factory
    fn as_any(&self) -> &dyn std::any::Any;
}
