// Driver and Factory Registries
// Name -> implementation lookups used when building connection factories

use crate::db::credentials::redact_connect_string;
use crate::db::traits::{ConnectionFactory, Driver, Properties};
use crate::error::BoxError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Lookup failures
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    #[error("No suitable driver for connect string: {0}")]
    NoSuitableDriver(String),

    #[error("Connection factory type not registered: {0}")]
    FactoryNotRegistered(String),
}

/// Registry for managing database drivers
pub struct DriverRegistry {
    drivers: RwLock<Vec<Arc<dyn Driver>>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(Vec::new()),
        }
    }

    /// Registry preloaded with the built-in SQLite, PostgreSQL and SQL Server drivers
    pub fn with_builtin_drivers() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(crate::db::drivers::SqliteDriver::new()));
        registry.register(Arc::new(crate::db::drivers::PostgresDriver::new()));
        registry.register(Arc::new(crate::db::drivers::MssqlDriver::new()));
        registry
    }

    /// Register a database driver, replacing any driver with the same name
    pub fn register(&self, driver: Arc<dyn Driver>) {
        let name = driver.name();
        let mut drivers = self.drivers.write();
        drivers.retain(|d| d.name() != name);
        drivers.push(driver);
        tracing::debug!(driver = name, "Registered driver");
    }

    /// Get a driver by name
    pub fn get_driver(&self, name: &str) -> Result<Arc<dyn Driver>, RegistryError> {
        let drivers = self.drivers.read();
        drivers
            .iter()
            .find(|d| d.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::DriverNotFound(name.to_string()))
    }

    /// First registered driver that accepts the connect string
    pub fn driver_for_url(&self, url: &str) -> Result<Arc<dyn Driver>, RegistryError> {
        let drivers = self.drivers.read();
        drivers
            .iter()
            .find(|d| d.accepts_url(url))
            .cloned()
            .ok_or_else(|| RegistryError::NoSuitableDriver(redact_connect_string(url)))
    }

    /// Check if a driver is registered under a given name
    pub fn has_driver(&self, name: &str) -> bool {
        let drivers = self.drivers.read();
        drivers.iter().any(|d| d.name() == name)
    }

    /// Get all registered driver names, in registration order
    pub fn driver_names(&self) -> Vec<&'static str> {
        let drivers = self.drivers.read();
        drivers.iter().map(|d| d.name()).collect()
    }

    /// Remove a driver (useful for testing or dynamic unloading)
    pub fn unregister(&self, name: &str) {
        let mut drivers = self.drivers.write();
        drivers.retain(|d| d.name() != name);
        tracing::debug!(driver = name, "Unregistered driver");
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Constructor for a custom connection factory, called with
/// `(driver, connect_string, properties)`
pub type FactoryConstructor = Arc<
    dyn Fn(Arc<dyn Driver>, &str, &Properties) -> Result<Arc<dyn ConnectionFactory>, BoxError>
        + Send
        + Sync,
>;

/// Maps custom connection factory type names to their constructors
pub struct FactoryRegistry {
    constructors: RwLock<HashMap<String, FactoryConstructor>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
        }
    }

    /// Register a constructor under a type name
    pub fn register<F>(&self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn(Arc<dyn Driver>, &str, &Properties) -> Result<Arc<dyn ConnectionFactory>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        let type_name = type_name.into();
        let mut constructors = self.constructors.write();
        constructors.insert(type_name.clone(), Arc::new(constructor));
        tracing::debug!(factory = %type_name, "Registered connection factory type");
    }

    /// Look up the constructor registered under `type_name`
    pub fn get(&self, type_name: &str) -> Result<FactoryConstructor, RegistryError> {
        let constructors = self.constructors.read();
        constructors
            .get(type_name)
            .cloned()
            .ok_or_else(|| RegistryError::FactoryNotRegistered(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.read().contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<String> {
        let constructors = self.constructors.read();
        let mut names: Vec<String> = constructors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn unregister(&self, type_name: &str) {
        self.constructors.write().remove(type_name);
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::factory::tests::RecordingDriver;
    use crate::db::factory::DriverConnectionFactory;

    struct NamedDriver(&'static str, &'static str);

    #[async_trait::async_trait]
    impl Driver for NamedDriver {
        fn name(&self) -> &'static str {
            self.0
        }

        fn accepts_url(&self, url: &str) -> bool {
            url.starts_with(self.1)
        }

        async fn connect(
            &self,
            _url: &str,
            _properties: &Properties,
        ) -> Result<Box<dyn crate::db::traits::Connection>, crate::db::connection::ConnectionError> {
            Err(crate::db::connection::ConnectionError::ConnectionFailed("Mock".to_string()))
        }
    }

    #[test]
    fn test_register_driver() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(NamedDriver("mock", "mock:")));

        assert!(registry.has_driver("mock"));
        assert!(!registry.has_driver("other"));
    }

    #[test]
    fn test_get_driver() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(NamedDriver("mock", "mock:")));

        assert!(registry.get_driver("mock").is_ok());
        assert!(matches!(
            registry.get_driver("missing"),
            Err(RegistryError::DriverNotFound(_))
        ));
    }

    #[test]
    fn test_driver_for_url_uses_registration_order() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(NamedDriver("first", "db:")));
        registry.register(Arc::new(NamedDriver("second", "db:")));
        registry.register(Arc::new(NamedDriver("other", "other:")));

        assert_eq!(registry.driver_for_url("db://x").unwrap().name(), "first");
        assert_eq!(registry.driver_for_url("other://x").unwrap().name(), "other");
        assert!(matches!(
            registry.driver_for_url("nope://x"),
            Err(RegistryError::NoSuitableDriver(_))
        ));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(NamedDriver("mock", "a:")));
        registry.register(Arc::new(NamedDriver("mock", "b:")));

        assert_eq!(registry.driver_names(), vec!["mock"]);
        assert!(registry.driver_for_url("b:x").is_ok());
        assert!(registry.driver_for_url("a:x").is_err());
    }

    #[test]
    fn test_unregister_driver() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(NamedDriver("mock", "mock:")));
        assert!(registry.has_driver("mock"));

        registry.unregister("mock");
        assert!(!registry.has_driver("mock"));
    }

    #[test]
    fn test_builtin_drivers() {
        let registry = DriverRegistry::with_builtin_drivers();
        assert_eq!(registry.driver_names(), vec!["sqlite", "postgresql", "sqlserver"]);
        assert_eq!(registry.driver_for_url("sqlite::memory:").unwrap().name(), "sqlite");
        assert_eq!(registry.driver_for_url("postgres://localhost/db").unwrap().name(), "postgresql");
        assert_eq!(
            registry.driver_for_url("jdbc:sqlserver://localhost:1433;databaseName=master").unwrap().name(),
            "sqlserver"
        );
    }

    #[test]
    fn test_factory_registry() {
        let registry = FactoryRegistry::new();
        registry.register("custom.Factory", |driver, url, props| {
            Ok(Arc::new(DriverConnectionFactory::new(driver, url, props.clone())) as Arc<dyn ConnectionFactory>)
        });

        assert!(registry.contains("custom.Factory"));
        assert_eq!(registry.type_names(), vec!["custom.Factory".to_string()]);

        let constructor = registry.get("custom.Factory").unwrap();
        let factory = constructor(Arc::new(RecordingDriver::default()), "jdbc:test:x", &Properties::new()).unwrap();
        assert!(factory.as_any().downcast_ref::<DriverConnectionFactory>().is_some());

        registry.unregister("custom.Factory");
        assert!(matches!(
            registry.get("custom.Factory"),
            Err(RegistryError::FactoryNotRegistered(_))
        ));
    }
}
