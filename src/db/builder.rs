// Connection Factory Builder
// Selects and constructs the connection factory described by a data source configuration

use crate::config::DataSourceConfig;
use crate::db::credentials::{merge_credentials, redact_connect_string, scrub_properties};
use crate::db::factory::DriverConnectionFactory;
use crate::db::registry::{DriverRegistry, FactoryRegistry};
use crate::db::traits::{ConnectionFactory, Driver};
use crate::error::BoxError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Failure to build a connection factory. Always carries the original cause.
#[derive(Debug, Error)]
pub enum FactoryConstructionError {
    #[error("Cannot create connection factory of type '{type_name}': {source}")]
    CustomFactory {
        type_name: String,
        #[source]
        source: BoxError,
    },

    #[error("Cannot load driver for connect string '{connect_string}': {source}")]
    Driver {
        connect_string: String,
        #[source]
        source: BoxError,
    },
}

/// A custom factory constructor panicked instead of returning an error
#[derive(Debug, Error)]
#[error("Connection factory constructor panicked: {0}")]
pub struct ConstructorPanicked(pub String);

/// Builds the connection factory a pool will use for its physical connections
#[derive(Clone)]
pub struct ConnectionFactoryBuilder {
    factories: Arc<FactoryRegistry>,
}

impl ConnectionFactoryBuilder {
    pub fn new(factories: Arc<FactoryRegistry>) -> Self {
        Self { factories }
    }

    pub fn factories(&self) -> &Arc<FactoryRegistry> {
        &self.factories
    }

    /// Build a factory for `config` on top of an already resolved driver.
    ///
    /// Credentials are merged into a copy of the configured properties under
    /// the `user` and `password` keys. When a custom factory type is named,
    /// its registered constructor is used; otherwise the driver is called
    /// directly.
    pub fn build(
        &self,
        config: &DataSourceConfig,
        driver: Arc<dyn Driver>,
    ) -> Result<Arc<dyn ConnectionFactory>, FactoryConstructionError> {
        let mut properties = config.properties.clone();
        let merged = merge_credentials(
            &mut properties,
            config.username.as_deref(),
            config.password.as_ref(),
        );
        if !merged.user || !merged.password {
            let connect_string = redact_connect_string(&config.connect_string);
            if !merged.user {
                tracing::info!(connect_string = %connect_string, "Data source configured without a 'username'");
            }
            if !merged.password {
                tracing::info!(connect_string = %connect_string, "Data source configured without a 'password'");
            }
        }

        if let Some(type_name) = &config.connection_factory {
            let wrap = |source: BoxError| FactoryConstructionError::CustomFactory {
                type_name: type_name.clone(),
                source,
            };

            let constructor = match self.factories.get(type_name) {
                Ok(constructor) => constructor,
                Err(e) => {
                    scrub_properties(&mut properties);
                    return Err(wrap(e.into()));
                }
            };
            let constructed = catch_unwind(AssertUnwindSafe(|| {
                constructor(driver, &config.connect_string, &properties)
            }));
            // The constructor copies what it keeps
            scrub_properties(&mut properties);

            return match constructed {
                Ok(Ok(factory)) => {
                    tracing::debug!(factory = %type_name, "Created custom connection factory");
                    Ok(factory)
                }
                Ok(Err(e)) => Err(wrap(e)),
                Err(panic) => Err(wrap(Box::new(ConstructorPanicked(panic_message(panic.as_ref()))))),
            };
        }

        Ok(Arc::new(DriverConnectionFactory::new(
            driver,
            config.connect_string.clone(),
            properties,
        )))
    }

    /// Resolve the driver through `drivers`, then [`build`](Self::build).
    ///
    /// An explicit `driver` name in the configuration wins; otherwise the first
    /// registered driver accepting the connect string is used.
    pub fn build_with_drivers(
        &self,
        config: &DataSourceConfig,
        drivers: &DriverRegistry,
    ) -> Result<Arc<dyn ConnectionFactory>, FactoryConstructionError> {
        let driver = Self::resolve_driver(config, drivers)?;
        self.build(config, driver)
    }

    pub fn resolve_driver(
        config: &DataSourceConfig,
        drivers: &DriverRegistry,
    ) -> Result<Arc<dyn Driver>, FactoryConstructionError> {
        let resolved = match &config.driver {
            Some(name) => drivers.get_driver(name).and_then(|driver| {
                if driver.accepts_url(&config.connect_string) {
                    Ok(driver)
                } else {
                    Err(crate::db::registry::RegistryError::NoSuitableDriver(
                        redact_connect_string(&config.connect_string),
                    ))
                }
            }),
            None => drivers.driver_for_url(&config.connect_string),
        };

        resolved.map_err(|e| FactoryConstructionError::Driver {
            connect_string: redact_connect_string(&config.connect_string),
            source: e.into(),
        })
    }
}

impl Default for ConnectionFactoryBuilder {
    fn default() -> Self {
        Self::new(Arc::new(FactoryRegistry::new()))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
