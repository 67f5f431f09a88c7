// dbconnect
// Connection factories, credential handling and management registration for database pools

// Module declarations
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod management;

pub use config::{ConfigError, DataSourceConfig, PoolSettings};
pub use db::{
    ConnectionFactory, ConnectionFactoryBuilder, DataSource, DataSourceSet, DriverRegistry,
    FactoryConstructionError, FactoryRegistry, Password, PoolError,
};
pub use error::{check_lifetime, AggregatedFailure, BoxError, LifetimeExceeded};
pub use logging::init_logging;
pub use management::{ManagementHandle, ObjectName};
