// Database Module
// Connection factories, drivers and the pool seam they plug into

pub mod builder;
pub mod connection;
pub mod credentials;
pub mod drivers;
pub mod factory;
pub mod pool;
pub mod registry;
pub mod traits;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::{ConnectionFactoryBuilder, ConstructorPanicked, FactoryConstructionError};
pub use connection::ConnectionError;
pub use credentials::{merge_credentials, Password, PASSWORD_KEY, USER_KEY};
pub use drivers::{MssqlDriver, PostgresDriver, SqliteDriver};
pub use factory::{DriverConnectionFactory, DriverConnectionProvider, ProviderConnectionFactory};
pub use pool::{
    close_connections, ConnectionMonitor, DataSource, DataSourceFailure, DataSourceSet,
    FactoryConnectionManager, PoolError, PoolStatistics, PooledConnection,
};
pub use registry::{DriverRegistry, FactoryConstructor, FactoryRegistry, RegistryError};
pub use traits::{Connection, ConnectionFactory, ConnectionProvider, Driver, Properties};
