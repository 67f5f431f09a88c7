// Database Drivers
// Contains implementations for each supported database type

pub mod mssql;
pub mod postgres;
pub mod sqlite;

// Re-export drivers
pub use mssql::MssqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;
