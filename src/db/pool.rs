// Connection Pool Integration
// bb8 adapter over a ConnectionFactory and pooled data sources published for monitoring

use crate::config::{ConfigError, DataSourceConfig, PoolSettings};
use crate::db::builder::{ConnectionFactoryBuilder, FactoryConstructionError};
use crate::db::connection::ConnectionError;
use crate::db::credentials::redact_connect_string;
use crate::db::registry::DriverRegistry;
use crate::db::traits::{Connection, ConnectionFactory};
use crate::error::{check_lifetime, AggregatedFailure, BoxError, LifetimeExceeded};
use crate::management::{
    MalformedObjectName, ManagedOperation, ManagedResource, ManagementError, ManagementHandle,
};
use bb8::{Pool, RunError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised at the pool seam
#[derive(Error, Debug)]
pub enum PoolError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    LifetimeExceeded(#[from] LifetimeExceeded),

    #[error(transparent)]
    Construction(#[from] FactoryConstructionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Management(#[from] MalformedObjectName),

    #[error("Timed out waiting for a pooled connection")]
    Timeout,

    #[error("Data source is closed")]
    Closed,

    #[error("Data source closed with {0} connection(s) still checked out")]
    ActiveConnections(u32),
}

impl From<RunError<PoolError>> for PoolError {
    fn from(err: RunError<PoolError>) -> Self {
        match err {
            RunError::User(e) => e,
            RunError::TimedOut => PoolError::Timeout,
        }
    }
}

/// Counters shared between a data source and its connection manager
#[derive(Debug)]
pub struct PoolStatistics {
    created: AtomicU64,
    expired: AtomicU64,
    validation_failures: AtomicU64,
    log_expired: AtomicBool,
    last_warning: Mutex<Option<String>>,
}

impl PoolStatistics {
    pub fn new(log_expired: bool) -> Self {
        Self {
            created: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            log_expired: AtomicBool::new(log_expired),
            last_warning: Mutex::new(None),
        }
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    pub fn validation_failures(&self) -> u64 {
        self.validation_failures.load(Ordering::Relaxed)
    }

    pub fn log_expired(&self) -> bool {
        self.log_expired.load(Ordering::Relaxed)
    }

    pub fn set_log_expired(&self, enabled: bool) {
        self.log_expired.store(enabled, Ordering::Relaxed);
    }

    pub fn last_warning(&self) -> Option<String> {
        self.last_warning.lock().clone()
    }

    pub fn clear_warnings(&self) {
        *self.last_warning.lock() = None;
    }

    fn record_warning(&self, warning: String) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_warning.lock() = Some(warning);
    }
}

impl Default for PoolStatistics {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Monitoring view of one physical connection
#[derive(Debug)]
pub struct ConnectionMonitor {
    id: u64,
    connection_id: String,
    created_at: Instant,
    opened_at: DateTime<Utc>,
    force_closed: AtomicBool,
    close_requested: AtomicBool,
    expired: AtomicBool,
    last_validated: Mutex<Option<DateTime<Utc>>>,
    last_warning: Mutex<Option<String>>,
}

impl ConnectionMonitor {
    fn new(id: u64, connection_id: &str) -> Self {
        Self {
            id,
            connection_id: connection_id.to_string(),
            created_at: Instant::now(),
            opened_at: Utc::now(),
            force_closed: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
            expired: AtomicBool::new(false),
            last_validated: Mutex::new(None),
            last_warning: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn is_force_closed(&self) -> bool {
        self.force_closed.load(Ordering::SeqCst)
    }

    /// Mark the connection so the pool discards it instead of reusing it
    pub fn force_close(&self) {
        self.force_closed.store(true, Ordering::SeqCst);
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }

    /// Ask the pool to close the connection once it is next checked in or out
    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
    }

    /// Force-closed or close requested
    pub fn is_discarded(&self) -> bool {
        self.is_force_closed() || self.is_close_requested()
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    // True only the first time the connection is seen past its lifetime
    fn mark_expired(&self) -> bool {
        !self.expired.swap(true, Ordering::SeqCst)
    }

    pub fn last_validated(&self) -> Option<DateTime<Utc>> {
        *self.last_validated.lock()
    }

    fn record_validated(&self) {
        *self.last_validated.lock() = Some(Utc::now());
    }

    pub fn last_warning(&self) -> Option<String> {
        self.last_warning.lock().clone()
    }

    fn record_warning(&self, warning: String) {
        *self.last_warning.lock() = Some(warning);
    }

    pub fn clear_warnings(&self) {
        *self.last_warning.lock() = None;
    }

    /// Forget the cached validation result so the next check starts fresh
    pub fn clear_cached_state(&self) {
        *self.last_validated.lock() = None;
    }
}

impl ManagedResource for ConnectionMonitor {
    fn attribute_names(&self) -> Vec<&'static str> {
        vec![
            "id",
            "connection_id",
            "opened_at",
            "age_ms",
            "force_closed",
            "close_requested",
            "expired",
            "last_validated",
            "last_warning",
        ]
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("id".to_string(), json!(self.id));
        map.insert("connection_id".to_string(), json!(self.connection_id));
        map.insert("opened_at".to_string(), json!(self.opened_at.to_rfc3339()));
        map.insert("age_ms".to_string(), json!(self.age().as_millis() as u64));
        map.insert("force_closed".to_string(), json!(self.is_force_closed()));
        map.insert("close_requested".to_string(), json!(self.is_close_requested()));
        map.insert("expired".to_string(), json!(self.is_expired()));
        map.insert(
            "last_validated".to_string(),
            json!(self.last_validated().map(|t| t.to_rfc3339())),
        );
        map.insert("last_warning".to_string(), json!(self.last_warning()));
        map
    }

    fn invoke(&self, operation: ManagedOperation) -> Result<(), ManagementError> {
        match operation {
            ManagedOperation::ClearCachedState => self.clear_cached_state(),
            ManagedOperation::ClearWarnings => self.clear_warnings(),
            ManagedOperation::Close => self.request_close(),
            ManagedOperation::ForceClose => self.force_close(),
        }
        Ok(())
    }
}

/// A physical connection as held by the pool.
///
/// Registered under a child management name while it exists; dropping it
/// removes the registration.
pub struct PooledConnection {
    connection: Box<dyn Connection>,
    monitor: Arc<ConnectionMonitor>,
    handle: ManagementHandle,
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.monitor.id
    }

    pub fn created_at(&self) -> Instant {
        self.monitor.created_at
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    pub fn management(&self) -> &ManagementHandle {
        &self.handle
    }

    pub fn is_force_closed(&self) -> bool {
        self.monitor.is_force_closed()
    }

    /// Whether the pool will drop this connection instead of reusing it
    pub fn is_discarded(&self) -> bool {
        self.monitor.is_discarded()
    }

    pub fn force_close(&self) {
        self.monitor.force_close();
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.handle.unregister();
    }
}

/// bb8 connection manager creating physical connections through a [`ConnectionFactory`]
pub struct FactoryConnectionManager {
    factory: Arc<dyn ConnectionFactory>,
    max_lifetime: Option<Duration>,
    test_on_check_out: bool,
    handle: ManagementHandle,
    stats: Arc<PoolStatistics>,
    next_id: AtomicU64,
}

impl FactoryConnectionManager {
    pub fn new(factory: Arc<dyn ConnectionFactory>, max_lifetime: Option<Duration>) -> Self {
        Self {
            factory,
            max_lifetime,
            test_on_check_out: true,
            handle: ManagementHandle::disabled(),
            stats: Arc::new(PoolStatistics::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register each connection under a child of `handle`
    pub fn with_management(mut self, handle: ManagementHandle) -> Self {
        self.handle = handle;
        self
    }

    /// Probe liveness on checkout. The lifetime check runs on every checkout regardless.
    pub fn with_test_on_check_out(mut self, enabled: bool) -> Self {
        self.test_on_check_out = enabled;
        self
    }

    pub fn with_statistics(mut self, stats: Arc<PoolStatistics>) -> Self {
        self.stats = stats;
        self
    }

    pub fn statistics(&self) -> &Arc<PoolStatistics> {
        &self.stats
    }

    fn connection_handle(&self, id: u64) -> ManagementHandle {
        match self
            .handle
            .child("connectionpool", "connections")
            .and_then(|h| h.child("connection", &id.to_string()))
        {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "Connection will not be registered for monitoring");
                ManagementHandle::disabled()
            }
        }
    }

    fn record_expired(&self, conn: &PooledConnection, err: &LifetimeExceeded) {
        if !conn.monitor.mark_expired() {
            return;
        }
        self.stats.expired.fetch_add(1, Ordering::Relaxed);
        if self.stats.log_expired() {
            tracing::info!(connection = conn.id(), "{}", err);
        }
    }
}

#[async_trait::async_trait]
impl bb8::ManageConnection for FactoryConnectionManager {
    type Connection = PooledConnection;
    type Error = PoolError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let connection = self.factory.create_connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let monitor = Arc::new(ConnectionMonitor::new(id, connection.connection_id()));

        let handle = self.connection_handle(id);
        handle.register(Arc::clone(&monitor) as Arc<dyn ManagedResource>);
        self.stats.created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection = id, connection_id = %connection.connection_id(), "Opened pooled connection");

        Ok(PooledConnection {
            connection,
            monitor,
            handle,
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        if conn.is_discarded() {
            return Err(ConnectionError::Closed.into());
        }
        if let Err(e) = check_lifetime(conn.created_at(), self.max_lifetime) {
            self.record_expired(conn, &e);
            return Err(e.into());
        }
        if !self.test_on_check_out {
            return Ok(());
        }
        if !conn.is_alive().await {
            let message = format!("Connection {} failed validation", conn.id());
            tracing::warn!(connection = conn.id(), "{}", message);
            conn.monitor.record_warning(message.clone());
            self.stats.record_warning(message.clone());
            return Err(ConnectionError::ConnectionFailed(message).into());
        }
        conn.monitor.record_validated();
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        if conn.is_discarded() {
            return true;
        }
        match check_lifetime(conn.created_at(), self.max_lifetime) {
            Ok(()) => false,
            Err(e) => {
                self.record_expired(conn, &e);
                true
            }
        }
    }
}

pub type ConnectionPool = Pool<FactoryConnectionManager>;

/// A checked-out connection; returned to the pool on drop
pub type PoolConnection = bb8::PooledConnection<'static, FactoryConnectionManager>;

struct DataSourceState {
    connect_string: String,
    redacted_connect_string: String,
    username: Option<String>,
    settings: PoolSettings,
    factory: Arc<dyn ConnectionFactory>,
    pool: RwLock<Option<ConnectionPool>>,
    stats: Arc<PoolStatistics>,
    handle: ManagementHandle,
    closed: AtomicBool,
}

impl DataSourceState {
    fn close(&self) -> Result<(), PoolError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let pool = self.pool.write().take();
        self.handle.unregister();

        let active = pool
            .map(|p| {
                let state = p.state();
                state.connections.saturating_sub(state.idle_connections)
            })
            .unwrap_or(0);
        tracing::info!(connect_string = %self.redacted_connect_string, "Data source closed");

        if active > 0 {
            return Err(PoolError::ActiveConnections(active));
        }
        Ok(())
    }
}

impl ManagedResource for DataSourceState {
    fn attribute_names(&self) -> Vec<&'static str> {
        vec![
            "connect_string",
            "username",
            "max_size",
            "min_idle",
            "max_lifetime_ms",
            "connection_timeout_ms",
            "test_on_check_out",
            "log_expired_connections",
            "connections",
            "idle_connections",
            "created_connections",
            "expired_connections",
            "validation_failures",
            "last_warning",
            "closed",
        ]
    }

    fn attributes(&self) -> Map<String, Value> {
        let (connections, idle) = match self.pool.read().as_ref() {
            Some(pool) => {
                let state = pool.state();
                (state.connections, state.idle_connections)
            }
            None => (0, 0),
        };

        let mut map = Map::new();
        map.insert("connect_string".to_string(), json!(self.redacted_connect_string));
        map.insert("username".to_string(), json!(self.username));
        map.insert("max_size".to_string(), json!(self.settings.max_size));
        map.insert("min_idle".to_string(), json!(self.settings.min_idle));
        map.insert("max_lifetime_ms".to_string(), json!(self.settings.max_lifetime_ms));
        map.insert(
            "connection_timeout_ms".to_string(),
            json!(self.settings.connection_timeout_ms),
        );
        map.insert("test_on_check_out".to_string(), json!(self.settings.test_on_check_out));
        map.insert("log_expired_connections".to_string(), json!(self.stats.log_expired()));
        map.insert("connections".to_string(), json!(connections));
        map.insert("idle_connections".to_string(), json!(idle));
        map.insert("created_connections".to_string(), json!(self.stats.created()));
        map.insert("expired_connections".to_string(), json!(self.stats.expired()));
        map.insert("validation_failures".to_string(), json!(self.stats.validation_failures()));
        map.insert("last_warning".to_string(), json!(self.stats.last_warning()));
        map.insert("closed".to_string(), json!(self.closed.load(Ordering::SeqCst)));
        map
    }

    fn set_attribute(&self, name: &str, value: Value) -> Result<(), ManagementError> {
        match name {
            "log_expired_connections" => {
                let enabled = value.as_bool().ok_or_else(|| ManagementError::InvalidValue {
                    attribute: name.to_string(),
                    reason: format!("expected a boolean, got {}", value),
                })?;
                self.stats.set_log_expired(enabled);
                Ok(())
            }
            other if self.attribute_names().contains(&other) => {
                Err(ManagementError::ReadOnlyAttribute(other.to_string()))
            }
            other => Err(ManagementError::UnknownAttribute(other.to_string())),
        }
    }

    fn invoke(&self, operation: ManagedOperation) -> Result<(), ManagementError> {
        match operation {
            ManagedOperation::Close => {
                if let Err(e) = self.close() {
                    tracing::warn!(error = %e, "Data source closed through management");
                }
                Ok(())
            }
            ManagedOperation::ClearWarnings => {
                self.stats.clear_warnings();
                Ok(())
            }
            other => Err(ManagementError::UnsupportedOperation(other)),
        }
    }
}

/// A connection factory with a bb8 pool around it, published under its management name
pub struct DataSource {
    state: Arc<DataSourceState>,
}

impl DataSource {
    /// Build the factory described by `config`, open the pool and register for monitoring
    pub async fn open(
        config: &DataSourceConfig,
        builder: &ConnectionFactoryBuilder,
        drivers: &DriverRegistry,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let handle = ManagementHandle::wrap(config.management_name.as_deref())?;
        let factory = builder.build_with_drivers(config, drivers)?;
        Self::with_factory(config, factory, handle).await
    }

    /// Open the pool around an already built factory
    pub async fn with_factory(
        config: &DataSourceConfig,
        factory: Arc<dyn ConnectionFactory>,
        handle: ManagementHandle,
    ) -> Result<Self, PoolError> {
        let settings = config.pool.clone();
        settings.validate()?;

        let stats = Arc::new(PoolStatistics::new(settings.log_expired_connections));
        let manager = FactoryConnectionManager::new(Arc::clone(&factory), settings.max_lifetime())
            .with_test_on_check_out(settings.test_on_check_out)
            .with_management(handle.clone())
            .with_statistics(Arc::clone(&stats));

        // Lifetime is enforced by the manager so expiry goes through LifetimeExceeded.
        // bb8 only calls is_valid when checkout testing is on; the manager decides
        // whether that includes a liveness round trip.
        let pool = Pool::builder()
            .max_size(settings.max_size)
            .min_idle(settings.min_idle)
            .max_lifetime(None)
            .connection_timeout(settings.connection_timeout())
            .test_on_check_out(true)
            .build(manager)
            .await?;

        let state = Arc::new(DataSourceState {
            connect_string: config.connect_string.clone(),
            redacted_connect_string: redact_connect_string(&config.connect_string),
            username: config.username.clone(),
            settings,
            factory,
            pool: RwLock::new(Some(pool)),
            stats,
            handle,
            closed: AtomicBool::new(false),
        });
        state
            .handle
            .register(Arc::clone(&state) as Arc<dyn ManagedResource>);

        tracing::info!(
            connect_string = %state.redacted_connect_string,
            max_size = state.settings.max_size,
            "Data source opened"
        );
        Ok(Self { state })
    }

    /// Check out a connection from the pool
    pub async fn get(&self) -> Result<PoolConnection, PoolError> {
        let pool = self.state.pool.read().clone().ok_or(PoolError::Closed)?;
        Ok(pool.get_owned().await?)
    }

    /// Check out a connection and confirm it answers
    pub async fn check_health(&self) -> Result<(), PoolError> {
        let conn = self.get().await?;
        if conn.is_alive().await {
            Ok(())
        } else {
            conn.force_close();
            Err(ConnectionError::ConnectionFailed(format!(
                "Health check failed for {}",
                self.state.redacted_connect_string
            ))
            .into())
        }
    }

    pub fn factory(&self) -> &Arc<dyn ConnectionFactory> {
        &self.state.factory
    }

    pub fn connect_string(&self) -> &str {
        &self.state.connect_string
    }

    pub fn username(&self) -> Option<&str> {
        self.state.username.as_deref()
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.state.settings
    }

    pub fn statistics(&self) -> &Arc<PoolStatistics> {
        &self.state.stats
    }

    pub fn management(&self) -> &ManagementHandle {
        &self.state.handle
    }

    /// Current pool state, or `None` once closed
    pub fn pool_state(&self) -> Option<bb8::State> {
        self.state.pool.read().as_ref().map(|p| p.state())
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Release the pool and unregister. Closing again is a no-op.
    ///
    /// Connections still checked out keep working until returned; their
    /// count is reported as [`PoolError::ActiveConnections`].
    pub fn close(&self) -> Result<(), PoolError> {
        self.state.close()
    }
}

impl ManagedResource for DataSource {
    fn attribute_names(&self) -> Vec<&'static str> {
        self.state.attribute_names()
    }

    fn attributes(&self) -> Map<String, Value> {
        self.state.attributes()
    }

    fn set_attribute(&self, name: &str, value: Value) -> Result<(), ManagementError> {
        self.state.set_attribute(name, value)
    }

    fn invoke(&self, operation: ManagedOperation) -> Result<(), ManagementError> {
        self.state.invoke(operation)
    }
}

impl Drop for DataSource {
    fn drop(&mut self) {
        if let Err(e) = self.state.close() {
            tracing::warn!(error = %e, "Data source dropped while in use");
        }
    }
}

/// Failure of one data source inside a [`DataSourceSet`] operation
#[derive(Error, Debug)]
#[error("Data source '{name}': {source}")]
pub struct DataSourceFailure {
    pub name: String,
    #[source]
    pub source: PoolError,
}

/// Named data sources managed together
#[derive(Default)]
pub struct DataSourceSet {
    sources: Vec<(String, DataSource)>,
}

impl DataSourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a data source, returning the one it replaces
    pub fn insert(&mut self, name: impl Into<String>, source: DataSource) -> Option<DataSource> {
        let name = name.into();
        match self.sources.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, source)),
            None => {
                self.sources.push((name, source));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&DataSource> {
        self.sources.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn remove(&mut self, name: &str) -> Option<DataSource> {
        let idx = self.sources.iter().position(|(n, _)| n == name)?;
        Some(self.sources.remove(idx).1)
    }

    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Close every data source, reporting each one that did not close cleanly
    pub fn close_all(&self) -> Result<(), AggregatedFailure> {
        AggregatedFailure::from_errors(self.sources.iter().filter_map(|(name, source)| {
            source.close().err().map(|err| DataSourceFailure {
                name: name.clone(),
                source: err,
            })
        }))
    }

    /// Health-check every data source concurrently, reporting each failure
    pub async fn check_health(&self) -> Result<(), AggregatedFailure> {
        let checks = self
            .sources
            .iter()
            .map(|(name, source)| async move { (name, source.check_health().await) });
        let results = futures::future::join_all(checks).await;

        AggregatedFailure::from_errors(results.into_iter().filter_map(|(name, result)| {
            result.err().map(|err| DataSourceFailure {
                name: name.clone(),
                source: err,
            })
        }))
    }
}

/// Close each connection in order, reporting every failure
pub async fn close_connections(connections: Vec<Box<dyn Connection>>) -> Result<(), AggregatedFailure> {
    let mut failures: Vec<BoxError> = Vec::new();
    for mut connection in connections {
        if let Err(e) = connection.close().await {
            tracing::warn!(connection_id = %connection.connection_id(), error = %e, "Failed to close connection");
            failures.push(Box::new(e));
        }
    }
    match AggregatedFailure::try_new(failures) {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}
