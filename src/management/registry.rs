// Management Registry
// Publishes monitored resources under object names and exposes them for introspection

use crate::management::name::{MalformedObjectName, ObjectName};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Environment variable that turns the process-wide registry off
pub const MANAGEMENT_ENV: &str = "DBCONNECT_MANAGEMENT";

/// Operations a monitoring client may invoke on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedOperation {
    ClearCachedState,
    ClearWarnings,
    Close,
    ForceClose,
}

impl ManagedOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagedOperation::ClearCachedState => "clear_cached_state",
            ManagedOperation::ClearWarnings => "clear_warnings",
            ManagedOperation::Close => "close",
            ManagedOperation::ForceClose => "force_close",
        }
    }
}

impl fmt::Display for ManagedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned to monitoring clients
#[derive(Error, Debug)]
pub enum ManagementError {
    #[error("No resource registered under {0}")]
    NotFound(String),

    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("Attribute is read-only: {0}")]
    ReadOnlyAttribute(String),

    #[error("Invalid value for attribute {attribute}: {reason}")]
    InvalidValue { attribute: String, reason: String },

    #[error("Operation not supported: {0}")]
    UnsupportedOperation(ManagedOperation),

    #[error(transparent)]
    Malformed(#[from] MalformedObjectName),
}

/// A resource that can be inspected and operated on at runtime
pub trait ManagedResource: Send + Sync {
    /// Names of the attributes reported by [`attributes`](Self::attributes)
    fn attribute_names(&self) -> Vec<&'static str>;

    /// Snapshot of the current attribute values
    fn attributes(&self) -> Map<String, Value>;

    fn set_attribute(&self, name: &str, _value: Value) -> Result<(), ManagementError> {
        if self.attribute_names().contains(&name) {
            Err(ManagementError::ReadOnlyAttribute(name.to_string()))
        } else {
            Err(ManagementError::UnknownAttribute(name.to_string()))
        }
    }

    fn invoke(&self, operation: ManagedOperation) -> Result<(), ManagementError> {
        Err(ManagementError::UnsupportedOperation(operation))
    }
}

/// Registration failures. These are only ever logged by [`ManagementHandle`](crate::management::ManagementHandle).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("A resource is already registered under {0}")]
    AlreadyRegistered(String),

    #[error("No resource is registered under {0}")]
    NotRegistered(String),

    #[error("Management registry is unavailable")]
    Unavailable,

    #[error("Registration rejected: {0}")]
    Rejected(String),
}

/// A place resources are published for monitoring
pub trait ManagementRegistry: Send + Sync {
    fn register(&self, name: &ObjectName, resource: Arc<dyn ManagedResource>) -> Result<(), RegistrationError>;

    fn unregister(&self, name: &ObjectName) -> Result<(), RegistrationError>;

    fn is_registered(&self, name: &ObjectName) -> bool;

    /// Whether registrations are actually recorded
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Registry used when no monitoring facility is available. Accepts and forgets everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistry;

impl ManagementRegistry for NoopRegistry {
    fn register(&self, _name: &ObjectName, _resource: Arc<dyn ManagedResource>) -> Result<(), RegistrationError> {
        Ok(())
    }

    fn unregister(&self, _name: &ObjectName) -> Result<(), RegistrationError> {
        Ok(())
    }

    fn is_registered(&self, _name: &ObjectName) -> bool {
        false
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

struct Entry {
    name: ObjectName,
    resource: Arc<dyn ManagedResource>,
}

/// In-process registry keyed by canonical object name
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered names, sorted by canonical form
    pub fn names(&self) -> Vec<ObjectName> {
        let entries = self.entries.read();
        let mut names: Vec<ObjectName> = entries.values().map(|e| e.name.clone()).collect();
        names.sort_by_key(|n| n.canonical());
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn attributes(&self, name: &str) -> Result<Map<String, Value>, ManagementError> {
        Ok(self.lookup(name)?.attributes())
    }

    pub fn set_attribute(&self, name: &str, attribute: &str, value: Value) -> Result<(), ManagementError> {
        self.lookup(name)?.set_attribute(attribute, value)
    }

    pub fn invoke(&self, name: &str, operation: ManagedOperation) -> Result<(), ManagementError> {
        let resource = self.lookup(name)?;
        tracing::debug!(name = %name, operation = %operation, "Invoking management operation");
        resource.invoke(operation)
    }

    // Clone the resource out so the lock is released before calling into it
    fn lookup(&self, name: &str) -> Result<Arc<dyn ManagedResource>, ManagementError> {
        let name = ObjectName::parse(name)?;
        let resource = self
            .entries
            .read()
            .get(&name.canonical())
            .map(|e| Arc::clone(&e.resource));
        resource.ok_or_else(|| ManagementError::NotFound(name.to_string()))
    }
}

impl ManagementRegistry for InMemoryRegistry {
    fn register(&self, name: &ObjectName, resource: Arc<dyn ManagedResource>) -> Result<(), RegistrationError> {
        let key = name.canonical();
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(RegistrationError::AlreadyRegistered(name.to_string()));
        }
        entries.insert(
            key,
            Entry {
                name: name.clone(),
                resource,
            },
        );
        tracing::debug!(name = %name, "Registered managed resource");
        Ok(())
    }

    fn unregister(&self, name: &ObjectName) -> Result<(), RegistrationError> {
        // Drop the entry outside the lock; a resource may unregister itself on drop
        let removed = self.entries.write().remove(&name.canonical());
        match removed {
            Some(_) => {
                tracing::debug!(name = %name, "Unregistered managed resource");
                Ok(())
            }
            None => Err(RegistrationError::NotRegistered(name.to_string())),
        }
    }

    fn is_registered(&self, name: &ObjectName) -> bool {
        self.entries.read().contains_key(&name.canonical())
    }
}

static PLATFORM: Lazy<Option<Arc<InMemoryRegistry>>> = Lazy::new(|| {
    let setting = std::env::var(MANAGEMENT_ENV).ok();
    if management_enabled(setting.as_deref()) {
        Some(Arc::new(InMemoryRegistry::new()))
    } else {
        tracing::info!("Management registry disabled by {}", MANAGEMENT_ENV);
        None
    }
});

/// Interpret the value of the management environment variable
pub fn management_enabled(setting: Option<&str>) -> bool {
    !matches!(
        setting.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("off" | "disabled" | "false" | "0")
    )
}

/// The process-wide registry, discovered on first use
pub fn platform_registry() -> Arc<dyn ManagementRegistry> {
    let platform: &Option<Arc<InMemoryRegistry>> = &PLATFORM;
    match platform {
        Some(registry) => Arc::clone(registry) as Arc<dyn ManagementRegistry>,
        None => Arc::new(NoopRegistry),
    }
}

/// Introspection access to the process-wide registry, when it is enabled
pub fn platform_inspector() -> Option<Arc<InMemoryRegistry>> {
    let platform: &Option<Arc<InMemoryRegistry>> = &PLATFORM;
    platform.as_ref().map(Arc::clone)
}
