// Management Handle
// Optional registration of a resource under an object name; never fails its owner

use crate::management::name::{MalformedObjectName, ObjectName};
use crate::management::registry::{platform_registry, ManagedResource, ManagementRegistry, NoopRegistry};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Registry plus an optional name.
///
/// With no name, or on top of the no-op registry, every operation does
/// nothing. Registration problems are logged and swallowed so that the
/// owning resource keeps working without monitoring.
#[derive(Clone)]
pub struct ManagementHandle {
    registry: Arc<dyn ManagementRegistry>,
    name: Option<ObjectName>,
}

impl ManagementHandle {
    /// Handle on the process-wide registry. A missing name gives an empty handle.
    pub fn wrap(name: Option<&str>) -> Result<Self, MalformedObjectName> {
        Self::with_registry(platform_registry(), name)
    }

    pub fn with_registry(
        registry: Arc<dyn ManagementRegistry>,
        name: Option<&str>,
    ) -> Result<Self, MalformedObjectName> {
        let name = name.map(ObjectName::parse).transpose()?;
        Ok(Self { registry, name })
    }

    /// Empty handle; all operations are no-ops
    pub fn disabled() -> Self {
        Self {
            registry: Arc::new(NoopRegistry),
            name: None,
        }
    }

    pub fn name(&self) -> Option<&ObjectName> {
        self.name.as_ref()
    }

    pub fn registry(&self) -> &Arc<dyn ManagementRegistry> {
        &self.registry
    }

    pub fn is_enabled(&self) -> bool {
        self.name.is_some() && self.registry.is_enabled()
    }

    /// Handle for a dependent object, named by appending `key=value` to this name.
    /// An empty handle stays empty.
    pub fn child(&self, key: &str, value: &str) -> Result<Self, MalformedObjectName> {
        let name = match &self.name {
            Some(name) => Some(name.with_property(key, value)?),
            None => None,
        };
        Ok(Self {
            registry: Arc::clone(&self.registry),
            name,
        })
    }

    pub fn register(&self, resource: Arc<dyn ManagedResource>) {
        let Some(name) = &self.name else {
            return;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| self.registry.register(name, resource)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(name = %name, error = %e, "Failed to register managed resource");
            }
            Err(_) => {
                tracing::warn!(name = %name, "Management registry panicked during registration");
            }
        }
    }

    /// Remove the registration if one is present. Safe to call repeatedly.
    pub fn unregister(&self) {
        let Some(name) = &self.name else {
            return;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if self.registry.is_registered(name) {
                self.registry.unregister(name)
            } else {
                Ok(())
            }
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(name = %name, error = %e, "Failed to unregister managed resource");
            }
            Err(_) => {
                tracing::warn!(name = %name, "Management registry panicked during unregistration");
            }
        }
    }
}

impl Default for ManagementHandle {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for ManagementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagementHandle")
            .field("name", &self.name.as_ref().map(ToString::to_string))
            .field("enabled", &self.registry.is_enabled())
            .finish()
    }
}
