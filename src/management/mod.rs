// Management Module
// Runtime monitoring: object names, registries and the handle resources register through

pub mod handle;
pub mod name;
pub mod registry;

pub use handle::ManagementHandle;
pub use name::{MalformedObjectName, ObjectName};
pub use registry::{
    platform_inspector, platform_registry, InMemoryRegistry, ManagedOperation, ManagedResource,
    ManagementError, ManagementRegistry, NoopRegistry, RegistrationError,
};
