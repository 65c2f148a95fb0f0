//! Lazy, concurrency-safe provisioning of databases and collections

mod provisioner;
mod registry;

pub use provisioner::{ProvisioningConfig, ProvisioningError, ResourceProvisioner};
pub use registry::{Flight, RegistryStats, ResourceKey, ResourceRegistry, ResourceStatus};
