//! Wiring of registry, provisioner, issuer and gateway over a pair of stores

use crate::events::Events;
use crate::gateway::{GatewayConfig, TokenGateway};
use crate::issuer::PermissionIssuer;
use crate::provisioning::{ProvisioningConfig, ResourceProvisioner, ResourceRegistry};
use crate::storage::{DocumentStore, SecretStore};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermgateConfig {
    pub gateway: GatewayConfig,
    pub provisioning: ProvisioningConfig,
}

/// One process's permission service
///
/// Everything shares one registry, so resources confirmed through any path
/// are known to all of them.
#[derive(Clone)]
pub struct Permgate {
    registry: Arc<ResourceRegistry>,
    provisioner: Arc<ResourceProvisioner>,
    issuer: Arc<PermissionIssuer>,
    gateway: Arc<TokenGateway>,
    events: Events,
}

impl Permgate {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        secrets: Arc<dyn SecretStore>,
        config: PermgateConfig,
        events: Events,
    ) -> Self {
        let registry = Arc::new(ResourceRegistry::new());
        let provisioner = Arc::new(ResourceProvisioner::new(
            documents.clone(),
            registry.clone(),
            config.provisioning,
            events.clone(),
        ));
        let issuer = Arc::new(PermissionIssuer::new(
            documents,
            provisioner.clone(),
            events.clone(),
        ));
        let gateway = Arc::new(TokenGateway::new(
            secrets,
            issuer.clone(),
            config.gateway,
            events.clone(),
        ));

        Self {
            registry,
            provisioner,
            issuer,
            gateway,
            events,
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn provisioner(&self) -> &Arc<ResourceProvisioner> {
        &self.provisioner
    }

    pub fn issuer(&self) -> &Arc<PermissionIssuer> {
        &self.issuer
    }

    pub fn gateway(&self) -> &Arc<TokenGateway> {
        &self.gateway
    }

    pub fn events(&self) -> &Events {
        &self.events
    }
}
