//! Provider entry point.
//!
//! [`MaasProvider`] is built once from the provider settings and then
//! dispatches resource operations by resource type name. Declared
//! configuration and resulting state travel as JSON attribute bags.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::config::{from_attributes, DeploymentConfig, MachineConfig};
use crate::error::{Outcome, ProviderError};
use crate::gateway::{Gateway, GatewayError};
use crate::resources::{DeploymentResource, MachineResource, Resource};
use crate::settings::{Endpoint, ProviderConfig};

/// Builds a gateway for one endpoint and credential.
pub trait GatewayConnector: Send + Sync {
    /// Open a gateway to `endpoint`.
    ///
    /// # Errors
    /// Returns an error if the endpoint cannot be reached or the key is rejected.
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Gateway>, GatewayError>;
}

/// Resource types served by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Machine,
    Deployment,
}

impl ResourceKind {
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Machine => "maas_machine",
            Self::Deployment => "maas_deployment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for ResourceKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maas_machine" => Ok(Self::Machine),
            "maas_deployment" => Ok(Self::Deployment),
            other => Err(ProviderError::Config(format!(
                "unknown resource type '{other}'"
            ))),
        }
    }
}

/// A configured provider with one gateway per credential.
pub struct MaasProvider {
    machines: MachineResource,
    deployments: DeploymentResource,
}

impl MaasProvider {
    /// Validate `config` and open the default gateway plus one per deploy-token owner.
    ///
    /// # Errors
    /// Returns an error if the settings are invalid or a gateway cannot be opened.
    pub fn configure(
        config: &ProviderConfig,
        connector: &dyn GatewayConnector,
    ) -> Result<Self, ProviderError> {
        config.validate()?;

        let endpoint = config.endpoint()?;
        let gateway = connector
            .connect(&endpoint)
            .map_err(|e| ProviderError::gateway(format!("connect to {}", endpoint.url), e))?;

        let mut owners = BTreeMap::new();
        for (owner, endpoint) in config.owner_endpoints()? {
            let owner_gateway = connector.connect(&endpoint).map_err(|e| {
                ProviderError::gateway(format!("connect to {} as '{owner}'", endpoint.url), e)
            })?;
            owners.insert(owner, owner_gateway);
        }

        info!(
            url = %endpoint.url,
            api_version = %endpoint.api_version,
            owners = owners.len(),
            "Configured MAAS provider"
        );

        Ok(Self {
            machines: MachineResource::new(Arc::clone(&gateway), config.timeouts),
            deployments: DeploymentResource::new(gateway, owners, config.timeouts),
        })
    }

    #[must_use]
    pub fn machines(&self) -> &MachineResource {
        &self.machines
    }

    #[must_use]
    pub fn deployments(&self) -> &DeploymentResource {
        &self.deployments
    }

    /// Create a resource from its declared attributes.
    ///
    /// # Errors
    /// Returns an error if the attributes are invalid or the operation fails.
    #[instrument(skip(self, declared), fields(resource = %kind))]
    pub async fn create(
        &self,
        kind: ResourceKind,
        declared: Value,
    ) -> Result<Outcome<Value>, ProviderError> {
        match kind {
            ResourceKind::Machine => {
                let declared: MachineConfig = from_attributes(declared)?;
                to_attributes(self.machines.create(&declared).await?)
            }
            ResourceKind::Deployment => {
                let declared: DeploymentConfig = from_attributes(declared)?;
                to_attributes(self.deployments.create(&declared).await?)
            }
        }
    }

    /// Read the state of resource `id`.
    ///
    /// # Errors
    /// Returns an error if the attributes are invalid or the machine cannot be read.
    #[instrument(skip(self, declared), fields(resource = %kind))]
    pub async fn read(
        &self,
        kind: ResourceKind,
        id: &str,
        declared: Value,
    ) -> Result<Value, ProviderError> {
        let state = match kind {
            ResourceKind::Machine => {
                let declared: MachineConfig = from_attributes(declared)?;
                self.machines.read(id, &declared).await?
            }
            ResourceKind::Deployment => {
                let declared: DeploymentConfig = from_attributes(declared)?;
                self.deployments.read(id, &declared).await?
            }
        };
        serialize(&state)
    }

    /// Update resource `id` from `prior` to `declared` attributes.
    ///
    /// # Errors
    /// Returns an error if the attributes are invalid or the operation fails.
    #[instrument(skip(self, prior, declared), fields(resource = %kind))]
    pub async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        prior: Value,
        declared: Value,
    ) -> Result<Outcome<Value>, ProviderError> {
        match kind {
            ResourceKind::Machine => {
                let prior: MachineConfig = from_attributes(prior)?;
                let declared: MachineConfig = from_attributes(declared)?;
                to_attributes(self.machines.update(id, &prior, &declared).await?)
            }
            ResourceKind::Deployment => {
                let prior: DeploymentConfig = from_attributes(prior)?;
                let declared: DeploymentConfig = from_attributes(declared)?;
                to_attributes(self.deployments.update(id, &prior, &declared).await?)
            }
        }
    }

    /// Delete resource `id`.
    ///
    /// # Errors
    /// Returns an error if the attributes are invalid or the operation fails.
    #[instrument(skip(self, declared), fields(resource = %kind))]
    pub async fn delete(
        &self,
        kind: ResourceKind,
        id: &str,
        declared: Value,
    ) -> Result<Outcome<()>, ProviderError> {
        match kind {
            ResourceKind::Machine => {
                let declared: MachineConfig = from_attributes(declared)?;
                self.machines.delete(id, &declared).await
            }
            ResourceKind::Deployment => {
                let declared: DeploymentConfig = from_attributes(declared)?;
                self.deployments.delete(id, &declared).await
            }
        }
    }
}

fn serialize<T: Serialize>(value: &T) -> Result<Value, ProviderError> {
    serde_json::to_value(value)
        .map_err(|e| ProviderError::Config(format!("failed to serialize state: {e}")))
}

fn to_attributes<T: Serialize>(outcome: Outcome<T>) -> Result<Outcome<Value>, ProviderError> {
    Ok(Outcome::new(serialize(&outcome.value)?, outcome.warnings))
}
