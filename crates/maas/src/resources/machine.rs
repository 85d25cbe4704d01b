//! Registered machine lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{fetch_machine, release_after_failure, wait_for_status, Resource};
use crate::config::MachineConfig;
use crate::error::{GatewayResultExt, Outcome, ProviderError, Warning};
use crate::gateway::{Gateway, GatewayError, ReleaseArgs};
use crate::model::{Machine, MachineStatus, Presence};
use crate::network::reconcile_interfaces;
use crate::poller::{wait_for_state, StateChangeConf};
use crate::settings::Timeouts;
use crate::state::MachineState;
use crate::storage::reconcile_storage;
use crate::tags::{reconcile_tags, remove_tags};

/// A machine that PXE-booted into MAAS and is configured by MAC address.
pub struct MachineResource {
    gateway: Arc<dyn Gateway>,
    timeouts: Timeouts,
}

impl MachineResource {
    #[must_use]
    pub fn new(gateway: Arc<dyn Gateway>, timeouts: Timeouts) -> Self {
        Self { gateway, timeouts }
    }

    /// Wait until MAAS knows a machine with this boot MAC.
    async fn wait_for_mac(&self, mac_address: &str) -> Result<Machine, ProviderError> {
        let gateway = self.gateway.as_ref();
        let conf = StateChangeConf::new(
            vec![Presence::Missing],
            vec![Presence::Exists],
            self.timeouts.machine_appear,
        );
        let resource = format!("machine with MAC {mac_address}");
        let found = wait_for_state(&resource, &conf, move || async move {
            match gateway.find_machine_by_mac(mac_address).await {
                Ok(machine) => Ok((Some(machine), Presence::Exists)),
                Err(GatewayError::NotFound(_)) => Ok((None, Presence::Missing)),
                Err(e) => Err(ProviderError::gateway(
                    format!("find machine with MAC {mac_address}"),
                    e,
                )),
            }
        })
        .await?;

        found.ok_or_else(|| {
            ProviderError::gateway(
                format!("find machine with MAC {mac_address}"),
                GatewayError::NotFound(mac_address.to_string()),
            )
        })
    }

    /// Commission, tolerating a rejected request when commissioning already started.
    async fn commission(
        &self,
        system_id: &str,
        declared: &MachineConfig,
    ) -> Result<(), ProviderError> {
        let gateway = self.gateway.as_ref();
        let Err(e) = gateway
            .commission_machine(system_id, &declared.commission_args())
            .await
        else {
            info!(system_id, "Commissioning started");
            return Ok(());
        };

        let status = gateway.get_machine(system_id).await.map(|m| m.status);
        if status == Ok(MachineStatus::Commissioning) {
            warn!(
                system_id,
                error = %e,
                "Commission request failed but machine is already commissioning"
            );
            return Ok(());
        }

        let failure = ProviderError::gateway(format!("commission machine '{system_id}'"), e);
        Err(release_after_failure(gateway, system_id, failure).await)
    }

    /// Rebuild the declared network and storage layouts on a fresh view.
    async fn apply_layout(
        &self,
        system_id: &str,
        declared: &MachineConfig,
        network: bool,
        storage: bool,
    ) -> Result<(), ProviderError> {
        let gateway = self.gateway.as_ref();
        if network {
            let (machine, _) = fetch_machine(gateway, system_id).await?;
            reconcile_interfaces(gateway, &machine, &declared.interfaces).await?;
        }
        if storage {
            let (machine, _) = fetch_machine(gateway, system_id).await?;
            reconcile_storage(
                gateway,
                &machine,
                &declared.block_devices,
                &declared.volume_groups,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Resource for MachineResource {
    type Config = MachineConfig;

    async fn create(
        &self,
        declared: &MachineConfig,
    ) -> Result<Outcome<MachineState>, ProviderError> {
        declared.validate()?;
        let gateway = self.gateway.as_ref();

        let machine = self.wait_for_mac(&declared.mac_address).await?;
        let system_id = machine.system_id.as_str();
        info!(system_id, mac = %declared.mac_address, "Found machine");

        let mut warnings = Vec::new();
        if let Err(e) = gateway.update_machine(system_id, &declared.base_update()).await {
            warn!(system_id, error = %e, "Unable to update machine");
            warnings.push(Warning::new("update machine", system_id, e));
        }

        let tags = reconcile_tags(gateway, system_id, &machine.tags, &declared.tags).await;
        warnings.extend(tags.warnings);

        self.commission(system_id, declared).await?;

        let conf = StateChangeConf::new(
            vec![MachineStatus::Commissioning, MachineStatus::Testing],
            vec![MachineStatus::Ready],
            self.timeouts.commission,
        );
        if let Err(e) = wait_for_status(gateway, system_id, &conf).await {
            error!(system_id, error = %e, "Commissioning did not complete");
            return Err(release_after_failure(gateway, system_id, e).await);
        }

        self.apply_layout(
            system_id,
            declared,
            !declared.interfaces.is_empty(),
            declared.declares_storage(),
        )
        .await?;

        let state = self.read(system_id, declared).await?;
        Ok(Outcome::new(state, warnings))
    }

    async fn read(
        &self,
        id: &str,
        _declared: &MachineConfig,
    ) -> Result<MachineState, ProviderError> {
        let (_, state) = fetch_machine(self.gateway.as_ref(), id).await?;
        Ok(state)
    }

    async fn update(
        &self,
        id: &str,
        prior: &MachineConfig,
        declared: &MachineConfig,
    ) -> Result<Outcome<MachineState>, ProviderError> {
        declared.validate()?;
        if prior.mac_address != declared.mac_address {
            return Err(ProviderError::RequiresReplacement {
                fields: vec!["mac_address".to_string()],
            });
        }
        let gateway = self.gateway.as_ref();
        let mut warnings = Vec::new();

        if prior.base_update() != declared.base_update() {
            info!(system_id = id, "Updating machine attributes");
            gateway
                .update_machine(id, &declared.base_update())
                .await
                .during(|| format!("update machine '{id}'"))?;
        }

        let storage = prior.block_devices != declared.block_devices
            || prior.volume_groups != declared.volume_groups;
        let network = prior.interfaces != declared.interfaces;
        self.apply_layout(id, declared, network, storage).await?;

        if prior.tags != declared.tags {
            let machine = gateway
                .get_machine(id)
                .await
                .during(|| format!("get machine '{id}'"))?;
            warnings.extend(
                reconcile_tags(gateway, id, &machine.tags, &declared.tags)
                    .await
                    .warnings,
            );
        }

        let state = self.read(id, declared).await?;
        Ok(Outcome::new(state, warnings))
    }

    async fn delete(
        &self,
        id: &str,
        declared: &MachineConfig,
    ) -> Result<Outcome<()>, ProviderError> {
        let gateway = self.gateway.as_ref();
        let machine = match gateway.get_machine(id).await {
            Ok(machine) => machine,
            Err(GatewayError::NotFound(_)) => {
                info!(system_id = id, "Machine already gone");
                return Ok(Outcome::new((), Vec::new()));
            }
            Err(e) => return Err(ProviderError::gateway(format!("get machine '{id}'"), e)),
        };

        let warnings = remove_tags(gateway, id, &declared.tags).await.warnings;

        if machine.status.is_held() {
            info!(system_id = id, status = %machine.status, "Releasing machine");
            let args = ReleaseArgs {
                system_ids: vec![id.to_string()],
                ..ReleaseArgs::default()
            };
            gateway
                .release_machines(&args)
                .await
                .during(|| format!("release machine '{id}'"))?;

            let conf = StateChangeConf::new(
                vec![
                    MachineStatus::Allocated,
                    MachineStatus::Deploying,
                    MachineStatus::Deployed,
                    MachineStatus::FailedDeployment,
                    MachineStatus::Releasing,
                    MachineStatus::DiskErasing,
                ],
                vec![MachineStatus::Ready],
                self.timeouts.release,
            );
            wait_for_status(gateway, id, &conf).await?;
        }

        info!(system_id = id, "Machine decommissioned");
        Ok(Outcome::new((), warnings))
    }
}
