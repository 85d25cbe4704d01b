//! Deployment lifecycle: allocate, deploy, release.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, error, info};

use super::{fetch_machine, release_after_failure, wait_for_status, Resource};
use crate::config::DeploymentConfig;
use crate::error::{GatewayResultExt, Outcome, ProviderError};
use crate::gateway::{DeployArgs, Gateway, ReleaseArgs};
use crate::model::MachineStatus;
use crate::poller::StateChangeConf;
use crate::settings::Timeouts;
use crate::state::MachineState;
use crate::tags::{reconcile_tags, remove_tags};

/// An allocated machine with an operating system deployed onto it.
///
/// Allocation and deployment go through the gateway of the declared owner.
/// Status waits, reads and release go through the default gateway, which
/// sees every machine.
pub struct DeploymentResource {
    gateway: Arc<dyn Gateway>,
    owners: BTreeMap<String, Arc<dyn Gateway>>,
    timeouts: Timeouts,
}

impl DeploymentResource {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn Gateway>,
        owners: BTreeMap<String, Arc<dyn Gateway>>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            gateway,
            owners,
            timeouts,
        }
    }

    /// Gateway acting as `owner`, or the default one.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] when no token is configured for `owner`.
    pub fn gateway_for(&self, owner: Option<&str>) -> Result<&dyn Gateway, ProviderError> {
        match owner {
            None => Ok(self.gateway.as_ref()),
            Some(owner) => self.owners.get(owner).map(Arc::as_ref).ok_or_else(|| {
                ProviderError::Config(format!("no deploy token configured for owner '{owner}'"))
            }),
        }
    }

    fn deploy_args(declared: &DeploymentConfig) -> DeployArgs {
        DeployArgs {
            user_data: declared.user_data.as_ref().map(|u| STANDARD.encode(u)),
            distro_series: declared.distro_series.clone(),
            hwe_kernel: declared.hwe_kernel.clone(),
            comment: declared.comment.clone(),
        }
    }

    fn release_args(system_id: &str, declared: &DeploymentConfig) -> ReleaseArgs {
        ReleaseArgs {
            system_ids: vec![system_id.to_string()],
            erase: declared.release_erase
                || declared.release_erase_secure
                || declared.release_erase_quick,
            secure_erase: declared.release_erase_secure,
            quick_erase: declared.release_erase_quick,
            comment: None,
        }
    }
}

#[async_trait]
impl Resource for DeploymentResource {
    type Config = DeploymentConfig;

    async fn create(
        &self,
        declared: &DeploymentConfig,
    ) -> Result<Outcome<MachineState>, ProviderError> {
        declared.validate()?;
        let owner = self.gateway_for(declared.owner.as_deref())?;

        let machine = owner
            .allocate_machine(&declared.allocate_args())
            .await
            .during(|| "allocate machine".to_string())?;
        let system_id = machine.system_id.as_str();
        info!(system_id, hostname = %machine.hostname, "Allocated machine");

        let warnings = reconcile_tags(owner, system_id, &machine.tags, &declared.tags)
            .await
            .warnings;

        if let Err(e) = owner.deploy_machine(system_id, &Self::deploy_args(declared)).await {
            error!(system_id, error = %e, "Unable to deploy machine");
            let failure = ProviderError::gateway(format!("deploy machine '{system_id}'"), e);
            return Err(release_after_failure(owner, system_id, failure).await);
        }

        debug!(system_id, "Waiting for deployment");
        let conf = StateChangeConf::new(
            vec![MachineStatus::Deploying],
            vec![MachineStatus::Deployed],
            self.timeouts.deploy,
        );
        if let Err(e) = wait_for_status(self.gateway.as_ref(), system_id, &conf).await {
            error!(system_id, error = %e, "Deployment did not complete");
            return Err(release_after_failure(owner, system_id, e).await);
        }

        let state = self.read(system_id, declared).await?;
        Ok(Outcome::new(state, warnings))
    }

    async fn read(
        &self,
        id: &str,
        declared: &DeploymentConfig,
    ) -> Result<MachineState, ProviderError> {
        let (_, state) = fetch_machine(self.gateway.as_ref(), id).await?;
        Ok(state.with_user_data(declared.user_data.as_deref()))
    }

    async fn update(
        &self,
        id: &str,
        prior: &DeploymentConfig,
        declared: &DeploymentConfig,
    ) -> Result<Outcome<MachineState>, ProviderError> {
        declared.validate()?;
        let fields = declared.replacement_fields(prior);
        if !fields.is_empty() {
            return Err(ProviderError::RequiresReplacement { fields });
        }

        let mut warnings = Vec::new();
        if prior.tags != declared.tags {
            let gateway = self.gateway.as_ref();
            let machine = gateway
                .get_machine(id)
                .await
                .during(|| format!("get machine '{id}'"))?;
            warnings = reconcile_tags(gateway, id, &machine.tags, &declared.tags)
                .await
                .warnings;
        }

        let state = self.read(id, declared).await?;
        Ok(Outcome::new(state, warnings))
    }

    async fn delete(
        &self,
        id: &str,
        declared: &DeploymentConfig,
    ) -> Result<Outcome<()>, ProviderError> {
        let gateway = self.gateway.as_ref();
        let args = Self::release_args(id, declared);
        info!(
            system_id = id,
            erase = args.erase,
            secure_erase = args.secure_erase,
            quick_erase = args.quick_erase,
            "Releasing deployment"
        );
        gateway
            .release_machines(&args)
            .await
            .during(|| format!("release machine '{id}'"))?;

        let conf = StateChangeConf::new(
            vec![
                MachineStatus::Deployed,
                MachineStatus::Releasing,
                MachineStatus::DiskErasing,
            ],
            vec![MachineStatus::Ready],
            self.timeouts.release,
        );
        wait_for_status(gateway, id, &conf).await?;

        let warnings = remove_tags(gateway, id, &declared.tags).await.warnings;
        info!(system_id = id, "Deployment released");
        Ok(Outcome::new((), warnings))
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::gateway::{GatewayError, MockGateway};
    use crate::model::Machine;
    use crate::poller::WaitTiming;
    use crate::state::user_data_digest;

    fn machine(status: MachineStatus) -> Machine {
        Machine {
            system_id: "xyz789".into(),
            hostname: "web-1".into(),
            domain: "maas".into(),
            fqdn: "web-1.maas".into(),
            architecture: "amd64/generic".into(),
            status,
            boot_mac: None,
            osystem: Some("ubuntu".into()),
            distro_series: Some("jammy".into()),
            block_devices: vec![],
            interfaces: vec![],
            tags: vec![],
            power: None,
        }
    }

    fn timeouts() -> Timeouts {
        Timeouts {
            deploy: WaitTiming::new(600, 120, 45),
            release: WaitTiming::new(600, 10, 3),
            ..Timeouts::default()
        }
    }

    fn declared() -> DeploymentConfig {
        DeploymentConfig {
            distro_series: Some("jammy".into()),
            user_data: Some("#cloud-config\n".into()),
            ..DeploymentConfig::default()
        }
    }

    #[test]
    fn test_secure_or_quick_erase_implies_erase() {
        let config = DeploymentConfig {
            release_erase: false,
            release_erase_quick: true,
            ..DeploymentConfig::default()
        };
        let args = DeploymentResource::release_args("xyz789", &config);
        assert!(args.erase && args.quick_erase && !args.secure_erase);

        let config = DeploymentConfig {
            release_erase: false,
            ..DeploymentConfig::default()
        };
        assert!(!DeploymentResource::release_args("xyz789", &config).erase);
    }

    #[test]
    fn test_user_data_is_base64_encoded_for_deploy() {
        let args = DeploymentResource::deploy_args(&declared());
        assert_eq!(args.user_data.as_deref(), Some("I2Nsb3VkLWNvbmZpZwo="));
    }

    #[test]
    fn test_unknown_owner_is_rejected() {
        let resource =
            DeploymentResource::new(Arc::new(MockGateway::new()), BTreeMap::new(), timeouts());
        assert!(resource.gateway_for(None).is_ok());
        let err = resource.gateway_for(Some("bob")).err().unwrap();
        assert!(err.to_string().contains("'bob'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_waits_for_deployed() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_allocate_machine()
            .times(1)
            .returning(|_| Ok(machine(MachineStatus::Allocated)));
        gateway
            .expect_deploy_machine()
            .with(eq("xyz789"), eq(DeploymentResource::deploy_args(&declared())))
            .times(1)
            .returning(|_, _| Ok(()));
        gateway
            .expect_get_machine()
            .times(2)
            .returning(|_| Ok(machine(MachineStatus::Deploying)));
        gateway
            .expect_get_machine()
            .returning(|_| Ok(machine(MachineStatus::Deployed)));
        gateway.expect_volume_groups().returning(|_| Ok(vec![]));
        gateway.expect_release_machines().never();

        let outcome = DeploymentResource::new(Arc::new(gateway), BTreeMap::new(), timeouts())
            .create(&declared())
            .await
            .unwrap();

        assert_eq!(outcome.value.status, MachineStatus::Deployed);
        assert_eq!(outcome.value.user_data, Some(user_data_digest("#cloud-config\n")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_deployment_is_released() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_allocate_machine()
            .returning(|_| Ok(machine(MachineStatus::Allocated)));
        gateway.expect_deploy_machine().returning(|_, _| Ok(()));
        gateway
            .expect_get_machine()
            .returning(|_| Ok(machine(MachineStatus::FailedDeployment)));
        gateway
            .expect_release_machines()
            .withf(|args| args.system_ids == ["xyz789"])
            .times(1)
            .returning(|_| Ok(()));

        let err = DeploymentResource::new(Arc::new(gateway), BTreeMap::new(), timeouts())
            .create(&declared())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProviderError::UnexpectedState { ref state, .. } if state == "Failed deployment"
        ));
    }

    #[tokio::test]
    async fn test_deploy_request_failure_is_released() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_allocate_machine()
            .returning(|_| Ok(machine(MachineStatus::Allocated)));
        gateway
            .expect_deploy_machine()
            .returning(|_, _| {
                Err(GatewayError::Api {
                    status: 503,
                    message: "unavailable".into(),
                })
            });
        gateway
            .expect_release_machines()
            .times(1)
            .returning(|_| Err(GatewayError::Transport("reset".into())));
        gateway.expect_get_machine().never();

        let err = DeploymentResource::new(Arc::new(gateway), BTreeMap::new(), timeouts())
            .create(&declared())
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "deploy machine 'xyz789' failed: API error: 503 - unavailable \
             (release machine xyz789: Transport error: reset)"
        );
        let ProviderError::ReleaseFailed { source, .. } = err else {
            panic!("expected the release failure to be attached");
        };
        assert!(matches!(*source, ProviderError::Gateway { .. }));
    }

    #[tokio::test]
    async fn test_owner_gateway_is_used_for_allocation() {
        let mut admin = MockGateway::new();
        admin.expect_allocate_machine().never();
        let mut alice = MockGateway::new();
        alice
            .expect_allocate_machine()
            .times(1)
            .returning(|_| Err(GatewayError::Api { status: 409, message: "no match".into() }));

        let owners = BTreeMap::from([("alice".to_string(), Arc::new(alice) as Arc<dyn Gateway>)]);
        let config = DeploymentConfig {
            owner: Some("alice".into()),
            ..declared()
        };
        let err = DeploymentResource::new(Arc::new(admin), owners, timeouts())
            .create(&config)
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("allocate machine failed"));
    }

    #[tokio::test]
    async fn test_update_of_immutable_fields_requires_replacement() {
        let config = DeploymentConfig {
            distro_series: Some("noble".into()),
            ..declared()
        };
        let err = DeploymentResource::new(Arc::new(MockGateway::new()), BTreeMap::new(), timeouts())
            .update("xyz789", &declared(), &config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProviderError::RequiresReplacement { ref fields } if fields == &["distro_series"]
        ));
    }

    #[tokio::test]
    async fn test_update_of_local_fields_only_reads() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_get_machine()
            .times(1)
            .returning(|_| Ok(machine(MachineStatus::Deployed)));
        gateway.expect_volume_groups().returning(|_| Ok(vec![]));
        gateway.expect_release_machines().never();

        let config = DeploymentConfig {
            comment: Some("rebuilt".into()),
            release_erase_secure: true,
            ..declared()
        };
        let outcome = DeploymentResource::new(Arc::new(gateway), BTreeMap::new(), timeouts())
            .update("xyz789", &declared(), &config)
            .await
            .unwrap();

        assert_eq!(outcome.value.id, "xyz789");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_through_disk_erasing() {
        let mut gateway = MockGateway::new();
        gateway
            .expect_release_machines()
            .withf(|args| args.erase && args.secure_erase)
            .times(1)
            .returning(|_| Ok(()));
        gateway
            .expect_get_machine()
            .times(1)
            .returning(|_| Ok(machine(MachineStatus::Releasing)));
        gateway
            .expect_get_machine()
            .times(1)
            .returning(|_| Ok(machine(MachineStatus::DiskErasing)));
        gateway
            .expect_get_machine()
            .returning(|_| Ok(machine(MachineStatus::Ready)));

        let config = DeploymentConfig {
            release_erase_secure: true,
            ..declared()
        };
        let outcome = DeploymentResource::new(Arc::new(gateway), BTreeMap::new(), timeouts())
            .delete("xyz789", &config)
            .await
            .unwrap();

        assert!(outcome.warnings.is_empty());
    }
}
