//! Lifecycle controllers for the resources the provider manages.
//!
//! - [`MachineResource`]: a registered machine, matched by MAC address and
//!   commissioned with a declared network and storage layout.
//! - [`DeploymentResource`]: a machine allocated from the pool with an
//!   operating system deployed onto it.

mod deployment;
mod machine;

use async_trait::async_trait;
use tracing::{info, warn};

pub use deployment::DeploymentResource;
pub use machine::MachineResource;

use crate::error::{GatewayResultExt, Outcome, ProviderError, Warning};
use crate::gateway::{Gateway, ReleaseArgs};
use crate::model::{Machine, MachineStatus};
use crate::poller::{wait_for_state, StateChangeConf};
use crate::state::MachineState;

/// Create, read, update and delete for one resource type.
///
/// `Config` is the declared configuration. Every operation re-reads the
/// remote machine; nothing is cached between calls.
#[async_trait]
pub trait Resource: Send + Sync {
    type Config: Send + Sync;

    /// Bring a new resource into existence and return its state.
    async fn create(&self, declared: &Self::Config) -> Result<Outcome<MachineState>, ProviderError>;

    /// Observe the resource identified by `id`.
    async fn read(&self, id: &str, declared: &Self::Config) -> Result<MachineState, ProviderError>;

    /// Move the resource from `prior` to `declared`.
    async fn update(
        &self,
        id: &str,
        prior: &Self::Config,
        declared: &Self::Config,
    ) -> Result<Outcome<MachineState>, ProviderError>;

    /// Return the machine to the pool.
    async fn delete(&self, id: &str, declared: &Self::Config) -> Result<Outcome<()>, ProviderError>;
}

/// Fetch a machine and its volume groups.
async fn fetch_machine(
    gateway: &dyn Gateway,
    system_id: &str,
) -> Result<(Machine, MachineState), ProviderError> {
    let machine = gateway
        .get_machine(system_id)
        .await
        .during(|| format!("get machine '{system_id}'"))?;
    let groups = gateway
        .volume_groups(system_id)
        .await
        .during(|| format!("list volume groups of '{system_id}'"))?;
    let state = MachineState::project(&machine, &groups);
    Ok((machine, state))
}

/// Refresh function for waits on a machine's status.
async fn machine_status(
    gateway: &dyn Gateway,
    system_id: &str,
) -> Result<(Machine, MachineStatus), ProviderError> {
    let machine = gateway
        .get_machine(system_id)
        .await
        .during(|| format!("get machine '{system_id}'"))?;
    let status = machine.status;
    Ok((machine, status))
}

/// Wait on the status of `system_id` as seen through `gateway`.
async fn wait_for_status(
    gateway: &dyn Gateway,
    system_id: &str,
    conf: &StateChangeConf<MachineStatus>,
) -> Result<Machine, ProviderError> {
    let resource = format!("machine {system_id}");
    wait_for_state(&resource, conf, move || machine_status(gateway, system_id)).await
}

/// Release a machine after a failed step and hand back the step's error.
/// A failed release is attached to that error.
async fn release_after_failure(
    gateway: &dyn Gateway,
    system_id: &str,
    error: ProviderError,
) -> ProviderError {
    let args = ReleaseArgs {
        system_ids: vec![system_id.to_string()],
        ..ReleaseArgs::default()
    };
    match gateway.release_machines(&args).await {
        Ok(()) => {
            info!(system_id, "Released machine after failure");
            error
        }
        Err(e) => {
            warn!(system_id, error = %e, "Unable to release machine");
            ProviderError::ReleaseFailed {
                source: Box::new(error),
                release: Warning::new("release machine", system_id, e),
            }
        }
    }
}
