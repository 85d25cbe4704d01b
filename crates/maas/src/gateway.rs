//! Gateway trait and request types for the MAAS API.
//!
//! The HTTP client that speaks to MAAS lives outside this crate. Everything
//! the reconcilers need from it is expressed by [`Gateway`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    BlockDevice, Interface, LinkMode, Machine, Partition, Space, Tag, VolumeGroup,
};

/// Errors returned by a gateway implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The requested object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request never reached the API or the response was unreadable.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Constraints used to allocate a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateArgs {
    pub hostname: Option<String>,
    pub architecture: Option<String>,
    pub min_cpu_count: Option<u32>,
    /// Minimum memory in MiB.
    pub min_memory: Option<u64>,
}

/// Mutable base attributes of a machine. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineUpdate {
    pub hostname: Option<String>,
    pub domain: Option<String>,
    pub description: Option<String>,
    pub power_type: Option<String>,
    /// Power parameters keyed by MAAS name (`power_address`, `power_user`, ...).
    pub power_parameters: BTreeMap<String, String>,
}

impl MachineUpdate {
    /// Whether the update would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hostname.is_none()
            && self.domain.is_none()
            && self.description.is_none()
            && self.power_type.is_none()
            && self.power_parameters.is_empty()
    }
}

/// Options for commissioning a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionArgs {
    pub enable_ssh: bool,
    pub skip_bmc_config: bool,
    pub skip_networking: bool,
    pub skip_storage: bool,
    pub commissioning_scripts: Vec<String>,
    pub testing_scripts: Vec<String>,
}

/// Options for deploying an operating system onto an allocated machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployArgs {
    /// Base64-encoded cloud-init user data.
    pub user_data: Option<String>,
    pub distro_series: Option<String>,
    pub hwe_kernel: Option<String>,
    pub comment: Option<String>,
}

/// Release request. `secure_erase` and `quick_erase` only apply with `erase`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseArgs {
    pub system_ids: Vec<String>,
    pub erase: bool,
    pub secure_erase: bool,
    pub quick_erase: bool,
    pub comment: Option<String>,
}

/// Bond creation request. Parents are interface IDs on the same machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBondArgs {
    pub name: String,
    pub parents: Vec<u64>,
    pub mac_address: Option<String>,
    pub mode: Option<String>,
    pub miimon: Option<u32>,
    pub downdelay: Option<u32>,
    pub updelay: Option<u32>,
    pub lacp_rate: Option<String>,
    pub xmit_hash_policy: Option<String>,
}

/// Remote state gateway for a single MAAS endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Get a machine by system ID.
    async fn get_machine(&self, system_id: &str) -> Result<Machine, GatewayError>;

    /// Find the single machine owning an interface with this MAC address.
    async fn find_machine_by_mac(&self, mac_address: &str) -> Result<Machine, GatewayError>;

    /// Allocate a ready machine matching the constraints.
    async fn allocate_machine(&self, args: &AllocateArgs) -> Result<Machine, GatewayError>;

    /// Update hostname, domain or power settings.
    async fn update_machine(
        &self,
        system_id: &str,
        update: &MachineUpdate,
    ) -> Result<Machine, GatewayError>;

    /// Start commissioning.
    async fn commission_machine(
        &self,
        system_id: &str,
        args: &CommissionArgs,
    ) -> Result<(), GatewayError>;

    /// Start deployment of an allocated machine.
    async fn deploy_machine(&self, system_id: &str, args: &DeployArgs) -> Result<(), GatewayError>;

    /// Release machines back to the pool.
    async fn release_machines(&self, args: &ReleaseArgs) -> Result<(), GatewayError>;

    /// Delete a block device (used for logical volumes).
    async fn delete_block_device(&self, system_id: &str, device_id: u64)
        -> Result<(), GatewayError>;

    /// Create a partition of `size` bytes at the end of a block device.
    async fn create_partition(
        &self,
        system_id: &str,
        device_id: u64,
        size: u64,
    ) -> Result<Partition, GatewayError>;

    async fn delete_partition(
        &self,
        system_id: &str,
        device_id: u64,
        partition_id: u64,
    ) -> Result<(), GatewayError>;

    async fn format_partition(
        &self,
        system_id: &str,
        device_id: u64,
        partition_id: u64,
        fstype: &str,
    ) -> Result<Partition, GatewayError>;

    async fn mount_partition(
        &self,
        system_id: &str,
        device_id: u64,
        partition_id: u64,
        mount_point: &str,
    ) -> Result<Partition, GatewayError>;

    /// List the volume groups of a machine.
    async fn volume_groups(&self, system_id: &str) -> Result<Vec<VolumeGroup>, GatewayError>;

    /// Create a volume group over the given partition IDs.
    async fn create_volume_group(
        &self,
        system_id: &str,
        name: &str,
        partition_ids: Vec<u64>,
    ) -> Result<VolumeGroup, GatewayError>;

    async fn delete_volume_group(&self, system_id: &str, group_id: u64)
        -> Result<(), GatewayError>;

    /// Create a logical volume. `name` excludes the volume group prefix.
    async fn create_logical_volume(
        &self,
        system_id: &str,
        group_id: u64,
        name: &str,
        size: u64,
    ) -> Result<BlockDevice, GatewayError>;

    async fn format_block_device(
        &self,
        system_id: &str,
        device_id: u64,
        fstype: &str,
    ) -> Result<BlockDevice, GatewayError>;

    async fn mount_block_device(
        &self,
        system_id: &str,
        device_id: u64,
        mount_point: &str,
    ) -> Result<BlockDevice, GatewayError>;

    async fn delete_interface(&self, system_id: &str, interface_id: u64)
        -> Result<(), GatewayError>;

    async fn create_bond(
        &self,
        system_id: &str,
        args: &CreateBondArgs,
    ) -> Result<Interface, GatewayError>;

    async fn link_subnet(
        &self,
        system_id: &str,
        interface_id: u64,
        subnet_id: u64,
        mode: LinkMode,
    ) -> Result<Interface, GatewayError>;

    async fn unlink_subnet(
        &self,
        system_id: &str,
        interface_id: u64,
        link_id: u64,
    ) -> Result<Interface, GatewayError>;

    /// List all spaces with their subnets.
    async fn spaces(&self) -> Result<Vec<Space>, GatewayError>;

    async fn get_tag(&self, name: &str) -> Result<Tag, GatewayError>;

    async fn create_tag(&self, name: &str, comment: &str) -> Result<Tag, GatewayError>;

    async fn add_tag_to_machine(&self, tag: &str, system_id: &str) -> Result<(), GatewayError>;

    async fn remove_tag_from_machine(&self, tag: &str, system_id: &str)
        -> Result<(), GatewayError>;
}
