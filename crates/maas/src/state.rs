//! Resource state written back after every operation.
//!
//! This is a pure projection of what MAAS reports. Secrets that MAAS does not
//! echo back (deploy user data) are represented by a digest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::model::{
    BlockDevice, BlockDeviceKind, Interface, InterfaceKind, Machine, MachineStatus, Partition,
    VolumeGroup,
};

/// Observed state of a machine or deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    /// MAAS system ID, the resource identifier.
    pub id: String,
    pub architecture: String,
    pub hostname: String,
    pub domain: String,
    pub fqdn: String,
    pub mac_address: Option<String>,
    pub status: MachineStatus,
    pub osystem: Option<String>,
    pub distro_series: Option<String>,
    pub interfaces: Vec<InterfaceState>,
    pub block_devices: Vec<BlockDeviceState>,
    pub volume_groups: Vec<VolumeGroupState>,
    pub tags: Vec<String>,
    pub power: Option<PowerState>,
    /// SHA-1 hex digest of the declared user data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceState {
    pub name: String,
    /// Mode of the first link, if any.
    pub mode: Option<String>,
    /// CIDR of the first link's subnet, if any.
    pub subnet: Option<String>,
    pub bond: Option<BondState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondState {
    pub parents: Vec<String>,
    pub mac_address: Option<String>,
    pub mode: Option<String>,
    pub miimon: Option<u32>,
    pub downdelay: Option<u32>,
    pub updelay: Option<u32>,
    pub lacp_rate: Option<String>,
    pub xmit_hash_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceState {
    pub name: String,
    pub id_path: Option<String>,
    pub uuid: Option<String>,
    pub path: String,
    pub model: Option<String>,
    pub size: u64,
    pub block_size: u64,
    pub partitions: Vec<PartitionState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionState {
    pub path: String,
    pub size: u64,
    pub fstype: Option<String>,
    pub mountpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroupState {
    pub name: String,
    pub size: u64,
    pub devices: Vec<String>,
    pub logical_volumes: Vec<LogicalVolumeState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolumeState {
    /// Full name including the group prefix.
    pub name: String,
    pub size: u64,
    pub fstype: Option<String>,
    pub mountpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerState {
    #[serde(rename = "type")]
    pub power_type: String,
    pub address: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Every other driver parameter.
    pub custom: BTreeMap<String, String>,
}

impl MachineState {
    /// Project a machine and its volume groups.
    #[must_use]
    pub fn project(machine: &Machine, volume_groups: &[VolumeGroup]) -> Self {
        Self {
            id: machine.system_id.clone(),
            architecture: machine.architecture.clone(),
            hostname: machine.hostname.clone(),
            domain: machine.domain.clone(),
            fqdn: machine.fqdn.clone(),
            mac_address: machine.boot_mac.clone(),
            status: machine.status,
            osystem: machine.osystem.clone(),
            distro_series: machine.distro_series.clone(),
            interfaces: machine.interfaces.iter().map(InterfaceState::project).collect(),
            block_devices: machine
                .block_devices
                .iter()
                .filter(|d| d.kind == BlockDeviceKind::Physical)
                .map(BlockDeviceState::project)
                .collect(),
            volume_groups: volume_groups
                .iter()
                .map(|g| VolumeGroupState::project(g, &machine.block_devices))
                .collect(),
            tags: machine.tags.clone(),
            power: machine.power.as_ref().map(|p| {
                let mut custom = p.parameters.clone();
                PowerState {
                    power_type: p.power_type.clone(),
                    address: custom.remove("power_address"),
                    user: custom.remove("power_user"),
                    password: custom.remove("power_pass"),
                    custom,
                }
            }),
            user_data: None,
        }
    }

    /// Record the digest of the user data a deployment was started with.
    #[must_use]
    pub fn with_user_data(mut self, user_data: Option<&str>) -> Self {
        self.user_data = user_data.map(user_data_digest);
        self
    }
}

/// SHA-1 hex digest stored in place of deploy user data.
#[must_use]
pub fn user_data_digest(user_data: &str) -> String {
    hex::encode(Sha1::digest(user_data.as_bytes()))
}

impl InterfaceState {
    fn project(iface: &Interface) -> Self {
        let first = iface.links.first();
        Self {
            name: iface.name.clone(),
            mode: first.map(|l| l.mode.to_string()),
            subnet: first.and_then(|l| l.subnet.as_ref()).map(|s| s.cidr.clone()),
            bond: (iface.kind == InterfaceKind::Bond).then(|| {
                let params = iface.bond.clone().unwrap_or_default();
                BondState {
                    parents: iface.parents.clone(),
                    mac_address: iface.mac_address.clone(),
                    mode: params.mode,
                    miimon: params.miimon,
                    downdelay: params.downdelay,
                    updelay: params.updelay,
                    lacp_rate: params.lacp_rate,
                    xmit_hash_policy: params.xmit_hash_policy,
                }
            }),
        }
    }
}

impl BlockDeviceState {
    fn project(device: &BlockDevice) -> Self {
        Self {
            name: device.name.clone(),
            id_path: device.id_path.clone(),
            uuid: device.uuid.clone(),
            path: device.path.clone(),
            model: device.model.clone(),
            size: device.size,
            block_size: device.block_size,
            partitions: device.partitions.iter().map(PartitionState::project).collect(),
        }
    }
}

impl PartitionState {
    fn project(partition: &Partition) -> Self {
        let fs = partition.filesystem.as_ref();
        Self {
            path: partition.path.clone(),
            size: partition.size,
            fstype: fs.map(|f| f.fstype.clone()),
            mountpoint: fs.and_then(|f| f.mount_point.clone()),
        }
    }
}

impl VolumeGroupState {
    fn project(group: &VolumeGroup, devices: &[BlockDevice]) -> Self {
        Self {
            name: group.name.clone(),
            size: group.size,
            devices: group.devices.clone(),
            logical_volumes: devices
                .iter()
                .filter(|d| d.belongs_to_volume_group(&group.name))
                .map(|d| {
                    let fs = d.filesystem.as_ref();
                    LogicalVolumeState {
                        name: d.name.clone(),
                        size: d.size,
                        fstype: fs.map(|f| f.fstype.clone()),
                        mountpoint: fs.and_then(|f| f.mount_point.clone()),
                    }
                })
                .collect(),
        }
    }
}
