//! Views of the objects owned by MAAS.
//!
//! These are request-scoped snapshots returned by a [`Gateway`](crate::Gateway).
//! Nothing here is cached between operations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pseudo filesystem marking a partition as an LVM physical volume.
pub const LVM_PV_FSTYPE: &str = "lvm-pv";

/// Machine lifecycle status as reported by MAAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MachineStatus {
    New,
    Commissioning,
    FailedCommissioning,
    Missing,
    Ready,
    Reserved,
    Allocated,
    Deploying,
    Deployed,
    Retired,
    Broken,
    FailedDeployment,
    Releasing,
    FailedReleasing,
    DiskErasing,
    FailedDiskErasing,
    Testing,
    FailedTesting,
    RescueMode,
    EnteringRescueMode,
    FailedEnteringRescueMode,
    ExitingRescueMode,
    FailedExitingRescueMode,
    /// Status name this crate does not know about.
    Unknown,
}

impl MachineStatus {
    /// The status name exactly as MAAS spells it.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Commissioning => "Commissioning",
            Self::FailedCommissioning => "Failed commissioning",
            Self::Missing => "Missing",
            Self::Ready => "Ready",
            Self::Reserved => "Reserved",
            Self::Allocated => "Allocated",
            Self::Deploying => "Deploying",
            Self::Deployed => "Deployed",
            Self::Retired => "Retired",
            Self::Broken => "Broken",
            Self::FailedDeployment => "Failed deployment",
            Self::Releasing => "Releasing",
            Self::FailedReleasing => "Releasing failed",
            Self::DiskErasing => "Disk erasing",
            Self::FailedDiskErasing => "Failed disk erasing",
            Self::Testing => "Testing",
            Self::FailedTesting => "Failed testing",
            Self::RescueMode => "Rescue mode",
            Self::EnteringRescueMode => "Entering rescue mode",
            Self::FailedEnteringRescueMode => "Failed to enter rescue mode",
            Self::ExitingRescueMode => "Exiting rescue mode",
            Self::FailedExitingRescueMode => "Failed to exit rescue mode",
            Self::Unknown => "Unknown",
        }
    }

    /// Parse a MAAS status name. Unrecognised names map to [`MachineStatus::Unknown`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "New" => Self::New,
            "Commissioning" => Self::Commissioning,
            "Failed commissioning" => Self::FailedCommissioning,
            "Missing" => Self::Missing,
            "Ready" => Self::Ready,
            "Reserved" => Self::Reserved,
            "Allocated" => Self::Allocated,
            "Deploying" => Self::Deploying,
            "Deployed" => Self::Deployed,
            "Retired" => Self::Retired,
            "Broken" => Self::Broken,
            "Failed deployment" => Self::FailedDeployment,
            "Releasing" => Self::Releasing,
            "Releasing failed" => Self::FailedReleasing,
            "Disk erasing" => Self::DiskErasing,
            "Failed disk erasing" => Self::FailedDiskErasing,
            "Testing" => Self::Testing,
            "Failed testing" => Self::FailedTesting,
            "Rescue mode" => Self::RescueMode,
            "Entering rescue mode" => Self::EnteringRescueMode,
            "Failed to enter rescue mode" => Self::FailedEnteringRescueMode,
            "Exiting rescue mode" => Self::ExitingRescueMode,
            "Failed to exit rescue mode" => Self::FailedExitingRescueMode,
            _ => Self::Unknown,
        }
    }

    /// Whether the machine is currently held by a user and must be released
    /// before it returns to the pool.
    #[must_use]
    pub fn is_held(self) -> bool {
        matches!(
            self,
            Self::Allocated | Self::Deploying | Self::Deployed | Self::FailedDeployment
        )
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for MachineStatus {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<MachineStatus> for String {
    fn from(status: MachineStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Whether a machine registered under some MAC address is visible yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Missing,
    Exists,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Exists => write!(f, "exists"),
        }
    }
}

/// A machine known to MAAS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    /// MAAS system ID.
    pub system_id: String,
    pub hostname: String,
    pub domain: String,
    pub fqdn: String,
    /// Architecture, e.g. `amd64/generic`.
    pub architecture: String,
    pub status: MachineStatus,
    /// MAC address of the interface the machine PXE boots from.
    pub boot_mac: Option<String>,
    pub osystem: Option<String>,
    pub distro_series: Option<String>,
    pub block_devices: Vec<BlockDevice>,
    pub interfaces: Vec<Interface>,
    pub tags: Vec<String>,
    pub power: Option<PowerParameters>,
}

/// Power driver and its parameters as stored by MAAS.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PowerParameters {
    /// Power driver, e.g. `ipmi`.
    pub power_type: String,
    /// Driver parameters keyed by MAAS parameter name (`power_address`, ...).
    pub parameters: BTreeMap<String, String>,
}

/// Whether a block device is backed by hardware or by LVM/RAID/bcache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockDeviceKind {
    Physical,
    Virtual,
}

/// Filesystem placed on a partition or block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystem {
    pub fstype: String,
    pub mount_point: Option<String>,
}

impl FileSystem {
    /// Whether this filesystem marks an LVM physical volume.
    #[must_use]
    pub fn is_lvm_pv(&self) -> bool {
        self.fstype == LVM_PV_FSTYPE
    }
}

/// A block device attached to a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDevice {
    pub id: u64,
    /// Name, unique per machine (`sda`, `vg0-root`).
    pub name: String,
    pub kind: BlockDeviceKind,
    pub path: String,
    pub id_path: Option<String>,
    pub uuid: Option<String>,
    pub model: Option<String>,
    /// Size in bytes.
    pub size: u64,
    pub block_size: u64,
    pub partitions: Vec<Partition>,
    pub filesystem: Option<FileSystem>,
}

impl BlockDevice {
    /// Whether this device is a logical volume of the named volume group.
    #[must_use]
    pub fn belongs_to_volume_group(&self, group: &str) -> bool {
        self.name
            .strip_prefix(group)
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

/// A partition on a block device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub id: u64,
    /// ID of the block device holding this partition.
    pub device_id: u64,
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    pub filesystem: Option<FileSystem>,
}

/// An LVM volume group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeGroup {
    pub id: u64,
    pub name: String,
    pub uuid: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Paths of the physical volumes backing the group.
    pub devices: Vec<String>,
}

/// Interface type as reported by MAAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Physical,
    Bond,
    Bridge,
    Vlan,
    Alias,
    #[serde(other)]
    Unknown,
}

/// How an interface gets its address on a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LinkMode {
    Auto,
    Dhcp,
    Static,
    LinkUp,
}

impl LinkMode {
    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Dhcp => "dhcp",
            Self::Static => "static",
            Self::LinkUp => "link_up",
        }
    }
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AUTO" => Ok(Self::Auto),
            "DHCP" => Ok(Self::Dhcp),
            "STATIC" => Ok(Self::Static),
            "LINK_UP" => Ok(Self::LinkUp),
            _ => Err(format!(
                "unknown link mode '{s}', expected one of auto, dhcp, static, link_up"
            )),
        }
    }
}

impl TryFrom<String> for LinkMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LinkMode> for String {
    fn from(mode: LinkMode) -> Self {
        mode.as_str().to_string()
    }
}

/// A subnet, identified by CIDR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: u64,
    pub cidr: String,
    pub name: String,
    /// Name of the space the subnet belongs to.
    pub space: String,
}

/// A space grouping subnets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: u64,
    pub name: String,
    pub subnets: Vec<Subnet>,
}

/// Association between an interface and a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: u64,
    pub mode: LinkMode,
    pub subnet: Option<Subnet>,
}

/// Bonding parameters of a bond interface.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BondParameters {
    pub mode: Option<String>,
    pub miimon: Option<u32>,
    pub downdelay: Option<u32>,
    pub updelay: Option<u32>,
    pub lacp_rate: Option<String>,
    pub xmit_hash_policy: Option<String>,
}

/// A network interface of a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    pub id: u64,
    pub name: String,
    pub kind: InterfaceKind,
    pub mac_address: Option<String>,
    pub links: Vec<Link>,
    /// Names of parent interfaces (bond members).
    pub parents: Vec<String>,
    /// Names of child interfaces.
    pub children: Vec<String>,
    /// Present on bond interfaces.
    pub bond: Option<BondParameters>,
}

/// A tag that can be attached to machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub comment: String,
    pub definition: String,
}
