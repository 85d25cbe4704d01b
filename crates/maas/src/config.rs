//! Declared configuration for MAAS resources.
//!
//! The plugin layer hands resource attributes over as a loosely-typed
//! attribute bag. These types are what the reconcilers actually consume:
//! everything optional is an `Option`, everything enumerated is an enum, and
//! [`validate`](MachineConfig::validate) rejects what MAAS would reject later.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::gateway::{AllocateArgs, CommissionArgs, CreateBondArgs, MachineUpdate};
use crate::model::{LinkMode, LVM_PV_FSTYPE};

/// Parse a typed configuration out of an attribute bag.
///
/// # Errors
/// Returns [`ProviderError::Config`] when the attributes do not match the type.
pub fn from_attributes<T: DeserializeOwned>(
    attributes: serde_json::Value,
) -> Result<T, ProviderError> {
    serde_json::from_value(attributes).map_err(|e| ProviderError::Config(e.to_string()))
}

fn require(condition: bool, message: impl FnOnce() -> String) -> Result<(), ProviderError> {
    if condition {
        Ok(())
    } else {
        Err(ProviderError::Config(message()))
    }
}

// ============================================================================
// Storage
// ============================================================================

/// A partition to create on a physical block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Partition path, e.g. `sda1` or `/dev/sda1`. Creation order follows it.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<String>,
}

impl PartitionConfig {
    /// Whether this partition is an LVM physical volume.
    #[must_use]
    pub fn is_lvm_pv(&self) -> bool {
        self.fstype.as_deref() == Some(LVM_PV_FSTYPE)
    }
}

/// Partition layout of one physical block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceConfig {
    /// Name of an existing physical block device (`sda`).
    pub name: String,
    /// Path every partition path must contain. Defaults to the name.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, alias = "partition")]
    pub partitions: Vec<PartitionConfig>,
}

impl BlockDeviceConfig {
    /// The string every declared partition path must contain.
    #[must_use]
    pub fn device_path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }

    /// Partitions in creation order (ascending path).
    #[must_use]
    pub fn ordered_partitions(&self) -> Vec<&PartitionConfig> {
        let mut partitions: Vec<_> = self.partitions.iter().collect();
        partitions.sort_by(|a, b| a.path.cmp(&b.path));
        partitions
    }
}

/// A logical volume carved from a volume group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolumeConfig {
    /// Full name including the `<group>-` prefix.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(default)]
    pub mountpoint: Option<String>,
}

impl LogicalVolumeConfig {
    /// Name without the volume group prefix, or `None` if the prefix is missing.
    #[must_use]
    pub fn short_name(&self, group: &str) -> Option<&str> {
        self.name
            .strip_prefix(group)
            .and_then(|rest| rest.strip_prefix('-'))
            .filter(|rest| !rest.is_empty())
    }
}

/// A volume group over previously declared `lvm-pv` partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGroupConfig {
    pub name: String,
    /// Paths of member partitions.
    pub devices: Vec<String>,
    #[serde(default, alias = "logical_volume")]
    pub logical_volumes: Vec<LogicalVolumeConfig>,
}

/// Check a storage layout for mistakes that need no remote knowledge.
///
/// # Errors
/// Returns the first layout problem found.
pub fn validate_storage_layout(
    block_devices: &[BlockDeviceConfig],
    volume_groups: &[VolumeGroupConfig],
) -> Result<(), ProviderError> {
    let mut declared: BTreeMap<&str, &PartitionConfig> = BTreeMap::new();

    for device in block_devices {
        require(!device.name.is_empty(), || "block device name must not be empty".into())?;
        for partition in &device.partitions {
            require(partition.size > 0, || {
                format!("partition '{}' must have a positive size", partition.path)
            })?;
            require(partition.mountpoint.is_none() || partition.fstype.is_some(), || {
                format!("partition '{}' needs an fstype to be mounted", partition.path)
            })?;
            if !partition.path.contains(device.device_path()) {
                return Err(ProviderError::PartitionDeviceMismatch {
                    partition: partition.path.clone(),
                    device: device.device_path().to_string(),
                });
            }
            if declared.insert(&partition.path, partition).is_some() {
                return Err(ProviderError::Config(format!(
                    "partition '{}' is declared more than once",
                    partition.path
                )));
            }
        }
    }

    for group in volume_groups {
        require(!group.name.is_empty(), || "volume group name must not be empty".into())?;
        require(!group.devices.is_empty(), || {
            format!("volume group '{}' needs at least one device", group.name)
        })?;
        for member in &group.devices {
            let partition = declared.get(member.as_str()).ok_or_else(|| {
                ProviderError::PartitionNotFound {
                    partition: member.clone(),
                    volume_group: group.name.clone(),
                }
            })?;
            if let Some(fstype) = partition.fstype.as_deref().filter(|f| *f != LVM_PV_FSTYPE) {
                return Err(ProviderError::PartitionNotLvm {
                    partition: member.clone(),
                    fstype: fstype.to_string(),
                });
            }
        }
        for volume in &group.logical_volumes {
            if volume.short_name(&group.name).is_none() {
                return Err(ProviderError::LogicalVolumeName {
                    name: volume.name.clone(),
                    volume_group: group.name.clone(),
                });
            }
            require(volume.size > 0, || {
                format!("logical volume '{}' must have a positive size", volume.name)
            })?;
            require(volume.mountpoint.is_none() || volume.fstype.is_some(), || {
                format!("logical volume '{}' needs an fstype to be mounted", volume.name)
            })?;
        }
    }

    Ok(())
}

// ============================================================================
// Network
// ============================================================================

/// Linux bonding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BondMode {
    #[serde(rename = "balance-rr")]
    BalanceRr,
    #[serde(rename = "active-backup")]
    ActiveBackup,
    #[serde(rename = "balance-xor")]
    BalanceXor,
    #[serde(rename = "broadcast")]
    Broadcast,
    #[serde(rename = "802.3ad")]
    Lacp,
    #[serde(rename = "balance-tlb")]
    BalanceTlb,
    #[serde(rename = "balance-alb")]
    BalanceAlb,
}

impl BondMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BalanceRr => "balance-rr",
            Self::ActiveBackup => "active-backup",
            Self::BalanceXor => "balance-xor",
            Self::Broadcast => "broadcast",
            Self::Lacp => "802.3ad",
            Self::BalanceTlb => "balance-tlb",
            Self::BalanceAlb => "balance-alb",
        }
    }
}

impl fmt::Display for BondMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LACPDU transmission rate for 802.3ad bonds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LacpRate {
    Fast,
    Slow,
}

impl LacpRate {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
        }
    }
}

/// Transmit hash policy for balance-xor, 802.3ad and balance-tlb bonds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XmitHashPolicy {
    #[serde(rename = "layer2")]
    Layer2,
    #[serde(rename = "layer2+3")]
    Layer23,
    #[serde(rename = "layer3+4")]
    Layer34,
    #[serde(rename = "encap2+3")]
    Encap23,
    #[serde(rename = "encap3+4")]
    Encap34,
}

impl XmitHashPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Layer2 => "layer2",
            Self::Layer23 => "layer2+3",
            Self::Layer34 => "layer3+4",
            Self::Encap23 => "encap2+3",
            Self::Encap34 => "encap3+4",
        }
    }
}

/// Bond parameters for a virtual interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondConfig {
    /// Names of the member interfaces.
    pub parents: Vec<String>,
    #[serde(default)]
    pub mode: Option<BondMode>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub miimon: Option<u32>,
    #[serde(default)]
    pub downdelay: Option<u32>,
    #[serde(default)]
    pub updelay: Option<u32>,
    #[serde(default)]
    pub lacp_rate: Option<LacpRate>,
    #[serde(default)]
    pub xmit_hash_policy: Option<XmitHashPolicy>,
}

impl BondConfig {
    /// Build the bond creation request once parent IDs are resolved.
    #[must_use]
    pub fn to_create_args(&self, name: &str, parents: Vec<u64>) -> CreateBondArgs {
        CreateBondArgs {
            name: name.to_string(),
            parents,
            mac_address: self.mac_address.clone(),
            mode: self.mode.map(|m| m.as_str().to_string()),
            miimon: self.miimon,
            downdelay: self.downdelay,
            updelay: self.updelay,
            lacp_rate: self.lacp_rate.map(|r| r.as_str().to_string()),
            xmit_hash_policy: self.xmit_hash_policy.map(|p| p.as_str().to_string()),
        }
    }
}

/// A declared interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    /// CIDR of the subnet to link to. No CIDR leaves links alone.
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default = "default_link_mode")]
    pub mode: LinkMode,
    #[serde(default)]
    pub bond: Option<BondConfig>,
}

fn default_link_mode() -> LinkMode {
    LinkMode::Auto
}

fn validate_interfaces(interfaces: &[InterfaceConfig]) -> Result<(), ProviderError> {
    for iface in interfaces {
        require(!iface.name.is_empty(), || "interface name must not be empty".into())?;
        if let Some(bond) = &iface.bond {
            require(!bond.parents.is_empty(), || {
                format!("bond '{}' needs at least one parent interface", iface.name)
            })?;
            require(!bond.parents.contains(&iface.name), || {
                format!("bond '{}' cannot be its own parent", iface.name)
            })?;
        }
    }
    Ok(())
}

// ============================================================================
// Power
// ============================================================================

/// BMC power settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerConfig {
    /// Power driver, e.g. `ipmi`, `redfish`, `virsh`.
    #[serde(rename = "type")]
    pub power_type: String,
    pub address: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Extra driver parameters passed through verbatim.
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

impl PowerConfig {
    /// Power parameters keyed by MAAS name.
    #[must_use]
    pub fn parameters(&self) -> BTreeMap<String, String> {
        let mut params = self.custom.clone();
        params.insert("power_address".into(), self.address.clone());
        if let Some(user) = &self.user {
            params.insert("power_user".into(), user.clone());
        }
        if let Some(password) = &self.password {
            params.insert("power_pass".into(), password.clone());
        }
        params
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Declared configuration of a registered machine, matched by MAC address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// MAC address of the boot interface used to find the machine.
    pub mac_address: String,
    pub hostname: String,
    pub domain: String,
    #[serde(default = "default_architecture")]
    pub architecture: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub enable_ssh: bool,
    #[serde(default)]
    pub skip_bmc_config: bool,
    #[serde(default)]
    pub skip_networking: bool,
    #[serde(default)]
    pub skip_storage: bool,
    #[serde(default)]
    pub commissioning_scripts: Vec<String>,
    #[serde(default)]
    pub testing_scripts: Vec<String>,
    #[serde(default, alias = "interface")]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default, alias = "block_device")]
    pub block_devices: Vec<BlockDeviceConfig>,
    #[serde(default, alias = "volume_group")]
    pub volume_groups: Vec<VolumeGroupConfig>,
    #[serde(default)]
    pub power: Option<PowerConfig>,
}

fn default_architecture() -> String {
    "amd64".to_string()
}

impl MachineConfig {
    /// Validate the declared configuration.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ProviderError> {
        require(!self.mac_address.is_empty(), || "mac_address is required".into())?;
        require(!self.hostname.is_empty(), || "hostname is required".into())?;
        require(!self.domain.is_empty(), || "domain is required".into())?;
        if let Some(power) = &self.power {
            require(!power.power_type.is_empty(), || "power type is required".into())?;
            require(!power.address.is_empty(), || "power address is required".into())?;
        }
        validate_interfaces(&self.interfaces)?;
        validate_storage_layout(&self.block_devices, &self.volume_groups)
    }

    /// Whether any storage layout is declared.
    #[must_use]
    pub fn declares_storage(&self) -> bool {
        !self.block_devices.is_empty() || !self.volume_groups.is_empty()
    }

    /// Hostname, domain and power as a base update.
    #[must_use]
    pub fn base_update(&self) -> MachineUpdate {
        MachineUpdate {
            hostname: Some(self.hostname.clone()),
            domain: Some(self.domain.clone()),
            description: Some(self.description.clone()),
            power_type: self.power.as_ref().map(|p| p.power_type.clone()),
            power_parameters: self
                .power
                .as_ref()
                .map(PowerConfig::parameters)
                .unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn commission_args(&self) -> CommissionArgs {
        CommissionArgs {
            enable_ssh: self.enable_ssh,
            skip_bmc_config: self.skip_bmc_config,
            skip_networking: self.skip_networking,
            skip_storage: self.skip_storage,
            commissioning_scripts: self.commissioning_scripts.clone(),
            testing_scripts: self.testing_scripts.clone(),
        }
    }
}

/// Declared configuration of a deployment on an allocated machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub cpu_count: Option<u32>,
    /// Minimum memory in MiB.
    #[serde(default)]
    pub memory: Option<u64>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub distro_series: Option<String>,
    #[serde(default)]
    pub hwe_kernel: Option<String>,
    /// Cloud-init user data, plain text.
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Deploy with the token configured for this owner instead of the default.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default = "default_true")]
    pub release_erase: bool,
    #[serde(default)]
    pub release_erase_secure: bool,
    #[serde(default)]
    pub release_erase_quick: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            architecture: None,
            cpu_count: None,
            memory: None,
            hostname: None,
            distro_series: None,
            hwe_kernel: None,
            user_data: None,
            comment: None,
            tags: Vec::new(),
            owner: None,
            release_erase: true,
            release_erase_secure: false,
            release_erase_quick: false,
        }
    }
}

impl DeploymentConfig {
    /// Validate the declared configuration.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ProviderError> {
        require(self.cpu_count != Some(0), || "cpu_count must be positive".into())?;
        require(self.memory != Some(0), || "memory must be positive".into())?;
        require(self.tags.iter().all(|t| !t.is_empty()), || {
            "tag names must not be empty".into()
        })
    }

    #[must_use]
    pub fn allocate_args(&self) -> AllocateArgs {
        AllocateArgs {
            hostname: self.hostname.clone(),
            architecture: self.architecture.clone(),
            min_cpu_count: self.cpu_count,
            min_memory: self.memory,
        }
    }

    /// Fields that differ from `prior` and cannot be changed in place.
    #[must_use]
    pub fn replacement_fields(&self, prior: &Self) -> Vec<String> {
        let mut fields = Vec::new();
        let mut check = |name: &str, changed: bool| {
            if changed {
                fields.push(name.to_string());
            }
        };
        check("architecture", self.architecture != prior.architecture);
        check("cpu_count", self.cpu_count != prior.cpu_count);
        check("memory", self.memory != prior.memory);
        check("hostname", self.hostname != prior.hostname);
        check("distro_series", self.distro_series != prior.distro_series);
        check("hwe_kernel", self.hwe_kernel != prior.hwe_kernel);
        check("user_data", self.user_data != prior.user_data);
        check("owner", self.owner != prior.owner);
        fields
    }
}
