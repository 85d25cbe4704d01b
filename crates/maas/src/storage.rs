//! Storage reconciliation: partitions, volume groups and logical volumes.
//!
//! The declared layout is not diffed against the remote one. Every logical
//! volume, volume group and partition is deleted first and the declared
//! layout is rebuilt from scratch, so running it twice with the same layout
//! converges to the same result.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::{
    validate_storage_layout, BlockDeviceConfig, LogicalVolumeConfig, VolumeGroupConfig,
};
use crate::error::{GatewayResultExt, ProviderError};
use crate::gateway::Gateway;
use crate::model::{BlockDevice, BlockDeviceKind, Machine, Partition, VolumeGroup};

/// Tear down the storage layout of `machine` and rebuild it as declared.
///
/// `machine` must be a fresh view; its block devices are what gets torn down.
///
/// # Errors
/// Aborts on the first validation or gateway failure. Whatever was already
/// deleted or created stays that way; running again starts over.
pub async fn reconcile_storage(
    gateway: &dyn Gateway,
    machine: &Machine,
    block_devices: &[BlockDeviceConfig],
    volume_groups: &[VolumeGroupConfig],
) -> Result<(), ProviderError> {
    let system_id = machine.system_id.as_str();
    validate_storage_layout(block_devices, volume_groups)?;

    let physical: BTreeMap<&str, &BlockDevice> = machine
        .block_devices
        .iter()
        .filter(|d| d.kind == BlockDeviceKind::Physical)
        .map(|d| (d.name.as_str(), d))
        .collect();

    for declared in block_devices {
        if !physical.contains_key(declared.name.as_str()) {
            return Err(ProviderError::BlockDeviceNotFound {
                device: declared.name.clone(),
                system_id: system_id.to_string(),
            });
        }
    }

    info!(system_id, "Rebuilding storage layout");
    destroy_layout(gateway, machine).await?;

    let mut created: BTreeMap<String, Partition> = BTreeMap::new();
    for declared in block_devices {
        let device = physical[declared.name.as_str()];
        created.extend(create_partitions(gateway, system_id, device, declared).await?);
    }

    for declared in volume_groups {
        create_volume_group(gateway, system_id, declared, &created).await?;
    }

    info!(system_id, "Storage layout rebuilt");
    Ok(())
}

/// Delete logical volumes, then volume groups, then every partition.
async fn destroy_layout(gateway: &dyn Gateway, machine: &Machine) -> Result<(), ProviderError> {
    let system_id = machine.system_id.as_str();
    let groups = gateway
        .volume_groups(system_id)
        .await
        .during(|| format!("list volume groups of '{system_id}'"))?;

    for group in &groups {
        for device in machine
            .block_devices
            .iter()
            .filter(|d| d.belongs_to_volume_group(&group.name))
        {
            debug!(system_id, device = %device.name, "Deleting logical volume");
            gateway
                .delete_block_device(system_id, device.id)
                .await
                .during(|| format!("delete logical volume '{}'", device.name))?;
        }
    }

    for group in &groups {
        debug!(system_id, volume_group = %group.name, id = group.id, "Deleting volume group");
        gateway
            .delete_volume_group(system_id, group.id)
            .await
            .during(|| format!("delete volume group '{}'", group.name))?;
    }

    for device in machine
        .block_devices
        .iter()
        .filter(|d| d.kind == BlockDeviceKind::Physical)
    {
        for partition in &device.partitions {
            debug!(system_id, partition = %partition.path, "Deleting partition");
            gateway
                .delete_partition(system_id, device.id, partition.id)
                .await
                .during(|| format!("delete partition '{}'", partition.path))?;
        }
    }

    Ok(())
}

/// Create the declared partitions of one device, keyed by declared path.
async fn create_partitions(
    gateway: &dyn Gateway,
    system_id: &str,
    device: &BlockDevice,
    declared: &BlockDeviceConfig,
) -> Result<BTreeMap<String, Partition>, ProviderError> {
    let mut created = BTreeMap::new();

    for part in declared.ordered_partitions() {
        if !part.path.contains(declared.device_path()) {
            return Err(ProviderError::PartitionDeviceMismatch {
                partition: part.path.clone(),
                device: declared.device_path().to_string(),
            });
        }

        debug!(
            system_id,
            partition = %part.path,
            device = %device.name,
            size = part.size,
            "Creating partition"
        );
        let mut partition = gateway
            .create_partition(system_id, device.id, part.size)
            .await
            .during(|| format!("create partition '{}' on '{}'", part.path, device.name))?;

        // lvm-pv is claimed when the volume group is created.
        let fstype = part.fstype.as_deref().filter(|_| !part.is_lvm_pv());
        if let Some(fstype) = fstype {
            debug!(system_id, partition = %part.path, fstype, "Formatting partition");
            partition = gateway
                .format_partition(system_id, device.id, partition.id, fstype)
                .await
                .during(|| format!("format partition '{}' as '{fstype}'", part.path))?;

            if let Some(mountpoint) = part.mountpoint.as_deref() {
                debug!(system_id, partition = %part.path, mountpoint, "Mounting partition");
                partition = gateway
                    .mount_partition(system_id, device.id, partition.id, mountpoint)
                    .await
                    .during(|| format!("mount partition '{}' at '{mountpoint}'", part.path))?;
            }
        }

        created.insert(part.path.clone(), partition);
    }

    Ok(created)
}

async fn create_volume_group(
    gateway: &dyn Gateway,
    system_id: &str,
    declared: &VolumeGroupConfig,
    partitions: &BTreeMap<String, Partition>,
) -> Result<(), ProviderError> {
    let mut members = Vec::with_capacity(declared.devices.len());
    for path in &declared.devices {
        let partition = partitions
            .get(path)
            .ok_or_else(|| ProviderError::PartitionNotFound {
                partition: path.clone(),
                volume_group: declared.name.clone(),
            })?;
        if let Some(fs) = partition.filesystem.as_ref().filter(|fs| !fs.is_lvm_pv()) {
            return Err(ProviderError::PartitionNotLvm {
                partition: path.clone(),
                fstype: fs.fstype.clone(),
            });
        }
        members.push(partition.id);
    }

    info!(system_id, volume_group = %declared.name, "Creating volume group");
    let group = gateway
        .create_volume_group(system_id, &declared.name, members)
        .await
        .during(|| format!("create volume group '{}'", declared.name))?;

    for volume in &declared.logical_volumes {
        create_logical_volume(gateway, system_id, &group, volume).await?;
    }
    Ok(())
}

async fn create_logical_volume(
    gateway: &dyn Gateway,
    system_id: &str,
    group: &VolumeGroup,
    declared: &LogicalVolumeConfig,
) -> Result<(), ProviderError> {
    let short_name =
        declared
            .short_name(&group.name)
            .ok_or_else(|| ProviderError::LogicalVolumeName {
                name: declared.name.clone(),
                volume_group: group.name.clone(),
            })?;

    debug!(
        system_id,
        volume = %declared.name,
        volume_group = %group.name,
        "Creating logical volume"
    );
    let volume = gateway
        .create_logical_volume(system_id, group.id, short_name, declared.size)
        .await
        .during(|| format!("create logical volume '{}'", declared.name))?;

    let Some(fstype) = declared.fstype.as_deref() else {
        return Ok(());
    };
    debug!(system_id, volume = %declared.name, fstype, "Formatting logical volume");
    gateway
        .format_block_device(system_id, volume.id, fstype)
        .await
        .during(|| format!("format logical volume '{}' as '{fstype}'", declared.name))?;

    if let Some(mountpoint) = declared.mountpoint.as_deref() {
        debug!(system_id, volume = %declared.name, mountpoint, "Mounting logical volume");
        gateway
            .mount_block_device(system_id, volume.id, mountpoint)
            .await
            .during(|| format!("mount logical volume '{}' at '{mountpoint}'", declared.name))?;
    }
    Ok(())
}
