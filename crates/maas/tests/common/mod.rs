//! In-memory MAAS used by the integration tests.
//!
//! `FakeGateway` keeps machines, volume groups, spaces and tags in a mutex
//! and applies every call the way MAAS would. Status transitions are driven
//! by queues consumed on each `get_machine`.

#![allow(dead_code)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use maas::gateway::{
    AllocateArgs, CommissionArgs, CreateBondArgs, DeployArgs, Gateway, GatewayError, MachineUpdate,
    ReleaseArgs,
};
use maas::model::{
    BlockDevice, BlockDeviceKind, BondParameters, FileSystem, Interface, InterfaceKind, Link,
    LinkMode, Machine, MachineStatus, Partition, PowerParameters, Space, Subnet, Tag, VolumeGroup,
};
use maas::settings::Endpoint;
use maas::GatewayConnector;

pub const SYSTEM_ID: &str = "4y3h7n";
pub const BOOT_MAC: &str = "52:54:00:12:34:56";

#[derive(Debug, Default)]
pub struct FakeState {
    pub machines: BTreeMap<String, Machine>,
    pub volume_groups: BTreeMap<String, Vec<VolumeGroup>>,
    pub spaces: Vec<Space>,
    pub tags: BTreeMap<String, Tag>,
    /// Statuses reported by the next `get_machine` calls, per machine.
    pub transitions: BTreeMap<String, VecDeque<MachineStatus>>,
    /// MAC lookups that still miss before the machine shows up.
    pub hidden_lookups: usize,
    /// Operations that fail with an API error.
    pub failing: BTreeSet<&'static str>,
    /// Every call, in order.
    pub calls: Vec<String>,
    next_id: u64,
}

impl FakeState {
    fn record(&mut self, op: &'static str, detail: String) -> Result<(), GatewayError> {
        self.calls.push(format!("{op} {detail}").trim_end().to_string());
        if self.failing.contains(op) {
            return Err(GatewayError::Api {
                status: 500,
                message: format!("{op} failed"),
            });
        }
        Ok(())
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        1000 + self.next_id
    }

    fn machine_mut(&mut self, system_id: &str) -> Result<&mut Machine, GatewayError> {
        self.machines
            .get_mut(system_id)
            .ok_or_else(|| GatewayError::NotFound(system_id.to_string()))
    }

    fn device_mut(
        &mut self,
        system_id: &str,
        device_id: u64,
    ) -> Result<&mut BlockDevice, GatewayError> {
        self.machine_mut(system_id)?
            .block_devices
            .iter_mut()
            .find(|d| d.id == device_id)
            .ok_or_else(|| GatewayError::NotFound(format!("block device {device_id}")))
    }

    fn partition_mut(
        &mut self,
        system_id: &str,
        device_id: u64,
        partition_id: u64,
    ) -> Result<&mut Partition, GatewayError> {
        self.device_mut(system_id, device_id)?
            .partitions
            .iter_mut()
            .find(|p| p.id == partition_id)
            .ok_or_else(|| GatewayError::NotFound(format!("partition {partition_id}")))
    }

    fn interface_mut(
        &mut self,
        system_id: &str,
        interface_id: u64,
    ) -> Result<&mut Interface, GatewayError> {
        self.machine_mut(system_id)?
            .interfaces
            .iter_mut()
            .find(|i| i.id == interface_id)
            .ok_or_else(|| GatewayError::NotFound(format!("interface {interface_id}")))
    }

    fn queue(&mut self, system_id: &str, statuses: &[MachineStatus]) {
        self.transitions
            .entry(system_id.to_string())
            .or_default()
            .extend(statuses.iter().copied());
    }
}

#[derive(Debug, Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new(state: FakeState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn machine(&self, system_id: &str) -> Machine {
        self.state().machines[system_id].clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn get_machine(&self, system_id: &str) -> Result<Machine, GatewayError> {
        let mut state = self.state();
        state.record("get_machine", system_id.to_string())?;
        let next = state
            .transitions
            .get_mut(system_id)
            .and_then(VecDeque::pop_front);
        let machine = state.machine_mut(system_id)?;
        if let Some(status) = next {
            machine.status = status;
        }
        Ok(machine.clone())
    }

    async fn find_machine_by_mac(&self, mac_address: &str) -> Result<Machine, GatewayError> {
        let mut state = self.state();
        state.record("find_machine_by_mac", mac_address.to_string())?;
        if state.hidden_lookups > 0 {
            state.hidden_lookups -= 1;
            return Err(GatewayError::NotFound(mac_address.to_string()));
        }
        state
            .machines
            .values()
            .find(|m| m.boot_mac.as_deref() == Some(mac_address))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(mac_address.to_string()))
    }

    async fn allocate_machine(&self, args: &AllocateArgs) -> Result<Machine, GatewayError> {
        let mut state = self.state();
        state.record("allocate_machine", format!("{:?}", args.hostname))?;
        let machine = state
            .machines
            .values_mut()
            .find(|m| {
                m.status == MachineStatus::Ready
                    && args.hostname.as_ref().map_or(true, |h| *h == m.hostname)
            })
            .ok_or_else(|| GatewayError::Api {
                status: 409,
                message: "no available machine matches constraints".into(),
            })?;
        machine.status = MachineStatus::Allocated;
        Ok(machine.clone())
    }

    async fn update_machine(
        &self,
        system_id: &str,
        update: &MachineUpdate,
    ) -> Result<Machine, GatewayError> {
        let mut state = self.state();
        state.record("update_machine", system_id.to_string())?;
        let machine = state.machine_mut(system_id)?;
        if let Some(hostname) = &update.hostname {
            machine.hostname.clone_from(hostname);
        }
        if let Some(domain) = &update.domain {
            machine.domain.clone_from(domain);
        }
        machine.fqdn = format!("{}.{}", machine.hostname, machine.domain);
        if let Some(power_type) = &update.power_type {
            machine.power = Some(PowerParameters {
                power_type: power_type.clone(),
                parameters: update.power_parameters.clone(),
            });
        }
        Ok(machine.clone())
    }

    async fn commission_machine(
        &self,
        system_id: &str,
        args: &CommissionArgs,
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.record("commission_machine", format!("{system_id} ssh={}", args.enable_ssh))?;
        state.machine_mut(system_id)?.status = MachineStatus::Commissioning;
        state.queue(
            system_id,
            &[MachineStatus::Commissioning, MachineStatus::Testing, MachineStatus::Ready],
        );
        Ok(())
    }

    async fn deploy_machine(&self, system_id: &str, args: &DeployArgs) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.record(
            "deploy_machine",
            format!("{system_id} {}", args.distro_series.as_deref().unwrap_or("default")),
        )?;
        let machine = state.machine_mut(system_id)?;
        machine.status = MachineStatus::Deploying;
        machine.osystem = Some("ubuntu".into());
        machine.distro_series.clone_from(&args.distro_series);
        state.queue(system_id, &[MachineStatus::Deploying, MachineStatus::Deployed]);
        Ok(())
    }

    async fn release_machines(&self, args: &ReleaseArgs) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.record(
            "release_machines",
            format!("{} erase={}", args.system_ids.join(","), args.erase),
        )?;
        for system_id in &args.system_ids {
            state.machine_mut(system_id)?.status = MachineStatus::Releasing;
            let mut path = vec![MachineStatus::Releasing];
            if args.erase {
                path.push(MachineStatus::DiskErasing);
            }
            path.push(MachineStatus::Ready);
            state.queue(system_id, &path);
        }
        Ok(())
    }

    async fn delete_block_device(
        &self,
        system_id: &str,
        device_id: u64,
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.record("delete_block_device", device_id.to_string())?;
        let machine = state.machine_mut(system_id)?;
        let before = machine.block_devices.len();
        machine.block_devices.retain(|d| d.id != device_id);
        if machine.block_devices.len() == before {
            return Err(GatewayError::NotFound(format!("block device {device_id}")));
        }
        Ok(())
    }

    async fn create_partition(
        &self,
        system_id: &str,
        device_id: u64,
        size: u64,
    ) -> Result<Partition, GatewayError> {
        let mut state = self.state();
        let name = state.device_mut(system_id, device_id)?.name.clone();
        state.record("create_partition", format!("{name} {size}"))?;
        let id = state.next_id();
        let device = state.device_mut(system_id, device_id)?;
        let partition = Partition {
            id,
            device_id,
            path: format!("/dev/{name}{}", device.partitions.len() + 1),
            size,
            filesystem: None,
        };
        device.partitions.push(partition.clone());
        Ok(partition)
    }

    async fn delete_partition(
        &self,
        system_id: &str,
        device_id: u64,
        partition_id: u64,
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.record("delete_partition", partition_id.to_string())?;
        let device = state.device_mut(system_id, device_id)?;
        device.partitions.retain(|p| p.id != partition_id);
        Ok(())
    }

    async fn format_partition(
        &self,
        system_id: &str,
        device_id: u64,
        partition_id: u64,
        fstype: &str,
    ) -> Result<Partition, GatewayError> {
        let mut state = self.state();
        state.record("format_partition", format!("{partition_id} {fstype}"))?;
        let partition = state.partition_mut(system_id, device_id, partition_id)?;
        partition.filesystem = Some(FileSystem {
            fstype: fstype.to_string(),
            mount_point: None,
        });
        Ok(partition.clone())
    }

    async fn mount_partition(
        &self,
        system_id: &str,
        device_id: u64,
        partition_id: u64,
        mount_point: &str,
    ) -> Result<Partition, GatewayError> {
        let mut state = self.state();
        state.record("mount_partition", format!("{partition_id} {mount_point}"))?;
        let partition = state.partition_mut(system_id, device_id, partition_id)?;
        let fs = partition.filesystem.as_mut().ok_or_else(|| GatewayError::Api {
            status: 400,
            message: "partition is not formatted".into(),
        })?;
        fs.mount_point = Some(mount_point.to_string());
        Ok(partition.clone())
    }

    async fn volume_groups(&self, system_id: &str) -> Result<Vec<VolumeGroup>, GatewayError> {
        let mut state = self.state();
        state.record("volume_groups", system_id.to_string())?;
        Ok(state.volume_groups.get(system_id).cloned().unwrap_or_default())
    }

    async fn create_volume_group(
        &self,
        system_id: &str,
        name: &str,
        partition_ids: Vec<u64>,
    ) -> Result<VolumeGroup, GatewayError> {
        let mut state = self.state();
        state.record("create_volume_group", format!("{name} {partition_ids:?}"))?;
        let id = state.next_id();
        let machine = state.machine_mut(system_id)?;
        let mut group = VolumeGroup {
            id,
            name: name.to_string(),
            uuid: None,
            size: 0,
            devices: vec![],
        };
        for partition in machine
            .block_devices
            .iter_mut()
            .flat_map(|d| d.partitions.iter_mut())
            .filter(|p| partition_ids.contains(&p.id))
        {
            partition.filesystem = Some(FileSystem {
                fstype: "lvm-pv".into(),
                mount_point: None,
            });
            group.size += partition.size;
            group.devices.push(partition.path.clone());
        }
        state
            .volume_groups
            .entry(system_id.to_string())
            .or_default()
            .push(group.clone());
        Ok(group)
    }

    async fn delete_volume_group(
        &self,
        system_id: &str,
        group_id: u64,
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.record("delete_volume_group", group_id.to_string())?;
        let groups = state.volume_groups.entry(system_id.to_string()).or_default();
        groups.retain(|g| g.id != group_id);
        Ok(())
    }

    async fn create_logical_volume(
        &self,
        system_id: &str,
        group_id: u64,
        name: &str,
        size: u64,
    ) -> Result<BlockDevice, GatewayError> {
        let mut state = self.state();
        state.record("create_logical_volume", format!("{name} {size}"))?;
        let group_name = state
            .volume_groups
            .get(system_id)
            .and_then(|groups| groups.iter().find(|g| g.id == group_id))
            .map(|g| g.name.clone())
            .ok_or_else(|| GatewayError::NotFound(format!("volume group {group_id}")))?;
        let id = state.next_id();
        let full_name = format!("{group_name}-{name}");
        let device = BlockDevice {
            id,
            name: full_name.clone(),
            kind: BlockDeviceKind::Virtual,
            path: format!("/dev/disk/by-dname/{full_name}"),
            id_path: None,
            uuid: None,
            model: None,
            size,
            block_size: 4096,
            partitions: vec![],
            filesystem: None,
        };
        state.machine_mut(system_id)?.block_devices.push(device.clone());
        Ok(device)
    }

    async fn format_block_device(
        &self,
        system_id: &str,
        device_id: u64,
        fstype: &str,
    ) -> Result<BlockDevice, GatewayError> {
        let mut state = self.state();
        state.record("format_block_device", format!("{device_id} {fstype}"))?;
        let device = state.device_mut(system_id, device_id)?;
        device.filesystem = Some(FileSystem {
            fstype: fstype.to_string(),
            mount_point: None,
        });
        Ok(device.clone())
    }

    async fn mount_block_device(
        &self,
        system_id: &str,
        device_id: u64,
        mount_point: &str,
    ) -> Result<BlockDevice, GatewayError> {
        let mut state = self.state();
        state.record("mount_block_device", format!("{device_id} {mount_point}"))?;
        let device = state.device_mut(system_id, device_id)?;
        let fs = device.filesystem.as_mut().ok_or_else(|| GatewayError::Api {
            status: 400,
            message: "block device is not formatted".into(),
        })?;
        fs.mount_point = Some(mount_point.to_string());
        Ok(device.clone())
    }

    async fn delete_interface(
        &self,
        system_id: &str,
        interface_id: u64,
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.record("delete_interface", interface_id.to_string())?;
        let machine = state.machine_mut(system_id)?;
        let name = machine
            .interfaces
            .iter()
            .find(|i| i.id == interface_id)
            .map(|i| i.name.clone())
            .ok_or_else(|| GatewayError::NotFound(format!("interface {interface_id}")))?;
        machine.interfaces.retain(|i| i.id != interface_id);
        for iface in &mut machine.interfaces {
            iface.children.retain(|c| *c != name);
        }
        Ok(())
    }

    async fn create_bond(
        &self,
        system_id: &str,
        args: &CreateBondArgs,
    ) -> Result<Interface, GatewayError> {
        let mut state = self.state();
        state.record("create_bond", format!("{} {:?}", args.name, args.parents))?;
        let id = state.next_id();
        let machine = state.machine_mut(system_id)?;
        let mut parents = Vec::new();
        for parent in machine
            .interfaces
            .iter_mut()
            .filter(|i| args.parents.contains(&i.id))
        {
            parent.children.push(args.name.clone());
            parents.push(parent.name.clone());
        }
        let bond = Interface {
            id,
            name: args.name.clone(),
            kind: InterfaceKind::Bond,
            mac_address: args.mac_address.clone(),
            links: vec![],
            parents,
            children: vec![],
            bond: Some(BondParameters {
                mode: args.mode.clone(),
                miimon: args.miimon,
                downdelay: args.downdelay,
                updelay: args.updelay,
                lacp_rate: args.lacp_rate.clone(),
                xmit_hash_policy: args.xmit_hash_policy.clone(),
            }),
        };
        machine.interfaces.push(bond.clone());
        Ok(bond)
    }

    async fn link_subnet(
        &self,
        system_id: &str,
        interface_id: u64,
        subnet_id: u64,
        mode: LinkMode,
    ) -> Result<Interface, GatewayError> {
        let mut state = self.state();
        state.record("link_subnet", format!("{interface_id} {subnet_id} {mode}"))?;
        let subnet = state
            .spaces
            .iter()
            .flat_map(|s| s.subnets.iter())
            .find(|s| s.id == subnet_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("subnet {subnet_id}")))?;
        let id = state.next_id();
        let iface = state.interface_mut(system_id, interface_id)?;
        iface.links.push(Link {
            id,
            mode,
            subnet: Some(subnet),
        });
        Ok(iface.clone())
    }

    async fn unlink_subnet(
        &self,
        system_id: &str,
        interface_id: u64,
        link_id: u64,
    ) -> Result<Interface, GatewayError> {
        let mut state = self.state();
        state.record("unlink_subnet", format!("{interface_id} {link_id}"))?;
        let iface = state.interface_mut(system_id, interface_id)?;
        iface.links.retain(|l| l.id != link_id);
        Ok(iface.clone())
    }

    async fn spaces(&self) -> Result<Vec<Space>, GatewayError> {
        let mut state = self.state();
        state.record("spaces", String::new())?;
        Ok(state.spaces.clone())
    }

    async fn get_tag(&self, name: &str) -> Result<Tag, GatewayError> {
        let mut state = self.state();
        state.record("get_tag", name.to_string())?;
        state
            .tags
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))
    }

    async fn create_tag(&self, name: &str, comment: &str) -> Result<Tag, GatewayError> {
        let mut state = self.state();
        state.record("create_tag", format!("{name} {comment}"))?;
        let tag = Tag {
            name: name.to_string(),
            comment: comment.to_string(),
            definition: String::new(),
        };
        state.tags.insert(name.to_string(), tag.clone());
        Ok(tag)
    }

    async fn add_tag_to_machine(&self, tag: &str, system_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.record("add_tag_to_machine", format!("{tag} {system_id}"))?;
        if !state.tags.contains_key(tag) {
            return Err(GatewayError::NotFound(tag.to_string()));
        }
        let machine = state.machine_mut(system_id)?;
        if !machine.tags.iter().any(|t| t == tag) {
            machine.tags.push(tag.to_string());
        }
        Ok(())
    }

    async fn remove_tag_from_machine(
        &self,
        tag: &str,
        system_id: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.record("remove_tag_from_machine", format!("{tag} {system_id}"))?;
        let machine = state.machine_mut(system_id)?;
        let before = machine.tags.len();
        machine.tags.retain(|t| t != tag);
        if machine.tags.len() == before {
            return Err(GatewayError::NotFound(tag.to_string()));
        }
        Ok(())
    }
}

/// Hands out fake gateways keyed by API key and remembers every endpoint.
#[derive(Default)]
pub struct FakeConnector {
    pub gateways: BTreeMap<String, Arc<FakeGateway>>,
    pub endpoints: Mutex<Vec<Endpoint>>,
}

impl GatewayConnector for FakeConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Gateway>, GatewayError> {
        self.endpoints.lock().unwrap().push(endpoint.clone());
        let key = endpoint.api_key.clone().unwrap_or_default();
        self.gateways
            .get(&key)
            .map(|g| Arc::clone(g) as Arc<dyn Gateway>)
            .ok_or_else(|| GatewayError::Api {
                status: 401,
                message: format!("unknown key '{key}'"),
            })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn disk(id: u64, name: &str, size: u64) -> BlockDevice {
    BlockDevice {
        id,
        name: name.to_string(),
        kind: BlockDeviceKind::Physical,
        path: format!("/dev/disk/by-dname/{name}"),
        id_path: Some(format!("/dev/disk/by-id/wwn-{name}")),
        uuid: None,
        model: Some("QEMU HARDDISK".into()),
        size,
        block_size: 512,
        partitions: vec![],
        filesystem: None,
    }
}

pub fn nic(id: u64, name: &str, mac: &str) -> Interface {
    Interface {
        id,
        name: name.to_string(),
        kind: InterfaceKind::Physical,
        mac_address: Some(mac.to_string()),
        links: vec![],
        parents: vec![],
        children: vec![],
        bond: None,
    }
}

/// A freshly enlisted machine with two disks and two NICs.
pub fn new_machine(status: MachineStatus) -> Machine {
    Machine {
        system_id: SYSTEM_ID.to_string(),
        hostname: "wise-gopher".into(),
        domain: "maas".into(),
        fqdn: "wise-gopher.maas".into(),
        architecture: "amd64/generic".into(),
        status,
        boot_mac: Some(BOOT_MAC.to_string()),
        osystem: None,
        distro_series: None,
        block_devices: vec![disk(1, "sda", 100_000_000_000), disk(2, "sdb", 50_000_000_000)],
        interfaces: vec![nic(10, "eth0", BOOT_MAC), nic(11, "eth1", "52:54:00:12:34:57")],
        tags: vec![],
        power: None,
    }
}

pub fn subnet(id: u64, cidr: &str, space: &str) -> Subnet {
    Subnet {
        id,
        cidr: cidr.to_string(),
        name: cidr.to_string(),
        space: space.to_string(),
    }
}

pub fn default_spaces() -> Vec<Space> {
    vec![
        Space {
            id: 1,
            name: "public".into(),
            subnets: vec![subnet(20, "10.0.0.0/24", "public")],
        },
        Space {
            id: 2,
            name: "internal".into(),
            subnets: vec![subnet(21, "192.168.10.0/24", "internal")],
        },
    ]
}

/// State with one machine in `status` and the default spaces.
pub fn state_with(machine: Machine) -> FakeState {
    let mut state = FakeState {
        spaces: default_spaces(),
        ..FakeState::default()
    };
    state.machines.insert(machine.system_id.clone(), machine);
    state
}
