//! Network reconciliation: bonds and subnet links.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::config::InterfaceConfig;
use crate::error::{GatewayResultExt, ProviderError};
use crate::gateway::Gateway;
use crate::model::{Interface, InterfaceKind, Machine, Space, Subnet};

/// Map every subnet CIDR to its subnet across all spaces.
///
/// A CIDR present in several spaces resolves to whichever space comes last.
#[must_use]
pub fn subnets_by_cidr(spaces: &[Space]) -> BTreeMap<String, Subnet> {
    let mut subnets = BTreeMap::new();
    for space in spaces {
        for subnet in &space.subnets {
            debug!(space = %space.name, cidr = %subnet.cidr, "Found subnet");
            if let Some(previous) = subnets.insert(subnet.cidr.clone(), subnet.clone()) {
                warn!(
                    cidr = %subnet.cidr,
                    replaced_space = %previous.space,
                    space = %space.name,
                    "CIDR exists in several spaces, using the later one"
                );
            }
        }
    }
    subnets
}

/// Delete all bonds of `machine`, recreate the declared ones and relink
/// interfaces to their declared subnets.
///
/// # Errors
/// Aborts on the first unresolvable name or gateway failure.
pub async fn reconcile_interfaces(
    gateway: &dyn Gateway,
    machine: &Machine,
    declared: &[InterfaceConfig],
) -> Result<(), ProviderError> {
    let system_id = machine.system_id.as_str();
    let spaces = gateway
        .spaces()
        .await
        .during(|| "list spaces".to_string())?;
    let subnets = subnets_by_cidr(&spaces);

    info!(system_id, interfaces = declared.len(), "Rebuilding network layout");

    let mut by_name: BTreeMap<String, Interface> = BTreeMap::new();
    for iface in &machine.interfaces {
        if iface.kind == InterfaceKind::Bond {
            debug!(system_id, interface = %iface.name, "Deleting bond");
            gateway
                .delete_interface(system_id, iface.id)
                .await
                .during(|| format!("delete bond '{}'", iface.name))?;
            continue;
        }
        by_name.insert(iface.name.clone(), iface.clone());
    }

    for wanted in declared {
        if !by_name.contains_key(&wanted.name) {
            if let Some(bond) = &wanted.bond {
                let parents = bond
                    .parents
                    .iter()
                    .map(|parent| {
                        by_name.get(parent).map(|p| p.id).ok_or_else(|| {
                            ProviderError::InterfaceNotFound {
                                interface: parent.clone(),
                                system_id: system_id.to_string(),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                info!(system_id, bond = %wanted.name, parents = ?bond.parents, "Creating bond");
                let created = gateway
                    .create_bond(system_id, &bond.to_create_args(&wanted.name, parents))
                    .await
                    .during(|| format!("create bond '{}'", wanted.name))?;
                by_name.insert(wanted.name.clone(), created);
            } else {
                debug!(system_id, interface = %wanted.name, "Interface does not exist yet");
            }
        }

        let Some(cidr) = wanted.subnet.as_deref() else {
            continue;
        };
        let subnet = subnets
            .get(cidr)
            .ok_or_else(|| ProviderError::SubnetNotFound(cidr.to_string()))?;
        let existing = by_name
            .get(&wanted.name)
            .ok_or_else(|| ProviderError::InterfaceNotFound {
                interface: wanted.name.clone(),
                system_id: system_id.to_string(),
            })?;

        for link in existing.links.iter().filter(|l| l.subnet.is_some()) {
            debug!(system_id, interface = %wanted.name, link_id = link.id, "Unlinking subnet");
            gateway
                .unlink_subnet(system_id, existing.id, link.id)
                .await
                .during(|| format!("unlink interface '{}'", wanted.name))?;
        }

        info!(system_id, interface = %wanted.name, cidr, mode = %wanted.mode, "Linking subnet");
        let linked = gateway
            .link_subnet(system_id, existing.id, subnet.id, wanted.mode)
            .await
            .during(|| format!("link interface '{}' to {cidr}", wanted.name))?;
        by_name.insert(wanted.name.clone(), linked);
    }

    Ok(())
}
