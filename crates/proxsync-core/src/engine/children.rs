// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Child collections: interfaces, IP addresses and virtual disks.
//!
//! Children are matched by stable key, never by position. Management-only
//! interfaces are left alone entirely. Failures here are warnings on the
//! owning entity unless the sink became unreachable.

use std::collections::BTreeSet;

use ipnetwork::IpNetwork;
use proxsync_sink::{
    DiskRecord, ExtensionTarget, InterfaceRecord, InterfaceRef, IpAddressRecord, ObjectId,
    ObjectKind, ParentRef, SinkError, SinkRecord,
};
use tracing::{debug, info, instrument};

use super::{Batch, SyncEngine, child_failure};
use crate::error::Result;
use crate::extension::apply_bag;
use crate::mapper::{MappedDisk, MappedInterface};

const ACCESS_MODE: &str = "access";

/// Outcome of the interface step, consumed by the address step.
pub(super) struct InterfacePlan {
    parent: ParentRef,
    /// Stored interface id with the addresses it should carry.
    kept: Vec<(ObjectId, Vec<IpNetwork>)>,
    /// Managed interfaces with no source counterpart.
    stale: Vec<InterfaceRecord>,
}

impl SyncEngine {
    #[instrument(skip_all, fields(parent = ?parent))]
    pub(super) async fn reconcile_interfaces(
        &self,
        batch: &mut Batch,
        parent: ParentRef,
        wanted: &[MappedInterface],
        warnings: &mut Vec<String>,
    ) -> Result<Option<InterfacePlan>> {
        let existing = match self.sink.list_interfaces(parent).await {
            Ok(existing) => existing,
            Err(err) => {
                child_failure(err, "interfaces".to_string(), warnings)?;
                return Ok(None);
            }
        };
        let target = ExtensionTarget::interface(parent.kind);
        let managed_fields = batch.managed(target);

        let mut plan = InterfacePlan {
            parent,
            kept: Vec::new(),
            stale: Vec::new(),
        };
        for want in wanted {
            let current = existing.iter().find(|i| i.name == want.key);
            if current.is_some_and(|c| c.mgmt_only) {
                debug!(interface = %want.key, "Leaving management-only interface alone");
                continue;
            }

            let mut desired = current
                .cloned()
                .unwrap_or_else(|| InterfaceRecord::new(&want.key));
            desired.enabled = want.enabled;
            if want.kind.is_some() {
                desired.kind = want.kind.clone();
            }
            if let Some(mac) = &want.mac {
                desired.mac = Some(mac.to_uppercase());
            }
            if let Some(description) = &want.description {
                desired.description = Some(description.trim().to_string()).filter(|d| !d.is_empty());
            }
            if parent.kind == ObjectKind::VirtualMachine {
                self.apply_vlan(batch, &mut desired, want, warnings).await?;
            }
            let mut bag = want.extensions.clone();
            batch.filter(target, &mut bag);
            apply_bag(&mut desired.custom_fields, &bag, &managed_fields);

            let id = match current {
                Some(current) if *current == desired => current.id,
                _ => match self.sink.upsert_interface(parent, &desired).await {
                    Ok(stored) => {
                        debug!(interface = %want.key, id = ?stored.id, "Wrote interface");
                        stored.id
                    }
                    Err(err) => {
                        child_failure(err, format!("interface {}", want.key), warnings)?;
                        None
                    }
                },
            };
            if let Some(id) = id {
                plan.kept.push((id, want.addresses.clone()));
            }
        }

        plan.stale = existing
            .into_iter()
            .filter(|i| !i.mgmt_only && !wanted.iter().any(|w| w.key == i.name))
            .collect();
        Ok(Some(plan))
    }

    async fn apply_vlan(
        &self,
        batch: &mut Batch,
        desired: &mut InterfaceRecord,
        want: &MappedInterface,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        match want.vlan {
            Some(vid) => match batch.vlan(self.sink.as_ref(), vid).await {
                Ok(vlan) => {
                    desired.mode = Some(ACCESS_MODE.to_string());
                    desired.untagged_vlan = Some(vlan);
                }
                Err(err) => child_failure(err, format!("VLAN {} for {}", vid, want.key), warnings)?,
            },
            None => {
                desired.mode = None;
                desired.untagged_vlan = None;
            }
        }
        Ok(())
    }

    /// Assign wanted addresses, pick primaries and release the rest.
    ///
    /// Addresses are never deleted, only unassigned.
    pub(super) async fn reconcile_addresses(
        &self,
        record: &mut SinkRecord,
        plan: &InterfacePlan,
        set_primaries: bool,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let kind = plan.parent.kind;
        let mut assigned: Vec<(ObjectId, IpNetwork)> = Vec::new();
        let mut released: BTreeSet<ObjectId> = BTreeSet::new();

        for (interface_id, addresses) in &plan.kept {
            let interface = InterfaceRef {
                kind,
                id: *interface_id,
            };
            let current = match self.sink.list_ip_addresses(interface).await {
                Ok(current) => current,
                Err(err) => {
                    child_failure(err, format!("addresses of interface {}", interface_id), warnings)?;
                    continue;
                }
            };

            for address in addresses {
                if let Some(id) = current
                    .iter()
                    .find(|ip| ip.address == *address)
                    .and_then(|ip| ip.id)
                {
                    assigned.push((id, *address));
                    continue;
                }
                match self.assign_address(interface, address).await {
                    Ok(id) => assigned.push((id, *address)),
                    Err(err) => child_failure(err, format!("address {}", address), warnings)?,
                }
            }

            released.extend(
                current
                    .iter()
                    .filter(|ip| !addresses.contains(&ip.address))
                    .filter_map(|ip| ip.id),
            );
        }

        for stale in &plan.stale {
            let Some(id) = stale.id else { continue };
            match self.sink.list_ip_addresses(InterfaceRef { kind, id }).await {
                Ok(ips) => released.extend(ips.iter().filter_map(|ip| ip.id)),
                Err(err) => child_failure(err, format!("addresses of interface {}", stale.name), warnings)?,
            }
        }

        released.retain(|id| !assigned.iter().any(|(kept, _)| kept == id));

        if set_primaries {
            let keep = |current: Option<ObjectId>| current.filter(|id| !released.contains(id));
            let primary_ip4 = assigned
                .iter()
                .find(|(_, a)| a.is_ipv4())
                .map(|(id, _)| *id)
                .or_else(|| keep(record.primary_ip4));
            let primary_ip6 = assigned
                .iter()
                .find(|(_, a)| a.is_ipv6())
                .map(|(id, _)| *id)
                .or_else(|| keep(record.primary_ip6));

            if primary_ip4 != record.primary_ip4 || primary_ip6 != record.primary_ip6 {
                let mut updated = record.clone();
                updated.primary_ip4 = primary_ip4;
                updated.primary_ip6 = primary_ip6;
                match self.sink.upsert_record(&updated).await {
                    Ok(stored) => {
                        debug!(?primary_ip4, ?primary_ip6, "Updated primary addresses");
                        *record = stored;
                    }
                    Err(err) => child_failure(err, "primary addresses".to_string(), warnings)?,
                }
            }
        }

        for id in released {
            if record.primary_ip4 == Some(id) || record.primary_ip6 == Some(id) {
                continue;
            }
            if let Err(err) = self.sink.unassign_ip_address(id).await {
                child_failure(err, format!("unassign address {}", id), warnings)?;
            }
        }
        Ok(())
    }

    /// Reuse the address object if it exists anywhere, otherwise create it.
    async fn assign_address(
        &self,
        interface: InterfaceRef,
        address: &IpNetwork,
    ) -> proxsync_sink::Result<ObjectId> {
        let mut ip = self
            .sink
            .find_ip_address(address)
            .await?
            .unwrap_or(IpAddressRecord {
                id: None,
                address: *address,
                assigned: None,
            });
        ip.address = *address;
        ip.assigned = Some(interface);
        let stored = self.sink.upsert_ip_address(&ip).await?;
        debug!(%address, id = ?stored.id, "Assigned address");
        stored.id.ok_or_else(|| {
            SinkError::UnexpectedResponse(format!("address {} stored without id", address))
        })
    }

    pub(super) async fn remove_stale_interfaces(
        &self,
        plan: &InterfacePlan,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        for stale in &plan.stale {
            let Some(id) = stale.id else { continue };
            match self.sink.delete_interface(plan.parent.kind, id).await {
                Ok(()) => info!(interface = %stale.name, "Removed interface"),
                Err(err) => child_failure(err, format!("remove interface {}", stale.name), warnings)?,
            }
        }
        Ok(())
    }

    /// Mirror the guest's disks, keyed by slot name.
    ///
    /// Disks without a known size are reported and left as they are.
    pub(super) async fn reconcile_disks(
        &self,
        batch: &mut Batch,
        vm: ObjectId,
        wanted: &[MappedDisk],
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let existing = match self.sink.list_disks(vm).await {
            Ok(existing) => existing,
            Err(err) => return child_failure(err, "disks".to_string(), warnings),
        };
        let target = ExtensionTarget::VirtualDisk;
        let managed_fields = batch.managed(target);

        for want in wanted {
            let current = existing.iter().find(|d| d.name == want.name);
            let Some(size_mb) = want.size_mb else {
                warnings.push(format!("disk {} has no known size; left unchanged", want.name));
                continue;
            };

            let mut desired = current.cloned().unwrap_or_else(|| DiskRecord {
                id: None,
                name: want.name.clone(),
                size_mb,
                description: None,
                custom_fields: Default::default(),
            });
            desired.size_mb = size_mb;
            desired.description = want.description.clone();
            let mut bag = want.extensions.clone();
            batch.filter(target, &mut bag);
            apply_bag(&mut desired.custom_fields, &bag, &managed_fields);

            if current == Some(&desired) {
                continue;
            }
            match self.sink.upsert_disk(vm, &desired).await {
                Ok(stored) => debug!(disk = %want.name, id = ?stored.id, "Wrote disk"),
                Err(err) => child_failure(err, format!("disk {}", want.name), warnings)?,
            }
        }

        for stale in existing
            .iter()
            .filter(|d| !wanted.iter().any(|w| w.name == d.name))
        {
            let Some(id) = stale.id else { continue };
            match self.sink.delete_disk(id).await {
                Ok(()) => info!(disk = %stale.name, "Removed disk"),
                Err(err) => child_failure(err, format!("remove disk {}", stale.name), warnings)?,
            }
        }
        Ok(())
    }
}
