// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Extension attributes written by the engine.
//!
//! [`definitions`] lists every custom field the mapper may emit. Before a
//! batch the engine learns which of them the sink actually has
//! ([`SupportedExtensions`]) and drops the rest from every bag it writes.

use std::collections::{BTreeMap, BTreeSet};

use proxsync_sink::{ExtensionAttribute, ExtensionTarget, FieldType, fields};
use serde_json::Value;

/// Named extension values for one sink object.
pub type ExtensionBag = BTreeMap<String, Value>;

/// Custom field names.
pub mod names {
    pub use proxsync_sink::fields::{LAST_SYNC, NODE_LAST_SYNC, SOURCE_ID, SYNC_STATE};

    pub const CPU_SOCKETS: &str = "cpu_sockets";
    pub const MIN_MEMORY_MB: &str = "min_memory_mb";
    pub const QEMU_CPU_TYPE: &str = "qemu_cpu_type";
    pub const QEMU_BIOS_TYPE: &str = "qemu_bios_type";
    pub const QEMU_MACHINE_TYPE: &str = "qemu_machine_type";
    pub const QEMU_NUMA_ENABLED: &str = "qemu_numa_enabled";
    pub const QEMU_CORES_PER_SOCKET: &str = "qemu_cores_per_socket";
    pub const QEMU_BOOT_ORDER: &str = "qemu_boot_order";
    pub const LXC_ARCHITECTURE: &str = "lxc_architecture";
    pub const LXC_UNPRIVILEGED: &str = "lxc_unprivileged";
    pub const LXC_FEATURES: &str = "lxc_features";
    pub const LXC_ROOTFS_STORAGE: &str = "lxc_rootfs_storage";
    pub const BOOT_DISK_STORAGE: &str = "boot_disk_storage";
    pub const BOOT_DISK_FORMAT: &str = "boot_disk_format";

    pub const BRIDGE: &str = "bridge";
    pub const INTERFACE_MODEL: &str = "interface_model";

    pub const DISK_STORAGE: &str = "disk_storage";
    pub const DISK_FORMAT: &str = "disk_format";
    pub const DISK_MOUNT_POINT: &str = "disk_mount_point";
    pub const DISK_BOOT: &str = "disk_boot";

    pub const PVE_VERSION: &str = "proxmox_pve_version";
    pub const CPU_MODEL: &str = "proxmox_cpu_model";
    pub const NODE_CPU_SOCKETS: &str = "proxmox_cpu_sockets";
    pub const CPU_CORES_TOTAL: &str = "proxmox_cpu_cores_total";
    pub const MEMORY_TOTAL_GB: &str = "proxmox_memory_total_gb";
    pub const ROOTFS_TOTAL_GB: &str = "proxmox_rootfs_total_gb";

    pub const INTERFACE_TYPE: &str = "proxmox_interface_type";
    pub const INTERFACE_PORTS: &str = "proxmox_interface_ports";
}

/// Fields rewritten on every run; ignored by change detection.
pub const STAMP_FIELDS: &[&str] = &[fields::SYNC_STATE, fields::LAST_SYNC, fields::NODE_LAST_SYNC];

fn attr(name: &str, label: &str, field_type: FieldType, target: ExtensionTarget) -> ExtensionAttribute {
    ExtensionAttribute::new(name, label, field_type).applies_to(target)
}

/// Every extension attribute the mapper may emit.
pub fn definitions() -> Vec<ExtensionAttribute> {
    use ExtensionTarget::*;
    use FieldType::*;
    use names::*;

    vec![
        attr(SOURCE_ID, "Proxmox VM ID", Integer, VirtualMachine),
        attr(SYNC_STATE, "Sync status", Text, VirtualMachine),
        attr(LAST_SYNC, "Last sync", Text, VirtualMachine),
        attr(CPU_SOCKETS, "CPU sockets", Integer, VirtualMachine),
        attr(MIN_MEMORY_MB, "Minimum memory (MB)", Integer, VirtualMachine),
        attr(QEMU_CPU_TYPE, "QEMU CPU type", Text, VirtualMachine),
        attr(QEMU_BIOS_TYPE, "QEMU BIOS", Text, VirtualMachine),
        attr(QEMU_MACHINE_TYPE, "QEMU machine type", Text, VirtualMachine),
        attr(QEMU_NUMA_ENABLED, "QEMU NUMA", Boolean, VirtualMachine),
        attr(QEMU_CORES_PER_SOCKET, "QEMU cores per socket", Integer, VirtualMachine),
        attr(QEMU_BOOT_ORDER, "QEMU boot order", Text, VirtualMachine),
        attr(LXC_ARCHITECTURE, "LXC architecture", Text, VirtualMachine),
        attr(LXC_UNPRIVILEGED, "LXC unprivileged", Boolean, VirtualMachine),
        attr(LXC_FEATURES, "LXC features", Text, VirtualMachine),
        attr(LXC_ROOTFS_STORAGE, "LXC rootfs storage", Text, VirtualMachine),
        attr(BOOT_DISK_STORAGE, "Boot disk storage", Text, VirtualMachine),
        attr(BOOT_DISK_FORMAT, "Boot disk format", Text, VirtualMachine),
        attr(BRIDGE, "Bridge", Text, VmInterface),
        attr(INTERFACE_MODEL, "NIC model", Text, VmInterface),
        attr(DISK_STORAGE, "Storage", Text, VirtualDisk),
        attr(DISK_FORMAT, "Format", Text, VirtualDisk),
        attr(DISK_MOUNT_POINT, "Mount point", Text, VirtualDisk),
        attr(DISK_BOOT, "Boot disk", Boolean, VirtualDisk),
        attr(PVE_VERSION, "PVE version", Text, Device),
        attr(CPU_MODEL, "CPU model", Text, Device),
        attr(NODE_CPU_SOCKETS, "CPU sockets", Integer, Device),
        attr(CPU_CORES_TOTAL, "CPU cores", Integer, Device),
        attr(MEMORY_TOTAL_GB, "Memory (GB)", Integer, Device),
        attr(ROOTFS_TOTAL_GB, "Root filesystem (GB)", Integer, Device),
        attr(NODE_LAST_SYNC, "Last sync", Text, Device),
        attr(INTERFACE_TYPE, "Proxmox interface type", Text, DeviceInterface),
        attr(INTERFACE_PORTS, "Member ports", Text, DeviceInterface),
    ]
}

/// Extension attributes the sink has, by name and object type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportedExtensions {
    targets: BTreeMap<String, BTreeSet<ExtensionTarget>>,
}

impl SupportedExtensions {
    pub fn from_attributes<'a>(attributes: impl IntoIterator<Item = &'a ExtensionAttribute>) -> Self {
        let mut targets: BTreeMap<String, BTreeSet<ExtensionTarget>> = BTreeMap::new();
        for attribute in attributes {
            targets
                .entry(attribute.name.clone())
                .or_default()
                .extend(attribute.object_types.iter().copied());
        }
        Self { targets }
    }

    pub fn supports(&self, name: &str, target: ExtensionTarget) -> bool {
        self.targets
            .get(name)
            .is_some_and(|types| types.contains(&target))
    }

    /// Remove unsupported entries from `bag`, returning their names.
    pub fn retain(&self, target: ExtensionTarget, bag: &mut ExtensionBag) -> Vec<String> {
        let dropped: Vec<String> = bag
            .keys()
            .filter(|name| !self.supports(name, target))
            .cloned()
            .collect();
        for name in &dropped {
            bag.remove(name);
        }
        dropped
    }

    /// Defined, supported, non-stamp names the engine owns on `target`.
    pub fn managed(&self, target: ExtensionTarget) -> Vec<String> {
        definitions()
            .into_iter()
            .filter(|a| a.object_types.contains(&target))
            .filter(|a| !STAMP_FIELDS.contains(&a.name.as_str()))
            .filter(|a| self.supports(&a.name, target))
            .map(|a| a.name)
            .collect()
    }
}

/// Write the engine-owned entries of `bag` into `custom_fields`.
///
/// Managed names absent from `bag` are cleared (set to null) when the sink
/// still holds a value for them; anything else in `custom_fields` is left as is.
pub fn apply_bag(
    custom_fields: &mut BTreeMap<String, Value>,
    bag: &ExtensionBag,
    managed: &[String],
) {
    for (name, value) in bag {
        custom_fields.insert(name.clone(), value.clone());
    }
    for name in managed {
        if bag.contains_key(name) {
            continue;
        }
        if custom_fields.get(name).is_some_and(|v| !v.is_null()) {
            custom_fields.insert(name.clone(), Value::Null);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definitions_are_unique() {
        let defs = definitions();
        let names: BTreeSet<&str> = defs.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names.len(), defs.len());
        assert!(defs.iter().all(|a| a.object_types.len() == 1));
    }

    #[test]
    fn test_retain_drops_unsupported() {
        let supported = SupportedExtensions::from_attributes(&[
            ExtensionAttribute::new("vmid", "", FieldType::Integer)
                .applies_to(ExtensionTarget::VirtualMachine),
            ExtensionAttribute::new("bridge", "", FieldType::Text)
                .applies_to(ExtensionTarget::VmInterface),
        ]);
        let mut bag = ExtensionBag::new();
        bag.insert("vmid".to_string(), json!(100));
        bag.insert("bridge".to_string(), json!("vmbr0"));
        bag.insert("qemu_bios_type".to_string(), json!("SeaBIOS"));

        let dropped = supported.retain(ExtensionTarget::VirtualMachine, &mut bag);
        assert_eq!(dropped, vec!["bridge", "qemu_bios_type"]);
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn test_managed_excludes_stamp_fields() {
        let supported = SupportedExtensions::from_attributes(&definitions());
        let managed = supported.managed(ExtensionTarget::VirtualMachine);
        let has = |name: &str| managed.iter().any(|m| m == name);
        assert!(has("vmid"));
        assert!(has("qemu_bios_type"));
        assert!(!has("vm_status"));
        assert!(!has("vm_last_sync"));
        assert!(!has("bridge"));
    }

    #[test]
    fn test_apply_bag_clears_stale_values() {
        let mut custom_fields = BTreeMap::new();
        custom_fields.insert("bridge".to_string(), json!("vmbr1"));
        custom_fields.insert("interface_model".to_string(), json!("e1000"));
        custom_fields.insert("owner".to_string(), json!("ops"));

        let mut bag = ExtensionBag::new();
        bag.insert("bridge".to_string(), json!("vmbr0"));
        let managed = vec!["bridge".to_string(), "interface_model".to_string()];
        apply_bag(&mut custom_fields, &bag, &managed);

        assert_eq!(custom_fields["bridge"], json!("vmbr0"));
        assert!(custom_fields["interface_model"].is_null());
        assert_eq!(custom_fields["owner"], json!("ops"));
    }
}
