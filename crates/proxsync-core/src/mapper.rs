// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Translation from source snapshots into the sink vocabulary.
//!
//! Everything here is pure: no I/O and no clock. Interface and disk lists
//! keep source order but carry their stable key (`net0`, `scsi0`, host
//! interface name) for matching against existing sink children.

use std::collections::BTreeSet;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use proxsync_sink::RecordStatus;
use proxsync_source::{
    DiskSpec, HostInterfaceKind, HostInterfaceSpec, InstanceKind, InstanceStatus, KindDetails,
    NetworkInterfaceSpec, SourceInstance, SourceNode,
};
use serde_json::Value;

use crate::extension::{ExtensionBag, names};

const BYTES_IN_GB: u64 = 1024 * 1024 * 1024;

/// Sink-side attributes of one guest.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedInstance {
    pub vmid: u32,
    pub name: String,
    pub status: RecordStatus,
    pub vcpus: u32,
    pub memory_mb: Option<u64>,
    /// Sum of all sized disks.
    pub disk_mb: Option<u64>,
    pub comments: Option<String>,
    /// Platform name, from the notes or the OS type.
    pub platform: Option<String>,
    pub tags: BTreeSet<String>,
    pub extensions: ExtensionBag,
    pub interfaces: Vec<MappedInterface>,
    pub disks: Vec<MappedDisk>,
}

/// Sink-side attributes of a hypervisor node device.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedNode {
    pub name: String,
    pub status: RecordStatus,
    pub pve_version: Option<String>,
    pub extensions: ExtensionBag,
    pub interfaces: Vec<MappedInterface>,
}

/// A VM NIC or host interface.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedInterface {
    /// Interface name in the sink and its identity.
    pub key: String,
    pub enabled: bool,
    /// Device interface type; VM interfaces have none.
    pub kind: Option<String>,
    pub mac: Option<String>,
    pub vlan: Option<u16>,
    /// `None` leaves the sink description alone.
    pub description: Option<String>,
    /// Addresses to assign, in preference order.
    pub addresses: Vec<IpNetwork>,
    pub extensions: ExtensionBag,
}

/// A guest disk.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedDisk {
    pub name: String,
    /// `None` when the source size is unknown or zero.
    pub size_mb: Option<u64>,
    pub description: Option<String>,
    pub extensions: ExtensionBag,
}

// ============================================================================
// Policies
// ============================================================================

/// running → active, stopped → offline, anything else → staged.
pub fn map_status(status: &InstanceStatus) -> RecordStatus {
    match status {
        InstanceStatus::Running => RecordStatus::Active,
        InstanceStatus::Stopped => RecordStatus::Offline,
        InstanceStatus::Other(_) => RecordStatus::Staged,
    }
}

/// OS hint from an `os: <name>` line in the notes (case-insensitive key).
pub fn os_from_notes(notes: &str) -> Option<String> {
    notes.lines().find_map(|line| {
        let line = line.trim();
        let (key, value) = line.split_once(':')?;
        if !key.trim().eq_ignore_ascii_case("os") {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Notes hint first, then the kind's OS type; first match wins.
pub fn extract_os(instance: &SourceInstance) -> Option<String> {
    instance
        .notes
        .as_deref()
        .and_then(os_from_notes)
        .or_else(|| instance.details.ostype().map(str::to_string))
}

const LINUX_HINTS: &[&str] = &["ubuntu", "debian", "centos", "fedora", "rhel", "arch"];

/// Machine type Proxmox would pick when none is configured.
///
/// Linux (`l26`, distribution names) and Windows (`win10`, `w2k8`, `wxp`)
/// guests get `q35`.
pub fn default_machine(ostype: Option<&str>) -> &'static str {
    let Some(os) = ostype.map(str::to_lowercase) else {
        return "i440fx";
    };
    let linux = os.starts_with('l') || LINUX_HINTS.iter().any(|hint| os.contains(hint));
    let windows = os.starts_with('w');
    if linux || windows { "q35" } else { "i440fx" }
}

/// NetBox interface type of a host interface.
pub fn host_interface_type(kind: &HostInterfaceKind) -> &'static str {
    match kind {
        HostInterfaceKind::Bridge => "bridge",
        HostInterfaceKind::Bond => "lag",
        HostInterfaceKind::Vlan | HostInterfaceKind::Loopback => "virtual",
        HostInterfaceKind::Physical => "1000base-t",
        HostInterfaceKind::Other(_) => "other",
    }
}

/// Guest-reported addresses worth recording.
pub fn is_assignable(address: &IpNetwork) -> bool {
    let ip = address.ip();
    if ip.is_loopback() || ip.is_multicast() || ip.is_unspecified() {
        return false;
    }
    match ip {
        IpAddr::V4(v4) => !v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) != 0xfe80,
    }
}

// ============================================================================
// Instances
// ============================================================================

/// Map one guest.
pub fn map_instance(instance: &SourceInstance) -> MappedInstance {
    let mut extensions = ExtensionBag::new();
    put(&mut extensions, names::SOURCE_ID, Some(instance.vmid));
    put(&mut extensions, names::CPU_SOCKETS, instance.cpu_sockets);
    put(&mut extensions, names::MIN_MEMORY_MB, instance.min_memory_mb);

    match &instance.details {
        KindDetails::Vm {
            ostype,
            bios,
            machine,
            cpu_type,
            cores_per_socket,
            numa,
            boot_order,
        } => {
            let machine = machine
                .clone()
                .unwrap_or_else(|| default_machine(ostype.as_deref()).to_string());
            let bios = bios.clone().unwrap_or_else(|| "SeaBIOS".to_string());
            put(&mut extensions, names::QEMU_CPU_TYPE, cpu_type.clone());
            put(&mut extensions, names::QEMU_BIOS_TYPE, Some(bios));
            put(&mut extensions, names::QEMU_MACHINE_TYPE, Some(machine));
            put(&mut extensions, names::QEMU_NUMA_ENABLED, *numa);
            put(&mut extensions, names::QEMU_CORES_PER_SOCKET, Some(cores_per_socket.unwrap_or(1)));
            put(&mut extensions, names::QEMU_BOOT_ORDER, boot_order.clone());
        }
        KindDetails::Container {
            arch,
            unprivileged,
            features,
            ..
        } => {
            put(&mut extensions, names::LXC_ARCHITECTURE, arch.clone());
            put(&mut extensions, names::LXC_UNPRIVILEGED, *unprivileged);
            put(&mut extensions, names::LXC_FEATURES, features.clone());
        }
    }

    if let Some(boot) = instance.boot_disk() {
        put(&mut extensions, names::BOOT_DISK_STORAGE, boot.storage.clone());
        put(&mut extensions, names::BOOT_DISK_FORMAT, boot.format.clone());
        if instance.kind == InstanceKind::Container && boot.name == "rootfs" {
            put(&mut extensions, names::LXC_ROOTFS_STORAGE, boot.storage.clone());
        }
    }

    MappedInstance {
        vmid: instance.vmid,
        name: instance.name.clone(),
        status: map_status(&instance.status),
        vcpus: instance.vcpus.max(1),
        memory_mb: instance.memory_mb,
        disk_mb: instance.total_disk_mb(),
        comments: instance
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        platform: extract_os(instance),
        tags: instance.tags.clone(),
        extensions,
        interfaces: instance.interfaces.iter().map(map_nic).collect(),
        disks: map_disks(&instance.disks),
    }
}

fn map_nic(nic: &NetworkInterfaceSpec) -> MappedInterface {
    let addresses = if nic.static_addresses.is_empty() {
        nic.guest_addresses
            .iter()
            .copied()
            .filter(is_assignable)
            .collect()
    } else {
        nic.static_addresses.clone()
    };

    let mut extensions = ExtensionBag::new();
    put(&mut extensions, names::BRIDGE, nic.bridge.clone());
    put(&mut extensions, names::INTERFACE_MODEL, nic.model.clone());

    MappedInterface {
        key: nic.key(),
        enabled: true,
        kind: None,
        mac: Some(nic.mac.clone()),
        vlan: nic.vlan_tag,
        description: None,
        addresses,
        extensions,
    }
}

/// Only the first disk flagged as boot disk keeps the flag.
fn map_disks(disks: &[DiskSpec]) -> Vec<MappedDisk> {
    let mut boot_taken = false;
    disks
        .iter()
        .map(|disk| {
            let boot = disk.boot && !boot_taken;
            boot_taken |= boot;

            let mut extensions = ExtensionBag::new();
            put(&mut extensions, names::DISK_STORAGE, disk.storage.clone());
            put(&mut extensions, names::DISK_FORMAT, disk.format.clone());
            put(&mut extensions, names::DISK_MOUNT_POINT, disk.mount_point.clone());
            put(&mut extensions, names::DISK_BOOT, Some(boot));

            let description = match (&disk.storage, &disk.volume) {
                (Some(storage), Some(volume)) => Some(format!("{}:{}", storage, volume)),
                (None, Some(volume)) => Some(volume.clone()),
                _ => None,
            };

            MappedDisk {
                name: disk.name.clone(),
                size_mb: disk.size_mb.filter(|s| *s > 0),
                description,
                extensions,
            }
        })
        .collect()
}

// ============================================================================
// Nodes
// ============================================================================

/// Map the hypervisor node itself.
pub fn map_node(node: &SourceNode) -> MappedNode {
    let mut extensions = ExtensionBag::new();
    put(&mut extensions, names::PVE_VERSION, node.pve_version.clone());
    put(&mut extensions, names::CPU_MODEL, node.cpu_model.clone());
    put(&mut extensions, names::NODE_CPU_SOCKETS, node.cpu_sockets);
    put(&mut extensions, names::CPU_CORES_TOTAL, node.cpu_cores);
    put(
        &mut extensions,
        names::MEMORY_TOTAL_GB,
        node.memory_total_bytes.map(|b| b / BYTES_IN_GB),
    );
    put(
        &mut extensions,
        names::ROOTFS_TOTAL_GB,
        node.rootfs_total_bytes.map(|b| b / BYTES_IN_GB),
    );

    MappedNode {
        name: node.name.clone(),
        status: RecordStatus::Active,
        pve_version: node.pve_version.clone(),
        extensions,
        interfaces: node.interfaces.iter().map(map_host_interface).collect(),
    }
}

fn map_host_interface(iface: &HostInterfaceSpec) -> MappedInterface {
    let mut extensions = ExtensionBag::new();
    put(&mut extensions, names::INTERFACE_TYPE, Some(iface.kind.as_str().to_string()));
    let ports = (!iface.members.is_empty()).then(|| iface.members.join(" "));
    put(&mut extensions, names::INTERFACE_PORTS, ports);

    MappedInterface {
        key: iface.name.clone(),
        enabled: iface.active,
        kind: Some(host_interface_type(&iface.kind).to_string()),
        mac: None,
        vlan: None,
        description: Some(iface.comments.clone().unwrap_or_default()),
        addresses: iface.addresses.clone(),
        extensions,
    }
}

fn put<T: Into<Value>>(bag: &mut ExtensionBag, name: &str, value: Option<T>) {
    if let Some(value) = value {
        bag.insert(name.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vm(vmid: u32, name: &str) -> SourceInstance {
        SourceInstance {
            vmid,
            name: name.to_string(),
            kind: InstanceKind::Vm,
            status: InstanceStatus::Running,
            vcpus: 2,
            memory_mb: Some(2048),
            min_memory_mb: None,
            cpu_sockets: Some(1),
            interfaces: vec![],
            disks: vec![],
            notes: None,
            tags: BTreeSet::new(),
            details: KindDetails::Vm {
                ostype: Some("l26".to_string()),
                bios: None,
                machine: None,
                cpu_type: None,
                cores_per_socket: Some(2),
                numa: None,
                boot_order: None,
            },
        }
    }

    fn disk(name: &str, size_mb: Option<u64>, boot: bool) -> DiskSpec {
        DiskSpec {
            name: name.to_string(),
            size_mb,
            storage: Some("local-lvm".to_string()),
            volume: Some(format!("vm-100-{}", name)),
            format: Some("raw".to_string()),
            boot,
            mount_point: None,
        }
    }

    #[test]
    fn test_status_mapping_is_total() {
        assert_eq!(map_status(&InstanceStatus::Running), RecordStatus::Active);
        assert_eq!(map_status(&InstanceStatus::Stopped), RecordStatus::Offline);
        for other in ["paused", "suspended", "unknown", ""] {
            assert_eq!(map_status(&InstanceStatus::from(other)), RecordStatus::Staged);
        }
    }

    #[test]
    fn test_os_from_notes_first_match_keeps_case() {
        let notes = "Owner: ops\n  OS:  Debian 12 \nos: Ubuntu";
        assert_eq!(os_from_notes(notes).as_deref(), Some("Debian 12"));
        assert_eq!(os_from_notes("os:\nnothing here"), None);
        assert_eq!(os_from_notes("cos: x"), None);
    }

    #[test]
    fn test_extract_os_prefers_notes() {
        let mut instance = vm(100, "web-01");
        assert_eq!(extract_os(&instance).as_deref(), Some("l26"));
        instance.notes = Some("os: Rocky Linux 9".to_string());
        assert_eq!(extract_os(&instance).as_deref(), Some("Rocky Linux 9"));

        if let KindDetails::Vm { ostype, .. } = &mut instance.details {
            *ostype = None;
        }
        instance.notes = None;
        assert_eq!(extract_os(&instance), None);
    }

    #[test]
    fn test_vm_defaults() {
        let mapped = map_instance(&vm(100, "web-01"));
        assert_eq!(mapped.extensions["vmid"], json!(100));
        assert_eq!(mapped.extensions["qemu_machine_type"], json!("q35"));
        assert_eq!(mapped.extensions["qemu_bios_type"], json!("SeaBIOS"));
        assert_eq!(mapped.extensions["qemu_cores_per_socket"], json!(2));
        assert!(!mapped.extensions.contains_key("qemu_cpu_type"));
        assert_eq!(default_machine(Some("other")), "i440fx");
        assert_eq!(default_machine(None), "i440fx");
        assert_eq!(default_machine(Some("win11")), "q35");
        for windows in ["w2k8", "wxp", "wvista", "w2k3"] {
            assert_eq!(default_machine(Some(windows)), "q35", "{}", windows);
        }
        assert_eq!(default_machine(Some("Debian")), "q35");
        assert_eq!(default_machine(Some("solaris")), "i440fx");
    }

    #[test]
    fn test_cores_per_socket_defaults_to_one() {
        let mut instance = vm(100, "web-01");
        if let KindDetails::Vm { cores_per_socket, .. } = &mut instance.details {
            *cores_per_socket = None;
        }
        let mapped = map_instance(&instance);
        assert_eq!(mapped.extensions["qemu_cores_per_socket"], json!(1));
    }

    #[test]
    fn test_container_extensions() {
        let mut instance = vm(200, "ct-01");
        instance.kind = InstanceKind::Container;
        instance.details = KindDetails::Container {
            ostype: Some("debian".to_string()),
            arch: Some("amd64".to_string()),
            unprivileged: Some(true),
            features: Some("nesting=1".to_string()),
        };
        let mapped = map_instance(&instance);
        assert_eq!(mapped.extensions["lxc_unprivileged"], json!(true));
        assert_eq!(mapped.extensions["lxc_architecture"], json!("amd64"));
        assert!(!mapped.extensions.contains_key("qemu_bios_type"));
        assert_eq!(mapped.platform.as_deref(), Some("debian"));
        assert!(!mapped.extensions.contains_key("lxc_rootfs_storage"));

        instance.disks = vec![DiskSpec {
            mount_point: Some("/".to_string()),
            ..disk("rootfs", Some(8192), true)
        }];
        let mapped = map_instance(&instance);
        assert_eq!(mapped.extensions["lxc_rootfs_storage"], json!("local-lvm"));
        assert_eq!(mapped.extensions["boot_disk_storage"], json!("local-lvm"));
    }

    #[test]
    fn test_disks_single_boot_flag_and_sizes() {
        let mut instance = vm(100, "web-01");
        instance.disks = vec![
            disk("scsi0", Some(32768), true),
            disk("scsi1", Some(0), true),
            disk("virtio0", None, false),
        ];
        let mapped = map_instance(&instance);
        assert_eq!(mapped.disks[0].extensions["disk_boot"], json!(true));
        assert_eq!(mapped.disks[1].extensions["disk_boot"], json!(false));
        assert_eq!(mapped.disks[1].size_mb, None);
        assert_eq!(mapped.disks[2].size_mb, None);
        assert_eq!(mapped.disk_mb, Some(32768));
        assert_eq!(
            mapped.disks[0].description.as_deref(),
            Some("local-lvm:vm-100-scsi0")
        );
        assert_eq!(mapped.extensions["boot_disk_storage"], json!("local-lvm"));
    }

    #[test]
    fn test_static_address_wins_over_guest() {
        let mut instance = vm(100, "web-01");
        instance.interfaces = vec![
            NetworkInterfaceSpec {
                index: 0,
                mac: "BC:24:11:00:00:01".to_string(),
                bridge: Some("vmbr0".to_string()),
                vlan_tag: Some(20),
                model: Some("virtio".to_string()),
                static_addresses: vec!["10.0.0.5/24".parse().unwrap()],
                guest_addresses: vec!["10.0.0.99/24".parse().unwrap()],
                guest_name: None,
            },
            NetworkInterfaceSpec {
                index: 1,
                mac: "BC:24:11:00:00:02".to_string(),
                bridge: None,
                vlan_tag: None,
                model: None,
                static_addresses: vec![],
                guest_addresses: vec![
                    "fe80::1/64".parse().unwrap(),
                    "169.254.1.1/16".parse().unwrap(),
                    "2001:db8::5/64".parse().unwrap(),
                ],
                guest_name: Some("ens19".to_string()),
            },
        ];
        let mapped = map_instance(&instance);
        let net0 = &mapped.interfaces[0];
        assert_eq!(net0.key, "net0");
        assert_eq!(net0.vlan, Some(20));
        assert_eq!(net0.addresses, vec!["10.0.0.5/24".parse::<IpNetwork>().unwrap()]);
        assert_eq!(net0.extensions["bridge"], json!("vmbr0"));

        let net1 = &mapped.interfaces[1];
        assert_eq!(net1.addresses, vec!["2001:db8::5/64".parse::<IpNetwork>().unwrap()]);
        assert!(!net1.extensions.contains_key("bridge"));
    }

    #[test]
    fn test_map_node() {
        let node = SourceNode {
            host: "10.0.0.2".to_string(),
            name: "pve1".to_string(),
            cpu_model: Some("AMD EPYC 7302".to_string()),
            cpu_sockets: Some(1),
            cpu_cores: Some(16),
            memory_total_bytes: Some(135_089_496_064),
            rootfs_total_bytes: Some(100 * BYTES_IN_GB + 5),
            pve_version: Some("8.2.4".to_string()),
            interfaces: vec![HostInterfaceSpec {
                name: "bond0".to_string(),
                kind: HostInterfaceKind::Bond,
                active: true,
                addresses: vec![],
                gateway: None,
                comments: None,
                members: vec!["eno1".to_string(), "eno2".to_string()],
                vlan_id: None,
                vlan_raw_device: None,
            }],
        };
        let mapped = map_node(&node);
        assert_eq!(mapped.extensions["proxmox_memory_total_gb"], json!(125));
        assert_eq!(mapped.extensions["proxmox_rootfs_total_gb"], json!(100));
        assert_eq!(mapped.extensions["proxmox_cpu_cores_total"], json!(16));
        let bond = &mapped.interfaces[0];
        assert_eq!(bond.kind.as_deref(), Some("lag"));
        assert_eq!(bond.extensions["proxmox_interface_type"], json!("bond"));
        assert_eq!(bond.extensions["proxmox_interface_ports"], json!("eno1 eno2"));
    }

    #[test]
    fn test_host_interface_types() {
        assert_eq!(host_interface_type(&HostInterfaceKind::Bridge), "bridge");
        assert_eq!(host_interface_type(&HostInterfaceKind::Physical), "1000base-t");
        assert_eq!(host_interface_type(&HostInterfaceKind::Loopback), "virtual");
        assert_eq!(
            host_interface_type(&HostInterfaceKind::Other("OVSPort".to_string())),
            "other"
        );
    }
}
