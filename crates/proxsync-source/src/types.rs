// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed inventory snapshot produced by a source client.
//!
//! These values are rebuilt on every fetch and never mutated afterwards.

use std::collections::BTreeSet;
use std::fmt;

use ipnetwork::IpNetwork;
use serde::{Serialize, Serializer};

/// Guest flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    /// QEMU/KVM virtual machine.
    Vm,
    /// LXC container.
    Container,
}

impl InstanceKind {
    /// Path segment used by the API for this kind.
    pub fn api_segment(&self) -> &'static str {
        match self {
            InstanceKind::Vm => "qemu",
            InstanceKind::Container => "lxc",
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceKind::Vm => write!(f, "vm"),
            InstanceKind::Container => write!(f, "container"),
        }
    }
}

/// Lifecycle status reported by the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstanceStatus {
    Running,
    Stopped,
    /// Anything else (`paused`, `suspended`, `unknown`, ...), kept verbatim.
    Other(String),
}

impl InstanceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Other(s) => s,
        }
    }
}

impl From<&str> for InstanceStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "running" => InstanceStatus::Running,
            "stopped" => InstanceStatus::Stopped,
            other => InstanceStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for InstanceStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One guest NIC (`netN`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInterfaceSpec {
    /// The `N` in `netN`.
    pub index: u32,
    /// Upper-case, colon separated.
    pub mac: String,
    pub bridge: Option<String>,
    pub vlan_tag: Option<u16>,
    pub model: Option<String>,
    /// Addresses configured statically (container `ip=`/`ip6=`, cloud-init `ipconfigN`).
    pub static_addresses: Vec<IpNetwork>,
    /// Addresses reported by the guest agent for this MAC.
    pub guest_addresses: Vec<IpNetwork>,
    /// Interface name inside the guest, if known.
    pub guest_name: Option<String>,
}

impl NetworkInterfaceSpec {
    /// Stable identity of the NIC within its guest.
    pub fn key(&self) -> String {
        format!("net{}", self.index)
    }
}

/// One guest disk or mount point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskSpec {
    /// Config slot, e.g. `scsi0`, `rootfs`, `mp1`.
    pub name: String,
    /// `None` when the size is absent or unparseable.
    pub size_mb: Option<u64>,
    pub storage: Option<String>,
    pub volume: Option<String>,
    pub format: Option<String>,
    pub boot: bool,
    pub mount_point: Option<String>,
}

/// Kind-specific settings without a generic home.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KindDetails {
    Vm {
        ostype: Option<String>,
        bios: Option<String>,
        machine: Option<String>,
        cpu_type: Option<String>,
        cores_per_socket: Option<u32>,
        numa: Option<bool>,
        boot_order: Option<String>,
    },
    Container {
        ostype: Option<String>,
        arch: Option<String>,
        unprivileged: Option<bool>,
        features: Option<String>,
    },
}

impl KindDetails {
    pub fn ostype(&self) -> Option<&str> {
        match self {
            KindDetails::Vm { ostype, .. } | KindDetails::Container { ostype, .. } => {
                ostype.as_deref()
            }
        }
    }
}

/// One VM or container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInstance {
    /// Numeric guest id, unique within the cluster.
    pub vmid: u32,
    pub name: String,
    pub kind: InstanceKind,
    pub status: InstanceStatus,
    pub vcpus: u32,
    pub memory_mb: Option<u64>,
    pub min_memory_mb: Option<u64>,
    pub cpu_sockets: Option<u32>,
    pub interfaces: Vec<NetworkInterfaceSpec>,
    /// Boot disk first, then by slot name.
    pub disks: Vec<DiskSpec>,
    pub notes: Option<String>,
    pub tags: BTreeSet<String>,
    pub details: KindDetails,
}

impl SourceInstance {
    /// The disk flagged as boot disk, if any.
    pub fn boot_disk(&self) -> Option<&DiskSpec> {
        self.disks.iter().find(|d| d.boot)
    }

    /// Size of the boot disk in MB.
    pub fn boot_disk_mb(&self) -> Option<u64> {
        self.boot_disk().and_then(|d| d.size_mb)
    }

    /// Sum of all known disk sizes, `None` without any sized disk.
    pub fn total_disk_mb(&self) -> Option<u64> {
        let sizes: Vec<u64> = self
            .disks
            .iter()
            .filter_map(|d| d.size_mb)
            .filter(|s| *s > 0)
            .collect();
        if sizes.is_empty() {
            None
        } else {
            Some(sizes.iter().sum())
        }
    }
}

/// Host interface flavour as reported by `nodes/{node}/network`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostInterfaceKind {
    Physical,
    Bridge,
    Bond,
    Vlan,
    Loopback,
    Other(String),
}

impl HostInterfaceKind {
    pub fn as_str(&self) -> &str {
        match self {
            HostInterfaceKind::Physical => "eth",
            HostInterfaceKind::Bridge => "bridge",
            HostInterfaceKind::Bond => "bond",
            HostInterfaceKind::Vlan => "vlan",
            HostInterfaceKind::Loopback => "loopback",
            HostInterfaceKind::Other(s) => s,
        }
    }
}

impl From<&str> for HostInterfaceKind {
    fn from(value: &str) -> Self {
        match value {
            "eth" => HostInterfaceKind::Physical,
            "bridge" | "OVSBridge" => HostInterfaceKind::Bridge,
            "bond" | "OVSBond" => HostInterfaceKind::Bond,
            "vlan" | "OVSIntPort" => HostInterfaceKind::Vlan,
            "loopback" => HostInterfaceKind::Loopback,
            other => HostInterfaceKind::Other(other.to_string()),
        }
    }
}

impl Serialize for HostInterfaceKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One network interface of the hypervisor host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInterfaceSpec {
    pub name: String,
    pub kind: HostInterfaceKind,
    pub active: bool,
    pub addresses: Vec<IpNetwork>,
    pub gateway: Option<String>,
    pub comments: Option<String>,
    /// Bond slaves or bridge ports.
    pub members: Vec<String>,
    pub vlan_id: Option<u16>,
    pub vlan_raw_device: Option<String>,
}

/// The hypervisor host itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceNode {
    pub host: String,
    pub name: String,
    pub cpu_model: Option<String>,
    pub cpu_sockets: Option<u32>,
    pub cpu_cores: Option<u32>,
    pub memory_total_bytes: Option<u64>,
    pub rootfs_total_bytes: Option<u64>,
    pub pve_version: Option<String>,
    pub interfaces: Vec<HostInterfaceSpec>,
}
