// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Records as the sink stores them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primary key assigned by the sink.
pub type ObjectId = u64;

/// Custom field names the reconciliation relies on.
pub mod fields {
    /// Numeric guest id at the source.
    pub const SOURCE_ID: &str = "vmid";
    /// Lifecycle marker, [`STATE_DEPLOYED`] or [`STATE_DELETED`].
    pub const SYNC_STATE: &str = "vm_status";
    /// Timestamp of the last sync touching a VM.
    pub const LAST_SYNC: &str = "vm_last_sync";
    /// Timestamp of the last sync touching a node device.
    pub const NODE_LAST_SYNC: &str = "proxmox_node_last_sync";

    pub const STATE_DEPLOYED: &str = "Deployed";
    pub const STATE_DELETED: &str = "Deleted";
}

/// Top-level object families the engine writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    VirtualMachine,
    Device,
}

impl ObjectKind {
    /// Content type of the record itself.
    pub fn content_type(&self) -> &'static str {
        match self {
            ObjectKind::VirtualMachine => "virtualization.virtualmachine",
            ObjectKind::Device => "dcim.device",
        }
    }

    /// Content type of the record's interfaces.
    pub fn interface_content_type(&self) -> &'static str {
        match self {
            ObjectKind::VirtualMachine => "virtualization.vminterface",
            ObjectKind::Device => "dcim.interface",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::VirtualMachine => write!(f, "virtual machine"),
            ObjectKind::Device => write!(f, "device"),
        }
    }
}

/// Object types an extension attribute can apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionTarget {
    VirtualMachine,
    Device,
    VmInterface,
    DeviceInterface,
    VirtualDisk,
}

impl ExtensionTarget {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExtensionTarget::VirtualMachine => "virtualization.virtualmachine",
            ExtensionTarget::Device => "dcim.device",
            ExtensionTarget::VmInterface => "virtualization.vminterface",
            ExtensionTarget::DeviceInterface => "dcim.interface",
            ExtensionTarget::VirtualDisk => "virtualization.virtualdisk",
        }
    }

    pub fn from_content_type(value: &str) -> Option<Self> {
        match value {
            "virtualization.virtualmachine" => Some(ExtensionTarget::VirtualMachine),
            "dcim.device" => Some(ExtensionTarget::Device),
            "virtualization.vminterface" => Some(ExtensionTarget::VmInterface),
            "dcim.interface" => Some(ExtensionTarget::DeviceInterface),
            "virtualization.virtualdisk" => Some(ExtensionTarget::VirtualDisk),
            _ => None,
        }
    }

    /// Target for the record of `kind`.
    pub fn record(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::VirtualMachine => ExtensionTarget::VirtualMachine,
            ObjectKind::Device => ExtensionTarget::Device,
        }
    }

    /// Target for interfaces of a record of `kind`.
    pub fn interface(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::VirtualMachine => ExtensionTarget::VmInterface,
            ObjectKind::Device => ExtensionTarget::DeviceInterface,
        }
    }
}

/// Data type of an extension attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
        }
    }
}

/// Definition of a sink extension attribute (custom field).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionAttribute {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub object_types: BTreeSet<ExtensionTarget>,
}

impl ExtensionAttribute {
    pub fn new(name: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type,
            object_types: BTreeSet::new(),
        }
    }

    pub fn applies_to(mut self, target: ExtensionTarget) -> Self {
        self.object_types.insert(target);
        self
    }
}

/// Operational status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Offline,
    Staged,
    /// Any status the engine never writes (planned, failed, ...).
    #[serde(other)]
    Unknown,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Offline => "offline",
            RecordStatus::Staged => "staged",
            RecordStatus::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "active" => RecordStatus::Active,
            "offline" => RecordStatus::Offline,
            "staged" => RecordStatus::Staged,
            _ => RecordStatus::Unknown,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A virtual machine or device record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    /// `None` until the sink has stored the record.
    pub id: Option<ObjectId>,
    pub kind: ObjectKind,
    pub name: String,
    pub status: RecordStatus,
    pub cluster: Option<ObjectId>,
    pub site: Option<ObjectId>,
    pub role: Option<ObjectId>,
    pub device_type: Option<ObjectId>,
    pub platform: Option<ObjectId>,
    pub vcpus: Option<u32>,
    pub memory_mb: Option<u64>,
    pub disk_mb: Option<u64>,
    pub comments: Option<String>,
    pub tags: BTreeSet<ObjectId>,
    pub custom_fields: BTreeMap<String, Value>,
    pub primary_ip4: Option<ObjectId>,
    pub primary_ip6: Option<ObjectId>,
}

impl SinkRecord {
    /// An unsaved record with only kind and name set.
    pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            name: name.into(),
            status: RecordStatus::Active,
            cluster: None,
            site: None,
            role: None,
            device_type: None,
            platform: None,
            vcpus: None,
            memory_mb: None,
            disk_mb: None,
            comments: None,
            tags: BTreeSet::new(),
            custom_fields: BTreeMap::new(),
            primary_ip4: None,
            primary_ip6: None,
        }
    }

    /// Source guest id stored in the record's custom fields.
    pub fn source_id(&self) -> Option<u32> {
        match self.custom_fields.get(fields::SOURCE_ID)? {
            Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Whether an earlier run marked the record as gone from the source.
    pub fn is_orphaned(&self) -> bool {
        self.custom_fields
            .get(fields::SYNC_STATE)
            .and_then(Value::as_str)
            == Some(fields::STATE_DELETED)
    }

    pub fn parent_ref(&self) -> Option<ParentRef> {
        self.id.map(|id| ParentRef {
            kind: self.kind,
            id,
        })
    }
}

/// Owner of an interface: a VM or a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: ObjectKind,
    pub id: ObjectId,
}

/// An interface, addressed together with its parent kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceRef {
    pub kind: ObjectKind,
    pub id: ObjectId,
}

impl InterfaceRef {
    pub fn content_type(&self) -> &'static str {
        self.kind.interface_content_type()
    }
}

/// A VM or device interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub id: Option<ObjectId>,
    pub name: String,
    pub enabled: bool,
    /// Physical type (`1000base-t`, `bridge`, ...); devices only.
    pub kind: Option<String>,
    /// Upper-case MAC address.
    pub mac: Option<String>,
    pub mtu: Option<u32>,
    /// 802.1Q mode (`access`, `tagged`).
    pub mode: Option<String>,
    pub untagged_vlan: Option<ObjectId>,
    pub description: Option<String>,
    /// Management-only interfaces are never touched by reconciliation.
    pub mgmt_only: bool,
    pub custom_fields: BTreeMap<String, Value>,
}

impl InterfaceRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            enabled: true,
            kind: None,
            mac: None,
            mtu: None,
            mode: None,
            untagged_vlan: None,
            description: None,
            mgmt_only: false,
            custom_fields: BTreeMap::new(),
        }
    }
}

/// An IP address object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressRecord {
    pub id: Option<ObjectId>,
    pub address: IpNetwork,
    pub assigned: Option<InterfaceRef>,
}

/// A virtual disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskRecord {
    pub id: Option<ObjectId>,
    pub name: String,
    pub size_mb: u64,
    pub description: Option<String>,
    pub custom_fields: BTreeMap<String, Value>,
}

/// Filter for [`SinkClient::find_records`](crate::SinkClient::find_records).
///
/// Every field that is set must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub kind: ObjectKind,
    pub cluster: Option<ObjectId>,
    pub source_id: Option<u32>,
    pub name: Option<String>,
}

impl RecordQuery {
    /// All records of `kind`.
    pub fn all(kind: ObjectKind) -> Self {
        Self {
            kind,
            cluster: None,
            source_id: None,
            name: None,
        }
    }

    /// All virtual machines in `cluster`.
    pub fn in_cluster(cluster: ObjectId) -> Self {
        Self {
            cluster: Some(cluster),
            ..Self::all(ObjectKind::VirtualMachine)
        }
    }

    pub fn with_source_id(mut self, source_id: u32) -> Self {
        self.source_id = Some(source_id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn matches(&self, record: &SinkRecord) -> bool {
        record.kind == self.kind
            && self.cluster.is_none_or(|c| record.cluster == Some(c))
            && self.source_id.is_none_or(|s| record.source_id() == Some(s))
            && self.name.as_ref().is_none_or(|n| &record.name == n)
    }
}

/// Slug used by the sink for name-keyed reference objects.
pub fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            ' ' | '_' | '.' => '-',
            other => other,
        })
        .collect()
}
