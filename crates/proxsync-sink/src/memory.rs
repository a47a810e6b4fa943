// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory sink for tests.
//!
//! Mirrors the NetBox rules the engine depends on: unique VM names per
//! cluster, custom fields must be defined before use, primary IPs must be
//! assigned to one of the record's interfaces and cannot be unassigned while
//! primary. Every mutating call is counted per operation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use ipnetwork::IpNetwork;
use serde_json::Value;

use crate::client::SinkClient;
use crate::error::{Result, SinkError};
use crate::types::{
    DiskRecord, ExtensionAttribute, ExtensionTarget, InterfaceRecord, InterfaceRef,
    IpAddressRecord, ObjectId, ObjectKind, ParentRef, RecordQuery, SinkRecord, fields,
};

/// Families of name-keyed reference objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReferenceKind {
    ClusterType,
    Cluster,
    Site,
    Role,
    Manufacturer,
    DeviceType,
    Platform,
    Tag,
    Vlan,
}

/// Mutating operations, as counted by [`MemorySink::writes`].
pub mod ops {
    pub const CREATE_REFERENCE: &str = "create_reference";
    pub const UPSERT_RECORD: &str = "upsert_record";
    pub const MARK_ORPHAN: &str = "mark_orphan";
    pub const UPSERT_INTERFACE: &str = "upsert_interface";
    pub const DELETE_INTERFACE: &str = "delete_interface";
    pub const UPSERT_IP_ADDRESS: &str = "upsert_ip_address";
    pub const UNASSIGN_IP_ADDRESS: &str = "unassign_ip_address";
    pub const UPSERT_DISK: &str = "upsert_disk";
    pub const DELETE_DISK: &str = "delete_disk";
    pub const ENSURE_EXTENSION_ATTRIBUTE: &str = "ensure_extension_attribute";

    /// Operations on interfaces, IP addresses and disks.
    pub const CHILD: &[&str] = &[
        UPSERT_INTERFACE,
        DELETE_INTERFACE,
        UPSERT_IP_ADDRESS,
        UNASSIGN_IP_ADDRESS,
        UPSERT_DISK,
        DELETE_DISK,
    ];
}

#[derive(Default)]
struct State {
    next_id: ObjectId,
    references: BTreeMap<(ReferenceKind, String), ObjectId>,
    records: BTreeMap<ObjectId, SinkRecord>,
    interfaces: BTreeMap<ObjectId, (ParentRef, InterfaceRecord)>,
    ip_addresses: BTreeMap<ObjectId, IpAddressRecord>,
    disks: BTreeMap<ObjectId, (ObjectId, DiskRecord)>,
    attributes: BTreeMap<String, ExtensionAttribute>,
    writes: BTreeMap<&'static str, usize>,
    failures: Vec<(&'static str, SinkError)>,
    strict_names: bool,
    lenient_custom_fields: bool,
    locked_schema: bool,
    no_create: BTreeSet<ReferenceKind>,
}

impl State {
    fn allocate(&mut self) -> ObjectId {
        self.next_id += 1;
        self.next_id
    }

    fn count(&mut self, op: &'static str) {
        *self.writes.entry(op).or_insert(0) += 1;
    }

    fn check_failure(&mut self, op: &'static str) -> Result<()> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(pos) => Err(self.failures.remove(pos).1),
            None => Ok(()),
        }
    }

    fn check_name(&self, field: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(SinkError::validation(field, "This field may not be blank."));
        }
        if self.strict_names && !name.chars().all(is_allowed_name_char) {
            return Err(SinkError::validation(
                field,
                format!("'{}' contains characters that cannot form a valid slug", name),
            ));
        }
        Ok(())
    }

    fn check_custom_fields(
        &self,
        target: ExtensionTarget,
        custom_fields: &BTreeMap<String, Value>,
    ) -> Result<()> {
        if self.lenient_custom_fields {
            return Ok(());
        }
        for name in custom_fields.keys() {
            let known = self
                .attributes
                .get(name)
                .is_some_and(|a| a.object_types.contains(&target));
            if !known {
                return Err(SinkError::validation(
                    "custom_fields",
                    format!("Unknown field name '{}' in custom field data.", name),
                ));
            }
        }
        Ok(())
    }

    fn check_primary_ip(&self, record: &SinkRecord, field: &str, ip: Option<ObjectId>, v4: bool) -> Result<()> {
        let Some(ip_id) = ip else { return Ok(()) };
        let Some(id) = record.id else {
            return Err(SinkError::validation(field, "cannot be set on a new record"));
        };
        let ip = self
            .ip_addresses
            .get(&ip_id)
            .ok_or_else(|| SinkError::validation(field, format!("unknown IP address {}", ip_id)))?;
        if ip.address.is_ipv4() != v4 {
            return Err(SinkError::validation(field, "wrong address family"));
        }
        let owned = ip.assigned.is_some_and(|a| {
            self.interfaces
                .get(&a.id)
                .is_some_and(|(p, _)| p.kind == record.kind && p.id == id)
        });
        if !owned {
            return Err(SinkError::validation(
                field,
                format!("{} is not assigned to this {}", ip.address, record.kind),
            ));
        }
        Ok(())
    }

    fn check_unique_name(&self, record: &SinkRecord) -> Result<()> {
        let clash = self.records.values().any(|other| {
            other.id != record.id
                && other.kind == record.kind
                && other.name.to_lowercase() == record.name.to_lowercase()
                && match record.kind {
                    ObjectKind::VirtualMachine => other.cluster == record.cluster,
                    ObjectKind::Device => other.site == record.site,
                }
        });
        if clash {
            return Err(SinkError::Conflict(format!(
                "{} named '{}' already exists",
                record.kind, record.name
            )));
        }
        Ok(())
    }

    fn reference(&mut self, kind: ReferenceKind, name: &str) -> Result<ObjectId> {
        self.keyed_reference(kind, name, name)
    }

    /// Look up or create a reference stored under `key`; only `name` feeds the slug.
    fn keyed_reference(&mut self, kind: ReferenceKind, key: &str, name: &str) -> Result<ObjectId> {
        if let Some(id) = self.references.get(&(kind, key.to_string())) {
            return Ok(*id);
        }
        if self.no_create.contains(&kind) {
            return Err(SinkError::NotFound(format!("{:?} '{}'", kind, name)));
        }
        if kind != ReferenceKind::Vlan {
            self.check_name("slug", name)?;
        }
        let id = self.allocate();
        self.references.insert((kind, key.to_string()), id);
        self.count(ops::CREATE_REFERENCE);
        Ok(id)
    }
}

fn is_allowed_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-' | '(' | ')')
}

/// Sink client backed by in-process maps.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<State>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Behaviour switches
    // =========================================================================

    /// Reject names and slugs outside `[A-Za-z0-9 ._()-]`.
    pub fn with_strict_names(self) -> Self {
        self.state().strict_names = true;
        self
    }

    /// Refuse to define new extension attributes.
    pub fn with_locked_schema(self) -> Self {
        self.state().locked_schema = true;
        self
    }

    /// Accept any custom field name without a definition.
    pub fn with_lenient_custom_fields(self) -> Self {
        self.state().lenient_custom_fields = true;
        self
    }

    /// Answer `NotFound` instead of creating missing references of `kind`.
    pub fn without_create(self, kind: ReferenceKind) -> Self {
        self.state().no_create.insert(kind);
        self
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: SinkError) {
        self.state().failures.push((op, err));
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Define an extension attribute without counting a write.
    pub fn register_attribute(&self, attribute: ExtensionAttribute) {
        self.state()
            .attributes
            .insert(attribute.name.clone(), attribute);
    }

    /// Store a reference object without counting a write.
    pub fn insert_reference(&self, kind: ReferenceKind, name: &str) -> ObjectId {
        let mut state = self.state();
        if let Some(id) = state.references.get(&(kind, name.to_string())) {
            return *id;
        }
        let id = state.allocate();
        state.references.insert((kind, name.to_string()), id);
        id
    }

    /// Store a record as-is, bypassing validation and counters.
    pub fn insert_record(&self, mut record: SinkRecord) -> SinkRecord {
        let mut state = self.state();
        let id = state.allocate();
        record.id = Some(id);
        state.records.insert(id, record.clone());
        record
    }

    /// Store an interface as-is, bypassing validation and counters.
    pub fn insert_interface(&self, parent: ParentRef, mut interface: InterfaceRecord) -> InterfaceRecord {
        let mut state = self.state();
        let id = state.allocate();
        interface.id = Some(id);
        state.interfaces.insert(id, (parent, interface.clone()));
        interface
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Writes counted for `op` (see [`ops`]).
    pub fn writes(&self, op: &str) -> usize {
        self.state().writes.get(op).copied().unwrap_or(0)
    }

    /// Writes counted across every operation.
    pub fn total_writes(&self) -> usize {
        self.state().writes.values().sum()
    }

    /// Writes to interfaces, IP addresses and disks.
    pub fn child_writes(&self) -> usize {
        ops::CHILD.iter().map(|op| self.writes(op)).sum()
    }

    pub fn records(&self, kind: ObjectKind) -> Vec<SinkRecord> {
        self.state()
            .records
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn record(&self, id: ObjectId) -> Option<SinkRecord> {
        self.state().records.get(&id).cloned()
    }

    pub fn interfaces(&self, parent: ParentRef) -> Vec<InterfaceRecord> {
        self.state()
            .interfaces
            .values()
            .filter(|(p, _)| *p == parent)
            .map(|(_, i)| i.clone())
            .collect()
    }

    pub fn ip_addresses(&self) -> Vec<IpAddressRecord> {
        self.state().ip_addresses.values().cloned().collect()
    }

    pub fn disks(&self, vm: ObjectId) -> Vec<DiskRecord> {
        self.state()
            .disks
            .values()
            .filter(|(owner, _)| *owner == vm)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn reference(&self, kind: ReferenceKind, name: &str) -> Option<ObjectId> {
        self.state()
            .references
            .get(&(kind, name.to_string()))
            .copied()
    }

    /// Names of the tags with the given ids.
    pub fn tag_names(&self, ids: &BTreeSet<ObjectId>) -> BTreeSet<String> {
        self.state()
            .references
            .iter()
            .filter(|((kind, _), id)| *kind == ReferenceKind::Tag && ids.contains(id))
            .map(|((_, name), _)| name.clone())
            .collect()
    }

    pub fn attribute_names(&self) -> BTreeSet<String> {
        self.state().attributes.keys().cloned().collect()
    }
}

#[async_trait]
impl SinkClient for MemorySink {
    async fn get_or_create_cluster_type(&self, name: &str) -> Result<ObjectId> {
        let mut state = self.state();
        state.check_failure("get_or_create_cluster_type")?;
        state.reference(ReferenceKind::ClusterType, name)
    }

    async fn get_or_create_cluster(&self, name: &str, _cluster_type: ObjectId) -> Result<ObjectId> {
        let mut state = self.state();
        state.check_failure("get_or_create_cluster")?;
        state.reference(ReferenceKind::Cluster, name)
    }

    async fn get_or_create_site(&self, name: &str) -> Result<ObjectId> {
        let mut state = self.state();
        state.check_failure("get_or_create_site")?;
        state.reference(ReferenceKind::Site, name)
    }

    async fn get_or_create_role(&self, name: &str) -> Result<ObjectId> {
        let mut state = self.state();
        state.check_failure("get_or_create_role")?;
        state.reference(ReferenceKind::Role, name)
    }

    async fn get_or_create_manufacturer(&self, name: &str) -> Result<ObjectId> {
        let mut state = self.state();
        state.check_failure("get_or_create_manufacturer")?;
        state.reference(ReferenceKind::Manufacturer, name)
    }

    async fn get_or_create_device_type(
        &self,
        model: &str,
        manufacturer: ObjectId,
    ) -> Result<ObjectId> {
        let mut state = self.state();
        state.check_failure("get_or_create_device_type")?;
        let key = format!("{}#{}", manufacturer, model);
        state.keyed_reference(ReferenceKind::DeviceType, &key, model)
    }

    async fn get_or_create_platform(&self, name: &str) -> Result<ObjectId> {
        let mut state = self.state();
        state.check_failure("get_or_create_platform")?;
        state.reference(ReferenceKind::Platform, name)
    }

    async fn get_or_create_tag(&self, name: &str) -> Result<ObjectId> {
        let mut state = self.state();
        state.check_failure("get_or_create_tag")?;
        state.reference(ReferenceKind::Tag, name)
    }

    async fn get_or_create_vlan(&self, vid: u16) -> Result<ObjectId> {
        let mut state = self.state();
        state.check_failure("get_or_create_vlan")?;
        state.reference(ReferenceKind::Vlan, &vid.to_string())
    }

    async fn find_records(&self, query: &RecordQuery) -> Result<Vec<SinkRecord>> {
        let mut state = self.state();
        state.check_failure("find_records")?;
        Ok(state
            .records
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }

    async fn upsert_record(&self, record: &SinkRecord) -> Result<SinkRecord> {
        let mut state = self.state();
        state.check_failure(ops::UPSERT_RECORD)?;
        state.check_name("name", &record.name)?;
        state.check_custom_fields(ExtensionTarget::record(record.kind), &record.custom_fields)?;
        state.check_unique_name(record)?;
        state.check_primary_ip(record, "primary_ip4", record.primary_ip4, true)?;
        state.check_primary_ip(record, "primary_ip6", record.primary_ip6, false)?;

        let mut stored = record.clone();
        match record.id {
            Some(id) => {
                if !state.records.contains_key(&id) {
                    return Err(SinkError::NotFound(format!("{} {}", record.kind, id)));
                }
            }
            None => stored.id = Some(state.allocate()),
        }
        if let Some(id) = stored.id {
            state.records.insert(id, stored.clone());
        }
        state.count(ops::UPSERT_RECORD);
        Ok(stored)
    }

    async fn mark_orphan(&self, kind: ObjectKind, id: ObjectId, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state();
        state.check_failure(ops::MARK_ORPHAN)?;
        let record = state
            .records
            .get_mut(&id)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| SinkError::NotFound(format!("{} {}", kind, id)))?;
        record.custom_fields.insert(
            fields::SYNC_STATE.to_string(),
            Value::from(fields::STATE_DELETED),
        );
        record.custom_fields.insert(
            fields::LAST_SYNC.to_string(),
            Value::from(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        state.count(ops::MARK_ORPHAN);
        Ok(())
    }

    async fn list_interfaces(&self, parent: ParentRef) -> Result<Vec<InterfaceRecord>> {
        self.state().check_failure("list_interfaces")?;
        Ok(self.interfaces(parent))
    }

    async fn upsert_interface(
        &self,
        parent: ParentRef,
        interface: &InterfaceRecord,
    ) -> Result<InterfaceRecord> {
        let mut state = self.state();
        state.check_failure(ops::UPSERT_INTERFACE)?;
        state.check_name("name", &interface.name)?;
        state.check_custom_fields(ExtensionTarget::interface(parent.kind), &interface.custom_fields)?;
        if !state.records.contains_key(&parent.id) {
            return Err(SinkError::NotFound(format!("{} {}", parent.kind, parent.id)));
        }
        let duplicate = state.interfaces.iter().any(|(id, (p, i))| {
            *p == parent && i.name == interface.name && Some(*id) != interface.id
        });
        if duplicate {
            return Err(SinkError::Conflict(format!(
                "interface '{}' already exists",
                interface.name
            )));
        }

        let mut stored = interface.clone();
        match interface.id {
            Some(id) => {
                if !state.interfaces.contains_key(&id) {
                    return Err(SinkError::NotFound(format!("interface {}", id)));
                }
            }
            None => stored.id = Some(state.allocate()),
        }
        if let Some(id) = stored.id {
            state.interfaces.insert(id, (parent, stored.clone()));
        }
        state.count(ops::UPSERT_INTERFACE);
        Ok(stored)
    }

    async fn delete_interface(&self, kind: ObjectKind, id: ObjectId) -> Result<()> {
        let mut state = self.state();
        state.check_failure(ops::DELETE_INTERFACE)?;
        let parent = match state.interfaces.get(&id) {
            Some((parent, _)) if parent.kind == kind => *parent,
            _ => return Err(SinkError::NotFound(format!("interface {}", id))),
        };
        state.interfaces.remove(&id);

        let mut released = Vec::new();
        for (ip_id, ip) in state.ip_addresses.iter_mut() {
            if ip.assigned.is_some_and(|a| a.id == id) {
                ip.assigned = None;
                released.push(*ip_id);
            }
        }
        if let Some(record) = state.records.get_mut(&parent.id) {
            if record.primary_ip4.is_some_and(|p| released.contains(&p)) {
                record.primary_ip4 = None;
            }
            if record.primary_ip6.is_some_and(|p| released.contains(&p)) {
                record.primary_ip6 = None;
            }
        }
        state.count(ops::DELETE_INTERFACE);
        Ok(())
    }

    async fn list_ip_addresses(&self, interface: InterfaceRef) -> Result<Vec<IpAddressRecord>> {
        let mut state = self.state();
        state.check_failure("list_ip_addresses")?;
        Ok(state
            .ip_addresses
            .values()
            .filter(|ip| ip.assigned == Some(interface))
            .cloned()
            .collect())
    }

    async fn find_ip_address(&self, address: &IpNetwork) -> Result<Option<IpAddressRecord>> {
        let mut state = self.state();
        state.check_failure("find_ip_address")?;
        Ok(state
            .ip_addresses
            .values()
            .find(|ip| ip.address == *address)
            .or_else(|| {
                state
                    .ip_addresses
                    .values()
                    .find(|ip| ip.address.ip() == address.ip())
            })
            .cloned())
    }

    async fn upsert_ip_address(&self, ip: &IpAddressRecord) -> Result<IpAddressRecord> {
        let mut state = self.state();
        state.check_failure(ops::UPSERT_IP_ADDRESS)?;
        if let Some(target) = ip.assigned {
            let exists = state
                .interfaces
                .get(&target.id)
                .is_some_and(|(p, _)| p.kind == target.kind);
            if !exists {
                return Err(SinkError::validation(
                    "assigned_object_id",
                    format!("interface {} does not exist", target.id),
                ));
            }
        }

        let mut stored = ip.clone();
        match ip.id {
            Some(id) => {
                if !state.ip_addresses.contains_key(&id) {
                    return Err(SinkError::NotFound(format!("IP address {}", id)));
                }
            }
            None => stored.id = Some(state.allocate()),
        }
        if let Some(id) = stored.id {
            state.ip_addresses.insert(id, stored.clone());
        }
        state.count(ops::UPSERT_IP_ADDRESS);
        Ok(stored)
    }

    async fn unassign_ip_address(&self, id: ObjectId) -> Result<()> {
        let mut state = self.state();
        state.check_failure(ops::UNASSIGN_IP_ADDRESS)?;
        let is_primary = state
            .records
            .values()
            .any(|r| r.primary_ip4 == Some(id) || r.primary_ip6 == Some(id));
        if is_primary {
            return Err(SinkError::validation(
                "assigned_object",
                "Cannot reassign IP address while it is designated as the primary IP for the parent object",
            ));
        }
        let ip = state
            .ip_addresses
            .get_mut(&id)
            .ok_or_else(|| SinkError::NotFound(format!("IP address {}", id)))?;
        ip.assigned = None;
        state.count(ops::UNASSIGN_IP_ADDRESS);
        Ok(())
    }

    async fn list_disks(&self, vm: ObjectId) -> Result<Vec<DiskRecord>> {
        self.state().check_failure("list_disks")?;
        Ok(self.disks(vm))
    }

    async fn upsert_disk(&self, vm: ObjectId, disk: &DiskRecord) -> Result<DiskRecord> {
        let mut state = self.state();
        state.check_failure(ops::UPSERT_DISK)?;
        state.check_name("name", &disk.name)?;
        state.check_custom_fields(ExtensionTarget::VirtualDisk, &disk.custom_fields)?;
        if !state.records.contains_key(&vm) {
            return Err(SinkError::NotFound(format!("virtual machine {}", vm)));
        }

        let mut stored = disk.clone();
        match disk.id {
            Some(id) => {
                if !state.disks.contains_key(&id) {
                    return Err(SinkError::NotFound(format!("virtual disk {}", id)));
                }
            }
            None => stored.id = Some(state.allocate()),
        }
        if let Some(id) = stored.id {
            state.disks.insert(id, (vm, stored.clone()));
        }
        state.count(ops::UPSERT_DISK);
        Ok(stored)
    }

    async fn delete_disk(&self, id: ObjectId) -> Result<()> {
        let mut state = self.state();
        state.check_failure(ops::DELETE_DISK)?;
        state
            .disks
            .remove(&id)
            .ok_or_else(|| SinkError::NotFound(format!("virtual disk {}", id)))?;
        state.count(ops::DELETE_DISK);
        Ok(())
    }

    async fn list_extension_attributes(&self) -> Result<Vec<ExtensionAttribute>> {
        let mut state = self.state();
        state.check_failure("list_extension_attributes")?;
        Ok(state.attributes.values().cloned().collect())
    }

    async fn ensure_extension_attribute(&self, attribute: &ExtensionAttribute) -> Result<()> {
        let mut state = self.state();
        state.check_failure(ops::ENSURE_EXTENSION_ATTRIBUTE)?;
        let covered = state
            .attributes
            .get(&attribute.name)
            .is_some_and(|a| attribute.object_types.is_subset(&a.object_types));
        if covered {
            return Ok(());
        }
        if state.locked_schema {
            return Err(SinkError::validation(
                "name",
                format!("custom field '{}' cannot be created", attribute.name),
            ));
        }
        let entry = state
            .attributes
            .entry(attribute.name.clone())
            .or_insert_with(|| ExtensionAttribute {
                object_types: BTreeSet::new(),
                ..attribute.clone()
            });
        entry.object_types.extend(attribute.object_types.iter().copied());
        state.count(ops::ENSURE_EXTENSION_ATTRIBUTE);
        Ok(())
    }
}
