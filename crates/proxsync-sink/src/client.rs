// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The sink client contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;

use crate::error::Result;
use crate::types::{
    DiskRecord, ExtensionAttribute, InterfaceRecord, InterfaceRef, IpAddressRecord, ObjectId,
    ObjectKind, ParentRef, RecordQuery, SinkRecord,
};

/// Operations the reconciliation engine needs from an inventory system.
///
/// Name-keyed `get_or_create_*` calls match names exactly and case-sensitively.
/// `upsert_*` calls create when the given record has no id and update it
/// otherwise, returning the stored state.
#[async_trait]
pub trait SinkClient: Send + Sync {
    // =========================================================================
    // Reference objects
    // =========================================================================

    async fn get_or_create_cluster_type(&self, name: &str) -> Result<ObjectId>;

    async fn get_or_create_cluster(&self, name: &str, cluster_type: ObjectId) -> Result<ObjectId>;

    async fn get_or_create_site(&self, name: &str) -> Result<ObjectId>;

    /// Device role.
    async fn get_or_create_role(&self, name: &str) -> Result<ObjectId>;

    async fn get_or_create_manufacturer(&self, name: &str) -> Result<ObjectId>;

    async fn get_or_create_device_type(&self, model: &str, manufacturer: ObjectId)
    -> Result<ObjectId>;

    async fn get_or_create_platform(&self, name: &str) -> Result<ObjectId>;

    async fn get_or_create_tag(&self, name: &str) -> Result<ObjectId>;

    /// VLAN by 802.1Q id.
    async fn get_or_create_vlan(&self, vid: u16) -> Result<ObjectId>;

    // =========================================================================
    // Records
    // =========================================================================

    /// Every record matching `query`, ordered by id.
    async fn find_records(&self, query: &RecordQuery) -> Result<Vec<SinkRecord>>;

    async fn upsert_record(&self, record: &SinkRecord) -> Result<SinkRecord>;

    /// Flag a record as gone from the source, keeping it in place.
    async fn mark_orphan(&self, kind: ObjectKind, id: ObjectId, at: DateTime<Utc>) -> Result<()>;

    // =========================================================================
    // Interfaces
    // =========================================================================

    async fn list_interfaces(&self, parent: ParentRef) -> Result<Vec<InterfaceRecord>>;

    async fn upsert_interface(
        &self,
        parent: ParentRef,
        interface: &InterfaceRecord,
    ) -> Result<InterfaceRecord>;

    async fn delete_interface(&self, kind: ObjectKind, id: ObjectId) -> Result<()>;

    // =========================================================================
    // IP addresses
    // =========================================================================

    /// Addresses assigned to one interface.
    async fn list_ip_addresses(&self, interface: InterfaceRef) -> Result<Vec<IpAddressRecord>>;

    /// The address object for `address`, assigned or not.
    async fn find_ip_address(&self, address: &IpNetwork) -> Result<Option<IpAddressRecord>>;

    async fn upsert_ip_address(&self, ip: &IpAddressRecord) -> Result<IpAddressRecord>;

    /// Detach an address from its interface without deleting it.
    async fn unassign_ip_address(&self, id: ObjectId) -> Result<()>;

    // =========================================================================
    // Virtual disks
    // =========================================================================

    async fn list_disks(&self, vm: ObjectId) -> Result<Vec<DiskRecord>>;

    async fn upsert_disk(&self, vm: ObjectId, disk: &DiskRecord) -> Result<DiskRecord>;

    async fn delete_disk(&self, id: ObjectId) -> Result<()>;

    // =========================================================================
    // Extension attributes
    // =========================================================================

    async fn list_extension_attributes(&self) -> Result<Vec<ExtensionAttribute>>;

    /// Create the attribute, or widen an existing one to the given object types.
    async fn ensure_extension_attribute(&self, attribute: &ExtensionAttribute) -> Result<()>;
}
