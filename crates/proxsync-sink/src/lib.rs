// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NetBox inventory sink for proxsync.
//!
//! [`SinkClient`] is the contract the reconciliation engine writes through.
//! [`NetboxClient`] implements it over the NetBox REST API and
//! [`MemorySink`] keeps everything in process for tests.
//!
//! # Example
//!
//! ```no_run
//! use proxsync_sink::{NetboxClient, NetboxConfig, RecordQuery, SinkClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = NetboxClient::new(NetboxConfig::new("https://netbox.example.net", "token"))?;
//! let cluster_type = client.get_or_create_cluster_type("Proxmox VE").await?;
//! let cluster = client.get_or_create_cluster("lab", cluster_type).await?;
//!
//! for vm in client.find_records(&RecordQuery::in_cluster(cluster)).await? {
//!     println!("{} {:?}", vm.name, vm.source_id());
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
pub mod memory;
mod netbox;
mod types;

pub use client::SinkClient;
pub use config::NetboxConfig;
pub use error::{Result, SinkError};
pub use memory::{MemorySink, ReferenceKind};
pub use netbox::{DEFAULT_ROLE_COLOR, NetboxClient};
pub use types::{
    DiskRecord, ExtensionAttribute, ExtensionTarget, FieldType, InterfaceRecord, InterfaceRef,
    IpAddressRecord, ObjectId, ObjectKind, ParentRef, RecordQuery, RecordStatus, SinkRecord,
    fields, slugify,
};
