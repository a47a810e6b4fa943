// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Proxmox VE inventory source for proxsync.
//!
//! Reads nodes, virtual machines and containers from the Proxmox VE JSON API
//! and turns them into typed, immutable snapshots.
//!
//! # Example
//!
//! ```no_run
//! use proxsync_source::{ProxmoxClient, ProxmoxConfig, SourceClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProxmoxConfig::new("pve1.example.net", "pve1")
//!     .with_user("sync@pve")
//!     .with_token("netbox", "00000000-0000-0000-0000-000000000000");
//! let client = ProxmoxClient::new(config)?;
//!
//! for guest in client.list_instances("pve1").await? {
//!     println!("{} {} {}", guest.vmid, guest.name, guest.status);
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod memory;
pub mod parse;
mod types;

pub use client::{ProxmoxClient, SourceClient};
pub use config::{DEFAULT_API_PORT, ProxmoxConfig};
pub use error::{Result, SourceError};
pub use memory::StaticSource;
pub use types::{
    DiskSpec, HostInterfaceKind, HostInterfaceSpec, InstanceKind, InstanceStatus, KindDetails,
    NetworkInterfaceSpec, SourceInstance, SourceNode,
};
