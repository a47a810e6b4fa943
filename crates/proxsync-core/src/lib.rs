// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mapping and reconciliation engine for proxsync.
//!
//! [`SyncEngine`] reads a node's guests (or the node itself) through a
//! [`SourceClient`](proxsync_source::SourceClient), maps them with
//! [`mapper`], and reconciles the matching NetBox records through a
//! [`SinkClient`](proxsync_sink::SinkClient). The result of a batch is a
//! [`SyncReport`] with one outcome per entity.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use proxsync_core::{NodeScope, Selection, SyncConfig, SyncEngine};
//! use proxsync_sink::{NetboxClient, NetboxConfig};
//! use proxsync_source::{ProxmoxClient, ProxmoxConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = ProxmoxClient::new(ProxmoxConfig::from_env("PVE1")?)?;
//! let sink = NetboxClient::new(NetboxConfig::from_env()?)?;
//!
//! let engine = SyncEngine::builder()
//!     .source(Arc::new(source))
//!     .sink(Arc::new(sink))
//!     .config(SyncConfig::from_env()?)
//!     .build()?;
//!
//! let scope = NodeScope::from_env("PVE1")?;
//! let report = engine.sync_instances(&scope, Selection::All).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;
pub mod extension;
pub mod identity;
pub mod mapper;
mod report;
pub mod sanitize;

pub use config::{DEFAULT_CLUSTER_TYPE, DEFAULT_NODE_ROLE, NodeScope, SyncConfig};
pub use engine::{Selection, SyncEngine, SyncEngineBuilder};
pub use error::{Result, SyncError};
pub use report::{EntityRef, EntityReport, Outcome, Summary, SyncReport};
