// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node discovery and per-node configuration.

use std::collections::BTreeSet;

use proxsync_core::{NodeScope, SyncError};
use proxsync_source::{ProxmoxConfig, SourceError};

/// Prefix of every per-node variable: `PROXMOX_NODE_<ID>_<PARAM>`.
pub const NODE_PREFIX: &str = "PROXMOX_NODE_";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// No `PROXMOX_NODE_*` variables at all.
    #[error("no Proxmox nodes configured (expected PROXMOX_NODE_<ID>_HOST and related variables)")]
    NoNodes,

    /// The requested node matches neither an id nor a node name.
    #[error("unknown node '{query}', configured: {}", .known.join(", "))]
    UnknownNode { query: String, known: Vec<String> },

    #[error("invalid source configuration: {0}")]
    Source(#[from] SourceError),

    #[error("invalid sync configuration: {0}")]
    Sync(#[from] SyncError),
}

/// Everything needed to sync one configured node.
#[derive(Debug, Clone)]
pub struct NodeProfile {
    /// Upper-cased id from the variable names.
    pub id: String,
    pub source: ProxmoxConfig,
    pub scope: NodeScope,
}

impl NodeProfile {
    pub fn from_env(id: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            id: id.to_uppercase(),
            source: ProxmoxConfig::from_env(id)?,
            scope: NodeScope::from_env(id)?,
        })
    }
}

/// Node ids found among `vars`, sorted and without duplicates.
///
/// The id is the part between the prefix and the next underscore.
pub fn node_ids<I, K>(vars: I) -> Vec<String>
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    let ids: BTreeSet<String> = vars
        .into_iter()
        .filter_map(|key| {
            let rest = key.as_ref().strip_prefix(NODE_PREFIX)?;
            let (id, param) = rest.split_once('_')?;
            (!id.is_empty() && !param.is_empty()).then(|| id.to_uppercase())
        })
        .collect();
    ids.into_iter().collect()
}

/// Node ids configured in the process environment.
pub fn configured_node_ids() -> Vec<String> {
    node_ids(std::env::vars().map(|(key, _)| key))
}

/// Load the profile whose id or node name matches `query` (case-insensitive).
pub fn find_profile(query: &str) -> Result<NodeProfile, ConfigError> {
    let ids = configured_node_ids();
    if ids.is_empty() {
        return Err(ConfigError::NoNodes);
    }
    if let Some(id) = ids.iter().find(|id| id.eq_ignore_ascii_case(query)) {
        return NodeProfile::from_env(id);
    }
    for id in &ids {
        if let Ok(scope) = NodeScope::from_env(id) {
            if scope.node.eq_ignore_ascii_case(query) {
                return NodeProfile::from_env(id);
            }
        }
    }
    Err(ConfigError::UnknownNode {
        query: query.to_string(),
        known: ids,
    })
}
