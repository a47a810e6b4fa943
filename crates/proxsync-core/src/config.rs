// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine and per-node configuration.

use crate::error::{Result, SyncError};

/// Cluster type used when none is configured.
pub const DEFAULT_CLUSTER_TYPE: &str = "Proxmox VE";

/// Device role given to nodes when none is configured.
pub const DEFAULT_NODE_ROLE: &str = "Hypervisor";

/// Batch-wide engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Cluster type every node cluster is filed under.
    pub cluster_type_name: String,
    /// Run the orphan pass after an instance batch.
    pub mark_orphans: bool,
    /// Create or extend missing extension attribute definitions before writing.
    pub ensure_extension_attributes: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cluster_type_name: DEFAULT_CLUSTER_TYPE.to_string(),
            mark_orphans: true,
            ensure_extension_attributes: true,
        }
    }
}

impl SyncConfig {
    /// Load settings from environment variables.
    ///
    /// Environment variables:
    /// - `NETBOX_CLUSTER_TYPE_NAME`: cluster type (default: "Proxmox VE")
    /// - `PROXSYNC_MARK_ORPHANS`: run the orphan pass (default: true)
    /// - `PROXSYNC_ENSURE_CUSTOM_FIELDS`: define missing custom fields (default: true)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let cluster_type_name = non_empty_var("NETBOX_CLUSTER_TYPE_NAME")
            .unwrap_or(defaults.cluster_type_name);
        Ok(Self {
            cluster_type_name,
            mark_orphans: bool_var("PROXSYNC_MARK_ORPHANS", defaults.mark_orphans)?,
            ensure_extension_attributes: bool_var(
                "PROXSYNC_ENSURE_CUSTOM_FIELDS",
                defaults.ensure_extension_attributes,
            )?,
        })
    }

    pub fn with_cluster_type_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_type_name = name.into();
        self
    }

    pub fn with_mark_orphans(mut self, enabled: bool) -> Self {
        self.mark_orphans = enabled;
        self
    }

    pub fn with_ensure_extension_attributes(mut self, enabled: bool) -> Self {
        self.ensure_extension_attributes = enabled;
        self
    }
}

/// Where one Proxmox node lands in NetBox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeScope {
    /// Proxmox node name.
    pub node: String,
    /// NetBox cluster holding the node's guests.
    pub cluster_name: String,
    pub site: Option<String>,
    pub role: String,
    pub manufacturer: Option<String>,
    pub device_type: Option<String>,
    /// Platform of the node device; derived from the PVE version when unset.
    pub platform: Option<String>,
}

impl NodeScope {
    /// Scope for `node`, with its guests in a cluster of the same name.
    pub fn new(node: impl Into<String>) -> Self {
        let node = node.into();
        Self {
            cluster_name: node.clone(),
            node,
            site: None,
            role: DEFAULT_NODE_ROLE.to_string(),
            manufacturer: None,
            device_type: None,
            platform: None,
        }
    }

    /// Load the scope of node `id` from `PROXMOX_NODE_<ID>_*` variables.
    ///
    /// `NODE_NAME` is required; the `NETBOX_*` parameters are optional.
    pub fn from_env(id: &str) -> Result<Self> {
        let prefix = format!("PROXMOX_NODE_{}_", id.to_uppercase());
        let var = |param: &str| non_empty_var(&format!("{}{}", prefix, param));

        let node = var("NODE_NAME")
            .ok_or_else(|| SyncError::Config(format!("missing {}NODE_NAME", prefix)))?;
        let mut scope = Self::new(node);
        if let Some(cluster) = var("NETBOX_CLUSTER_NAME") {
            scope.cluster_name = cluster;
        }
        if let Some(role) = var("NETBOX_NODE_DEVICE_ROLE_NAME") {
            scope.role = role;
        }
        scope.site = var("NETBOX_NODE_SITE_NAME");
        scope.manufacturer = var("NETBOX_NODE_MANUFACTURER_NAME");
        scope.device_type = var("NETBOX_NODE_DEVICE_TYPE_NAME");
        scope.platform = var("NETBOX_NODE_PLATFORM_NAME");
        Ok(scope)
    }

    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    pub fn with_site(mut self, name: impl Into<String>) -> Self {
        self.site = Some(name.into());
        self
    }

    pub fn with_role(mut self, name: impl Into<String>) -> Self {
        self.role = name.into();
        self
    }

    /// Set manufacturer and device type model together.
    pub fn with_hardware(mut self, manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self.device_type = Some(model.into());
        self
    }

    pub fn with_platform(mut self, name: impl Into<String>) -> Self {
        self.platform = Some(name.into());
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bool_var(name: &str, default: bool) -> Result<bool> {
    match non_empty_var(name) {
        None => Ok(default),
        Some(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(SyncError::Config(format!(
                "invalid boolean for {}: '{}'",
                name, value
            ))),
        },
    }
}
