// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment configuration tests for proxsync-core.

use std::env;

use proxsync_core::{NodeScope, SyncConfig, SyncError};
use serial_test::serial;

const SYNC_VARS: &[&str] = &[
    "NETBOX_CLUSTER_TYPE_NAME",
    "PROXSYNC_MARK_ORPHANS",
    "PROXSYNC_ENSURE_CUSTOM_FIELDS",
];

const NODE_PARAMS: &[&str] = &[
    "NODE_NAME",
    "NETBOX_CLUSTER_NAME",
    "NETBOX_NODE_SITE_NAME",
    "NETBOX_NODE_DEVICE_ROLE_NAME",
    "NETBOX_NODE_MANUFACTURER_NAME",
    "NETBOX_NODE_DEVICE_TYPE_NAME",
    "NETBOX_NODE_PLATFORM_NAME",
];

fn clear_env() {
    for var in SYNC_VARS {
        unsafe { env::remove_var(var) };
    }
    for param in NODE_PARAMS {
        unsafe { env::remove_var(format!("PROXMOX_NODE_EDGE_{}", param)) };
    }
}

#[test]
#[serial]
fn test_sync_config_from_env() {
    clear_env();
    assert_eq!(SyncConfig::from_env().unwrap(), SyncConfig::default());

    unsafe {
        env::set_var("NETBOX_CLUSTER_TYPE_NAME", "PVE 8");
        env::set_var("PROXSYNC_MARK_ORPHANS", "no");
        env::set_var("PROXSYNC_ENSURE_CUSTOM_FIELDS", "0");
    }
    let config = SyncConfig::from_env().unwrap();
    assert_eq!(config.cluster_type_name, "PVE 8");
    assert!(!config.mark_orphans);
    assert!(!config.ensure_extension_attributes);

    clear_env();
}

#[test]
#[serial]
fn test_sync_config_rejects_bad_boolean() {
    clear_env();
    unsafe { env::set_var("PROXSYNC_MARK_ORPHANS", "sometimes") };

    let err = SyncConfig::from_env().unwrap_err();
    assert!(matches!(err, SyncError::Config(ref m) if m.contains("PROXSYNC_MARK_ORPHANS")));

    clear_env();
}

#[test]
#[serial]
fn test_node_scope_from_env() {
    clear_env();
    unsafe {
        env::set_var("PROXMOX_NODE_EDGE_NODE_NAME", "pve-edge");
        env::set_var("PROXMOX_NODE_EDGE_NETBOX_CLUSTER_NAME", "edge");
        env::set_var("PROXMOX_NODE_EDGE_NETBOX_NODE_SITE_NAME", "Branch 1");
        env::set_var("PROXMOX_NODE_EDGE_NETBOX_NODE_MANUFACTURER_NAME", "Supermicro");
        env::set_var("PROXMOX_NODE_EDGE_NETBOX_NODE_DEVICE_TYPE_NAME", "SYS-E300");
    }

    let scope = NodeScope::from_env("edge").unwrap();
    assert_eq!(scope.node, "pve-edge");
    assert_eq!(scope.cluster_name, "edge");
    assert_eq!(scope.site.as_deref(), Some("Branch 1"));
    assert_eq!(scope.role, "Hypervisor");
    assert_eq!(scope.manufacturer.as_deref(), Some("Supermicro"));
    assert_eq!(scope.device_type.as_deref(), Some("SYS-E300"));
    assert!(scope.platform.is_none());

    clear_env();
}

#[test]
#[serial]
fn test_node_scope_requires_node_name() {
    clear_env();
    assert!(matches!(
        NodeScope::from_env("edge"),
        Err(SyncError::Config(_))
    ));
}
