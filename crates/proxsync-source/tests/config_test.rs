// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment configuration tests for proxsync-source.

use std::env;
use std::time::Duration;

use proxsync_source::ProxmoxConfig;
use serial_test::serial;

fn set_node_env(id: &str, pairs: &[(&str, &str)]) {
    for (param, value) in pairs {
        unsafe { env::set_var(format!("PROXMOX_NODE_{}_{}", id, param), value) };
    }
}

fn clear_node_env(id: &str) {
    for param in [
        "HOST",
        "NODE_NAME",
        "USER",
        "TOKEN_NAME",
        "TOKEN_SECRET",
        "VERIFY_SSL",
        "TIMEOUT_SECS",
    ] {
        unsafe { env::remove_var(format!("PROXMOX_NODE_{}_{}", id, param)) };
    }
}

#[test]
#[serial]
fn test_from_env_reads_node_prefix() {
    clear_node_env("LAB");
    set_node_env(
        "LAB",
        &[
            ("HOST", "pve-lab.local"),
            ("NODE_NAME", "pve-lab"),
            ("USER", "sync@pve"),
            ("TOKEN_NAME", "netbox"),
            ("TOKEN_SECRET", "abc"),
            ("VERIFY_SSL", "false"),
            ("TIMEOUT_SECS", "5"),
        ],
    );

    let config = ProxmoxConfig::from_env("lab").unwrap();
    assert_eq!(config.host, "pve-lab.local");
    assert_eq!(config.node_name, "pve-lab");
    assert!(!config.verify_tls);
    assert_eq!(config.timeout, Duration::from_secs(5));
    assert_eq!(config.api_base(), "https://pve-lab.local:8006/api2/json");

    clear_node_env("LAB");
}

#[test]
#[serial]
fn test_from_env_missing_secret() {
    clear_node_env("LAB");
    set_node_env(
        "LAB",
        &[
            ("HOST", "pve-lab.local"),
            ("NODE_NAME", "pve-lab"),
            ("USER", "sync@pve"),
            ("TOKEN_NAME", "netbox"),
        ],
    );

    let err = ProxmoxConfig::from_env("LAB").unwrap_err();
    assert!(err.to_string().contains("PROXMOX_NODE_LAB_TOKEN_SECRET"));

    clear_node_env("LAB");
}

#[test]
#[serial]
fn test_verify_ssl_defaults_to_true() {
    clear_node_env("LAB");
    set_node_env(
        "LAB",
        &[
            ("HOST", "pve-lab.local"),
            ("NODE_NAME", "pve-lab"),
            ("USER", "sync@pve"),
            ("TOKEN_NAME", "netbox"),
            ("TOKEN_SECRET", "abc"),
        ],
    );

    let config = ProxmoxConfig::from_env("LAB").unwrap();
    assert!(config.verify_tls);
    assert_eq!(config.timeout, Duration::from_secs(30));

    clear_node_env("LAB");
}
