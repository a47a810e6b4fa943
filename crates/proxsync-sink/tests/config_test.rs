// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment configuration tests for proxsync-sink.

use std::env;
use std::time::Duration;

use proxsync_sink::{NetboxConfig, SinkError};
use serial_test::serial;

const VARS: &[&str] = &[
    "NETBOX_URL",
    "NETBOX_TOKEN",
    "NETBOX_VERIFY_TLS",
    "PROXSYNC_HTTP_TIMEOUT_SECS",
];

fn clear_env() {
    for var in VARS {
        unsafe { env::remove_var(var) };
    }
}

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();
    unsafe {
        env::set_var("NETBOX_URL", "https://netbox.lan");
        env::set_var("NETBOX_TOKEN", "0123456789abcdef");
    }

    let config = NetboxConfig::from_env().unwrap();
    assert_eq!(config.api_base(), "https://netbox.lan/api/");
    assert!(config.verify_tls);
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert!(!format!("{:?}", config).contains("0123456789abcdef"));

    clear_env();
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    unsafe {
        env::set_var("NETBOX_URL", "http://127.0.0.1:8000/api/");
        env::set_var("NETBOX_TOKEN", "t");
        env::set_var("NETBOX_VERIFY_TLS", "false");
        env::set_var("PROXSYNC_HTTP_TIMEOUT_SECS", "5");
    }

    let config = NetboxConfig::from_env().unwrap();
    assert_eq!(config.api_base(), "http://127.0.0.1:8000/api/");
    assert!(!config.verify_tls);
    assert_eq!(config.timeout, Duration::from_secs(5));

    clear_env();
}

#[test]
#[serial]
fn test_from_env_requires_token() {
    clear_env();
    unsafe { env::set_var("NETBOX_URL", "https://netbox.lan") };

    let err = NetboxConfig::from_env().unwrap_err();
    assert!(matches!(err, SinkError::Config(ref m) if m.contains("NETBOX_TOKEN")));

    clear_env();
}

#[test]
#[serial]
fn test_from_env_rejects_bad_timeout() {
    clear_env();
    unsafe {
        env::set_var("NETBOX_URL", "https://netbox.lan");
        env::set_var("NETBOX_TOKEN", "t");
        env::set_var("PROXSYNC_HTTP_TIMEOUT_SECS", "soon");
    }

    assert!(NetboxConfig::from_env().is_err());

    clear_env();
}
