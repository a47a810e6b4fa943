// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection settings for one Proxmox VE endpoint.

use std::time::Duration;

use crate::error::{Result, SourceError};

/// Default port of the Proxmox VE API.
pub const DEFAULT_API_PORT: u16 = 8006;

/// Configuration for a [`ProxmoxClient`](crate::ProxmoxClient).
#[derive(Clone)]
pub struct ProxmoxConfig {
    /// Host name, address, or full base URL of the API endpoint.
    pub host: String,
    /// Node name as Proxmox knows it (`pvesh get /nodes`).
    pub node_name: String,
    /// API user including realm, e.g. `root@pam`.
    pub user: String,
    /// API token id.
    pub token_name: String,
    /// API token secret.
    pub token_secret: String,
    /// Verify the server certificate.
    pub verify_tls: bool,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for ProxmoxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxmoxConfig")
            .field("host", &self.host)
            .field("node_name", &self.node_name)
            .field("user", &self.user)
            .field("token_name", &self.token_name)
            .field("token_secret", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ProxmoxConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            node_name: "pve".to_string(),
            user: "root@pam".to_string(),
            token_name: String::new(),
            token_secret: String::new(),
            verify_tls: true,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ProxmoxConfig {
    /// Create a configuration for the given host and node.
    pub fn new(host: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            node_name: node_name.into(),
            ..Self::default()
        }
    }

    /// Create a configuration from the `PROXMOX_NODE_<ID>_*` environment variables.
    ///
    /// Environment variables (`<ID>` is upper-cased):
    /// - `PROXMOX_NODE_<ID>_HOST`: API host (required)
    /// - `PROXMOX_NODE_<ID>_NODE_NAME`: node name (required)
    /// - `PROXMOX_NODE_<ID>_USER`: user with realm (required)
    /// - `PROXMOX_NODE_<ID>_TOKEN_NAME`: token id (required)
    /// - `PROXMOX_NODE_<ID>_TOKEN_SECRET`: token secret (required)
    /// - `PROXMOX_NODE_<ID>_VERIFY_SSL`: verify certificates (default: "true")
    /// - `PROXMOX_NODE_<ID>_TIMEOUT_SECS`: request timeout (default: 30)
    pub fn from_env(node_id: &str) -> Result<Self> {
        let prefix = format!("PROXMOX_NODE_{}_", node_id.to_uppercase());
        let required = |param: &str| -> Result<String> {
            let key = format!("{prefix}{param}");
            std::env::var(&key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| SourceError::Config(format!("missing {key}")))
        };

        let verify_tls = std::env::var(format!("{prefix}VERIFY_SSL"))
            .map(|v| parse_bool(&v))
            .unwrap_or(true);

        let timeout_secs: u64 = std::env::var(format!("{prefix}TIMEOUT_SECS"))
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|e| SourceError::Config(format!("invalid {prefix}TIMEOUT_SECS: {}", e)))?;

        Ok(Self {
            host: required("HOST")?,
            node_name: required("NODE_NAME")?,
            user: required("USER")?,
            token_name: required("TOKEN_NAME")?,
            token_secret: required("TOKEN_SECRET")?,
            verify_tls,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Set the API user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the API token id and secret.
    pub fn with_token(mut self, name: impl Into<String>, secret: impl Into<String>) -> Self {
        self.token_name = name.into();
        self.token_secret = secret.into();
        self
    }

    /// Enable or disable certificate verification.
    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL of the JSON API, without a trailing slash.
    pub fn api_base(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else if host.contains(':') && !host.starts_with('[') && host.matches(':').count() == 1 {
            format!("https://{host}")
        } else {
            format!("https://{host}:{DEFAULT_API_PORT}")
        };
        if base.ends_with("/api2/json") {
            base
        } else {
            format!("{base}/api2/json")
        }
    }

    /// Value of the `Authorization` header for token authentication.
    pub fn auth_header(&self) -> String {
        format!(
            "PVEAPIToken={}!{}={}",
            self.user, self.token_name, self.token_secret
        )
    }
}

pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
