// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection settings for the NetBox API.

use std::time::Duration;

use crate::error::{Result, SinkError};

/// Configuration for a [`NetboxClient`](crate::NetboxClient).
#[derive(Clone)]
pub struct NetboxConfig {
    /// Base URL, e.g. `https://netbox.example.net`.
    pub url: String,
    /// API token.
    pub token: String,
    /// Verify the server certificate.
    pub verify_tls: bool,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Page size for list requests.
    pub page_size: u32,
}

impl std::fmt::Debug for NetboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetboxConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl NetboxConfig {
    /// Create a configuration for the given URL and token.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            verify_tls: true,
            timeout: Duration::from_secs(30),
            page_size: 200,
        }
    }

    /// Create a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NETBOX_URL`: API base URL (required)
    /// - `NETBOX_TOKEN`: API token (required)
    /// - `NETBOX_VERIFY_TLS`: verify certificates (default: "true")
    /// - `PROXSYNC_HTTP_TIMEOUT_SECS`: request timeout (default: 30)
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("NETBOX_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SinkError::Config("missing NETBOX_URL".to_string()))?;
        let token = std::env::var("NETBOX_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SinkError::Config("missing NETBOX_TOKEN".to_string()))?;

        let verify_tls = std::env::var("NETBOX_VERIFY_TLS")
            .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        let timeout_secs: u64 = std::env::var("PROXSYNC_HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map_err(|e| SinkError::Config(format!("invalid PROXSYNC_HTTP_TIMEOUT_SECS: {}", e)))?;

        Ok(Self::new(url, token)
            .with_verify_tls(verify_tls)
            .with_timeout(Duration::from_secs(timeout_secs)))
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

    /// Set the list page size.
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Base URL of the REST API, with a trailing slash.
    pub fn api_base(&self) -> String {
        let url = self.url.trim().trim_end_matches('/');
        let url = url.strip_suffix("/api").unwrap_or(url);
        format!("{}/api/", url)
    }
}
