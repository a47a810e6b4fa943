// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Source client trait and its Proxmox VE HTTP implementation.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::config::ProxmoxConfig;
use crate::error::{Result, SourceError};
use crate::parse::{attach_guest_addresses, parse_agent_interfaces, parse_instance, parse_node};
use crate::types::{InstanceKind, InstanceStatus, SourceInstance, SourceNode};

/// Read-only access to a hypervisor's inventory.
///
/// Both operations return a complete snapshot or an error; a partially read
/// listing is never returned.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Every VM and container on `node`, ordered by guest id.
    async fn list_instances(&self, node: &str) -> Result<Vec<SourceInstance>>;

    /// Hardware and network facts of `node` itself.
    async fn get_node(&self, node: &str) -> Result<SourceNode>;
}

/// Every Proxmox API response wraps its payload in `{"data": ...}`.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    data: T,
}

/// HTTP client for the Proxmox VE JSON API using token authentication.
pub struct ProxmoxClient {
    http: reqwest::Client,
    config: ProxmoxConfig,
    base: String,
}

impl ProxmoxClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ProxmoxConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&config.auth_header())
            .map_err(|e| SourceError::Config(format!("invalid API token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| SourceError::Config(format!("failed to create HTTP client: {}", e)))?;

        let base = config.api_base();
        Ok(Self { http, config, base })
    }

    /// Create a client from the `PROXMOX_NODE_<ID>_*` environment variables.
    pub fn from_env(node_id: &str) -> Result<Self> {
        Self::new(ProxmoxConfig::from_env(node_id)?)
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ProxmoxConfig {
        &self.config
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{}", self.base, path.trim_start_matches('/'));
        debug!(%url, "GET");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::NOT_FOUND => SourceError::NotFound(path.to_string()),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Unavailable(
                    format!("authentication rejected ({}) for {}", status, path),
                ),
                _ => SourceError::Unavailable(format!("{} returned {}: {}", path, status, body)),
            });
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        Ok(envelope.data)
    }

    async fn list_kind(&self, node: &str, kind: InstanceKind) -> Result<Vec<SourceInstance>> {
        let summaries: Vec<Map<String, Value>> = self
            .get(&format!("nodes/{}/{}", node, kind.api_segment()))
            .await?;

        let mut instances = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let vmid = summary
                .get("vmid")
                .map(|v| v.to_string().trim_matches('"').to_string())
                .ok_or_else(|| {
                    SourceError::malformed(
                        format!("nodes/{}/{}", node, kind.api_segment()),
                        "list entry without vmid",
                    )
                })?;

            let config: Map<String, Value> = self
                .get(&format!(
                    "nodes/{}/{}/{}/config",
                    node,
                    kind.api_segment(),
                    vmid
                ))
                .await?;

            let mut instance = parse_instance(kind, &summary, &config)?;
            if kind == InstanceKind::Vm && instance.status == InstanceStatus::Running {
                self.attach_agent_addresses(node, &mut instance).await;
            }
            instances.push(instance);
        }
        Ok(instances)
    }

    /// Guest-agent data is best effort: the agent may be missing or not running.
    async fn attach_agent_addresses(&self, node: &str, instance: &mut SourceInstance) {
        let path = format!(
            "nodes/{}/qemu/{}/agent/network-get-interfaces",
            node, instance.vmid
        );
        match self.get::<Value>(&path).await {
            Ok(payload) => {
                let guest = parse_agent_interfaces(&payload);
                attach_guest_addresses(&mut instance.interfaces, &guest);
            }
            Err(e) => {
                debug!(vmid = instance.vmid, error = %e, "guest agent data unavailable");
            }
        }
    }
}

#[async_trait]
impl SourceClient for ProxmoxClient {
    #[instrument(skip(self), fields(host = %self.config.host))]
    async fn list_instances(&self, node: &str) -> Result<Vec<SourceInstance>> {
        let mut instances = self.list_kind(node, InstanceKind::Vm).await?;
        instances.extend(self.list_kind(node, InstanceKind::Container).await?);
        instances.sort_by_key(|i| i.vmid);

        info!(count = instances.len(), "Fetched guest inventory");
        Ok(instances)
    }

    #[instrument(skip(self), fields(host = %self.config.host))]
    async fn get_node(&self, node: &str) -> Result<SourceNode> {
        let status: Map<String, Value> = self.get(&format!("nodes/{}/status", node)).await?;
        let version: Option<Map<String, Value>> = match self.get("version").await {
            Ok(v) => Some(v),
            Err(e) if !e.is_unavailable() => {
                warn!(error = %e, "Could not read API version");
                None
            }
            Err(e) => return Err(e),
        };
        let network: Vec<Map<String, Value>> =
            self.get(&format!("nodes/{}/network", node)).await?;

        let node = parse_node(&self.config.host, node, &status, version.as_ref(), &network)?;
        info!(
            interfaces = node.interfaces.len(),
            version = ?node.pve_version,
            "Fetched node facts"
        );
        Ok(node)
    }
}
