// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! [`SinkClient`] implementation over the NetBox REST API.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use ipnetwork::IpNetwork;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument};

use crate::client::SinkClient;
use crate::config::NetboxConfig;
use crate::error::{Result, SinkError};
use crate::types::{
    DiskRecord, ExtensionAttribute, ExtensionTarget, FieldType, InterfaceRecord, InterfaceRef,
    IpAddressRecord, ObjectId, ObjectKind, ParentRef, RecordQuery, RecordStatus, SinkRecord,
    fields, slugify,
};

/// Color given to device roles created on demand.
pub const DEFAULT_ROLE_COLOR: &str = "00bcd4";

const MAC_ADDRESSES: &str = "dcim/mac-addresses/";
const IP_ADDRESSES: &str = "ipam/ip-addresses/";
const VIRTUAL_DISKS: &str = "virtualization/virtual-disks/";
const CUSTOM_FIELDS: &str = "extras/custom-fields/";

fn record_path(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::VirtualMachine => "virtualization/virtual-machines/",
        ObjectKind::Device => "dcim/devices/",
    }
}

fn interface_path(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::VirtualMachine => "virtualization/interfaces/",
        ObjectKind::Device => "dcim/interfaces/",
    }
}

fn parent_field(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::VirtualMachine => "virtual_machine",
        ObjectKind::Device => "device",
    }
}

/// NetBox API client using token authentication.
pub struct NetboxClient {
    http: reqwest::Client,
    config: NetboxConfig,
    base: String,
}

impl NetboxClient {
    /// Create a new client with the given configuration.
    pub fn new(config: NetboxConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Token {}", config.token))
            .map_err(|e| SinkError::Config(format!("invalid API token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| SinkError::Config(format!("failed to create HTTP client: {}", e)))?;

        let base = config.api_base();
        Ok(Self { http, config, base })
    }

    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(NetboxConfig::from_env()?)
    }

    /// Get the client configuration.
    pub fn config(&self) -> &NetboxConfig {
        &self.config
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }

    fn object_url(&self, path: &str, id: ObjectId) -> String {
        format!("{}{}/", self.url(path), id)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_for_status(status, what, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Fetch every page of a list endpoint.
    async fn list(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>> {
        debug!(path, ?query, "LIST");
        let mut out = Vec::new();
        let mut request = self
            .http
            .get(self.url(path))
            .query(query)
            .query(&[("limit", self.config.page_size)]);
        loop {
            let page = self.send(request, path).await?;
            let results = page
                .get("results")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    SinkError::UnexpectedResponse(format!("{} did not return a list", path))
                })?;
            out.extend(results.iter().cloned());
            match page.get("next").and_then(Value::as_str) {
                Some(next) => request = self.http.get(next),
                None => break,
            }
        }
        Ok(out)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        debug!(path, "POST");
        self.send(self.http.post(self.url(path)).json(body), path)
            .await
    }

    async fn patch(&self, path: &str, id: ObjectId, body: &Value) -> Result<Value> {
        debug!(path, id, "PATCH");
        self.send(self.http.patch(self.object_url(path, id)).json(body), path)
            .await
    }

    async fn delete(&self, path: &str, id: ObjectId) -> Result<()> {
        debug!(path, id, "DELETE");
        self.send(self.http.delete(self.object_url(path, id)), path)
            .await?;
        Ok(())
    }

    /// Find an object by exact name or create it with `name`, its slug and `extra`.
    async fn get_or_create_named(&self, path: &str, name: &str, extra: Value) -> Result<ObjectId> {
        let found = self.list(path, &[("name", name.to_string())]).await?;
        if let Some(existing) = found
            .iter()
            .find(|o| o.get("name").and_then(Value::as_str) == Some(name))
        {
            return id_of(existing);
        }

        let mut body = json!({ "name": name, "slug": slugify(name) });
        merge(&mut body, extra);
        let created = self.post(path, &body).await?;
        info!(path, name, "Created reference object");
        id_of(&created)
    }

    /// Attach `mac` to an interface through a MAC address object.
    ///
    /// Releases without MAC objects (before 4.2) get the plain `mac_address` field.
    async fn link_mac(&self, kind: ObjectKind, interface: ObjectId, mac: &str) -> Result<()> {
        let content_type = kind.interface_content_type();
        let candidates = match self
            .list(MAC_ADDRESSES, &[("mac_address", mac.to_string())])
            .await
        {
            Ok(list) => list,
            Err(SinkError::NotFound(_)) => {
                self.patch(
                    interface_path(kind),
                    interface,
                    &json!({ "mac_address": mac }),
                )
                .await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let assigned_here = candidates.iter().find(|m| {
            str_field(m, "mac_address").map(|s| s.to_uppercase()).as_deref() == Some(mac)
                && m.get("assigned_object_type").and_then(Value::as_str) == Some(content_type)
                && m.get("assigned_object_id").and_then(Value::as_u64) == Some(interface)
        });

        let mac_id = match assigned_here {
            Some(existing) => id_of(existing)?,
            None => {
                let created = self
                    .post(
                        MAC_ADDRESSES,
                        &json!({
                            "mac_address": mac,
                            "assigned_object_type": content_type,
                            "assigned_object_id": interface,
                        }),
                    )
                    .await?;
                id_of(&created)?
            }
        };

        self.patch(
            interface_path(kind),
            interface,
            &json!({ "primary_mac_address": mac_id }),
        )
        .await?;
        Ok(())
    }
}

// ============================================================================
// JSON mapping
// ============================================================================

fn error_for_status(status: StatusCode, what: &str, body: &str) -> SinkError {
    match status {
        StatusCode::NOT_FOUND => SinkError::NotFound(what.to_string()),
        StatusCode::CONFLICT => SinkError::Conflict(format!("{}: {}", what, body)),
        StatusCode::BAD_REQUEST => {
            let (field, message) = first_validation_error(body);
            if message.contains("already exists") {
                SinkError::Conflict(format!("{}: {}", what, message))
            } else {
                SinkError::ValidationRejected { field, message }
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SinkError::Transport(format!("authentication rejected ({}) for {}", status, what))
        }
        _ => SinkError::Transport(format!("{} returned {}: {}", what, status, body)),
    }
}

/// NetBox reports validation errors as `{"field": ["message", ...]}`.
fn first_validation_error(body: &str) -> (String, String) {
    let parsed: Option<Map<String, Value>> = serde_json::from_str(body).ok();
    parsed
        .and_then(|map| {
            map.into_iter().next().map(|(field, detail)| {
                let message = match detail {
                    Value::Array(items) => items
                        .iter()
                        .map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string()))
                        .collect::<Vec<_>>()
                        .join("; "),
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (field, message)
            })
        })
        .unwrap_or_else(|| ("request".to_string(), body.to_string()))
}

fn merge(target: &mut Value, extra: Value) {
    if let (Value::Object(target), Value::Object(extra)) = (target, extra) {
        target.extend(extra);
    }
}

fn id_of(value: &Value) -> Result<ObjectId> {
    value
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| SinkError::UnexpectedResponse("object without id".to_string()))
}

fn nested_id(value: &Value, key: &str) -> Option<ObjectId> {
    match value.get(key)? {
        Value::Object(obj) => obj.get("id")?.as_u64(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Choice fields come back as `{"value": ..., "label": ...}`.
fn choice_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::Object(obj) => obj.get("value")?.as_str().map(str::to_string),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Integers may come back as decimals (`"2.00"`, `2.0`).
fn number_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.round() as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as u64),
        _ => None,
    }
}

fn custom_fields_of(value: &Value) -> BTreeMap<String, Value> {
    value
        .get("custom_fields")
        .and_then(Value::as_object)
        .map(|cf| {
            cf.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn record_from_json(kind: ObjectKind, value: &Value) -> Result<SinkRecord> {
    let tags = value
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t.get("id").and_then(Value::as_u64).or_else(|| t.as_u64()))
                .collect()
        })
        .unwrap_or_default();

    Ok(SinkRecord {
        id: Some(id_of(value)?),
        kind,
        name: str_field(value, "name").unwrap_or_default(),
        status: choice_field(value, "status")
            .map(|s| RecordStatus::parse(&s))
            .unwrap_or(RecordStatus::Unknown),
        cluster: nested_id(value, "cluster"),
        site: nested_id(value, "site"),
        role: nested_id(value, "role").or_else(|| nested_id(value, "device_role")),
        device_type: nested_id(value, "device_type"),
        platform: nested_id(value, "platform"),
        vcpus: number_field(value, "vcpus").and_then(|v| u32::try_from(v).ok()),
        memory_mb: number_field(value, "memory"),
        disk_mb: number_field(value, "disk"),
        comments: str_field(value, "comments"),
        tags,
        custom_fields: custom_fields_of(value),
        primary_ip4: nested_id(value, "primary_ip4"),
        primary_ip6: nested_id(value, "primary_ip6"),
    })
}

fn record_payload(record: &SinkRecord) -> Value {
    let tags: Vec<Value> = record.tags.iter().map(|id| json!({ "id": id })).collect();
    let mut body = json!({
        "name": record.name,
        "site": record.site,
        "role": record.role,
        "platform": record.platform,
        "comments": record.comments.clone().unwrap_or_default(),
        "tags": tags,
        "custom_fields": record.custom_fields,
    });
    if record.status != RecordStatus::Unknown {
        merge(&mut body, json!({ "status": record.status.as_str() }));
    }
    match record.kind {
        ObjectKind::VirtualMachine => merge(
            &mut body,
            json!({
                "cluster": record.cluster,
                "vcpus": record.vcpus,
                "memory": record.memory_mb,
                "disk": record.disk_mb,
            }),
        ),
        ObjectKind::Device => merge(&mut body, json!({ "device_type": record.device_type })),
    }
    if record.id.is_some() {
        merge(
            &mut body,
            json!({
                "primary_ip4": record.primary_ip4,
                "primary_ip6": record.primary_ip6,
            }),
        );
    }
    body
}

fn interface_from_json(value: &Value) -> Result<InterfaceRecord> {
    let mac = value
        .get("primary_mac_address")
        .and_then(|m| m.get("mac_address"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| str_field(value, "mac_address"))
        .map(|m| m.to_uppercase());

    Ok(InterfaceRecord {
        id: Some(id_of(value)?),
        name: str_field(value, "name").unwrap_or_default(),
        enabled: value.get("enabled").and_then(Value::as_bool).unwrap_or(true),
        kind: choice_field(value, "type"),
        mac,
        mtu: number_field(value, "mtu").and_then(|v| u32::try_from(v).ok()),
        mode: choice_field(value, "mode"),
        untagged_vlan: nested_id(value, "untagged_vlan"),
        description: str_field(value, "description"),
        mgmt_only: value
            .get("mgmt_only")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        custom_fields: custom_fields_of(value),
    })
}

fn interface_payload(parent: ParentRef, interface: &InterfaceRecord) -> Value {
    let mut body = json!({
        (parent_field(parent.kind)): parent.id,
        "name": interface.name,
        "enabled": interface.enabled,
        "mtu": interface.mtu,
        "mode": interface.mode,
        "untagged_vlan": interface.untagged_vlan,
        "description": interface.description.clone().unwrap_or_default(),
        "custom_fields": interface.custom_fields,
    });
    if parent.kind == ObjectKind::Device {
        merge(
            &mut body,
            json!({
                "type": interface.kind.clone().unwrap_or_else(|| "other".to_string()),
                "mgmt_only": interface.mgmt_only,
            }),
        );
    }
    body
}

fn ip_from_json(value: &Value) -> Result<IpAddressRecord> {
    let raw = str_field(value, "address")
        .ok_or_else(|| SinkError::UnexpectedResponse("IP address without address".to_string()))?;
    let address: IpNetwork = raw
        .parse()
        .map_err(|e| SinkError::UnexpectedResponse(format!("invalid address '{}': {}", raw, e)))?;

    let kind = match value.get("assigned_object_type").and_then(Value::as_str) {
        Some("virtualization.vminterface") => Some(ObjectKind::VirtualMachine),
        Some("dcim.interface") => Some(ObjectKind::Device),
        _ => None,
    };
    let assigned = kind
        .zip(value.get("assigned_object_id").and_then(Value::as_u64))
        .map(|(kind, id)| InterfaceRef { kind, id });

    Ok(IpAddressRecord {
        id: Some(id_of(value)?),
        address,
        assigned,
    })
}

fn disk_from_json(value: &Value) -> Result<DiskRecord> {
    Ok(DiskRecord {
        id: Some(id_of(value)?),
        name: str_field(value, "name").unwrap_or_default(),
        size_mb: number_field(value, "size").unwrap_or(0),
        description: str_field(value, "description"),
        custom_fields: custom_fields_of(value),
    })
}

fn attribute_from_json(value: &Value) -> Option<ExtensionAttribute> {
    let name = str_field(value, "name")?;
    let field_type = match choice_field(value, "type").as_deref() {
        Some("integer") => FieldType::Integer,
        Some("decimal") => FieldType::Decimal,
        Some("boolean") => FieldType::Boolean,
        _ => FieldType::Text,
    };
    let object_types: BTreeSet<ExtensionTarget> = value
        .get("object_types")
        .or_else(|| value.get("content_types"))
        .and_then(Value::as_array)
        .map(|types| {
            types
                .iter()
                .filter_map(Value::as_str)
                .filter_map(ExtensionTarget::from_content_type)
                .collect()
        })
        .unwrap_or_default();
    Some(ExtensionAttribute {
        label: str_field(value, "label").unwrap_or_else(|| name.clone()),
        name,
        field_type,
        object_types,
    })
}

fn content_types(targets: &BTreeSet<ExtensionTarget>) -> Vec<&'static str> {
    targets.iter().map(ExtensionTarget::content_type).collect()
}

// ============================================================================
// SinkClient
// ============================================================================

#[async_trait]
impl SinkClient for NetboxClient {
    async fn get_or_create_cluster_type(&self, name: &str) -> Result<ObjectId> {
        self.get_or_create_named("virtualization/cluster-types/", name, json!({}))
            .await
    }

    async fn get_or_create_cluster(&self, name: &str, cluster_type: ObjectId) -> Result<ObjectId> {
        self.get_or_create_named(
            "virtualization/clusters/",
            name,
            json!({ "type": cluster_type, "status": "active" }),
        )
        .await
    }

    async fn get_or_create_site(&self, name: &str) -> Result<ObjectId> {
        self.get_or_create_named("dcim/sites/", name, json!({ "status": "active" }))
            .await
    }

    async fn get_or_create_role(&self, name: &str) -> Result<ObjectId> {
        self.get_or_create_named(
            "dcim/device-roles/",
            name,
            json!({ "color": DEFAULT_ROLE_COLOR, "vm_role": false }),
        )
        .await
    }

    async fn get_or_create_manufacturer(&self, name: &str) -> Result<ObjectId> {
        self.get_or_create_named("dcim/manufacturers/", name, json!({}))
            .await
    }

    async fn get_or_create_device_type(
        &self,
        model: &str,
        manufacturer: ObjectId,
    ) -> Result<ObjectId> {
        let path = "dcim/device-types/";
        let found = self
            .list(
                path,
                &[
                    ("model", model.to_string()),
                    ("manufacturer_id", manufacturer.to_string()),
                ],
            )
            .await?;
        if let Some(existing) = found
            .iter()
            .find(|o| o.get("model").and_then(Value::as_str) == Some(model))
        {
            return id_of(existing);
        }
        let created = self
            .post(
                path,
                &json!({
                    "model": model,
                    "slug": slugify(model),
                    "manufacturer": manufacturer,
                    "u_height": 1,
                }),
            )
            .await?;
        info!(model, "Created device type");
        id_of(&created)
    }

    async fn get_or_create_platform(&self, name: &str) -> Result<ObjectId> {
        self.get_or_create_named("dcim/platforms/", name, json!({}))
            .await
    }

    async fn get_or_create_tag(&self, name: &str) -> Result<ObjectId> {
        self.get_or_create_named("extras/tags/", name, json!({})).await
    }

    async fn get_or_create_vlan(&self, vid: u16) -> Result<ObjectId> {
        let path = "ipam/vlans/";
        let found = self.list(path, &[("vid", vid.to_string())]).await?;
        if let Some(existing) = found.first() {
            return id_of(existing);
        }
        let created = self
            .post(
                path,
                &json!({ "vid": vid, "name": format!("VLAN_{}", vid), "status": "active" }),
            )
            .await?;
        info!(vid, "Created VLAN");
        id_of(&created)
    }

    #[instrument(skip(self), fields(kind = ?query.kind))]
    async fn find_records(&self, query: &RecordQuery) -> Result<Vec<SinkRecord>> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(cluster) = query.cluster {
            params.push(("cluster_id", cluster.to_string()));
        }
        if let Some(source_id) = query.source_id {
            params.push(("cf_vmid", source_id.to_string()));
        }
        if let Some(name) = &query.name {
            params.push(("name", name.clone()));
        }

        let mut records = self
            .list(record_path(query.kind), &params)
            .await?
            .iter()
            .map(|v| record_from_json(query.kind, v))
            .collect::<Result<Vec<_>>>()?;
        records.retain(|r| query.matches(r));
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn upsert_record(&self, record: &SinkRecord) -> Result<SinkRecord> {
        let path = record_path(record.kind);
        let body = record_payload(record);
        let stored = match record.id {
            Some(id) => self.patch(path, id, &body).await?,
            None => {
                let created = self.post(path, &body).await?;
                info!(name = %record.name, kind = %record.kind, "Created record");
                created
            }
        };
        record_from_json(record.kind, &stored)
    }

    async fn mark_orphan(&self, kind: ObjectKind, id: ObjectId, at: DateTime<Utc>) -> Result<()> {
        let body = json!({
            "custom_fields": {
                (fields::SYNC_STATE): fields::STATE_DELETED,
                (fields::LAST_SYNC): at.to_rfc3339_opts(SecondsFormat::Secs, true),
            }
        });
        self.patch(record_path(kind), id, &body).await?;
        Ok(())
    }

    async fn list_interfaces(&self, parent: ParentRef) -> Result<Vec<InterfaceRecord>> {
        let filter = format!("{}_id", parent_field(parent.kind));
        self.list(
            interface_path(parent.kind),
            &[(filter.as_str(), parent.id.to_string())],
        )
        .await?
        .iter()
        .map(interface_from_json)
        .collect()
    }

    async fn upsert_interface(
        &self,
        parent: ParentRef,
        interface: &InterfaceRecord,
    ) -> Result<InterfaceRecord> {
        let path = interface_path(parent.kind);
        let body = interface_payload(parent, interface);
        let stored = match interface.id {
            Some(id) => self.patch(path, id, &body).await?,
            None => self.post(path, &body).await?,
        };
        let mut stored = interface_from_json(&stored)?;

        if let (Some(mac), Some(id)) = (interface.mac.as_deref(), stored.id) {
            if stored.mac.as_deref() != Some(mac) {
                self.link_mac(parent.kind, id, mac).await?;
                stored.mac = Some(mac.to_string());
            }
        }
        Ok(stored)
    }

    async fn delete_interface(&self, kind: ObjectKind, id: ObjectId) -> Result<()> {
        self.delete(interface_path(kind), id).await
    }

    async fn list_ip_addresses(&self, interface: InterfaceRef) -> Result<Vec<IpAddressRecord>> {
        let filter = match interface.kind {
            ObjectKind::VirtualMachine => "vminterface_id",
            ObjectKind::Device => "interface_id",
        };
        self.list(IP_ADDRESSES, &[(filter, interface.id.to_string())])
            .await?
            .iter()
            .map(ip_from_json)
            .collect()
    }

    async fn find_ip_address(&self, address: &IpNetwork) -> Result<Option<IpAddressRecord>> {
        let found = self
            .list(IP_ADDRESSES, &[("address", address.to_string())])
            .await?
            .iter()
            .map(ip_from_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(found
            .iter()
            .find(|ip| ip.address == *address)
            .or_else(|| found.iter().find(|ip| ip.address.ip() == address.ip()))
            .cloned())
    }

    async fn upsert_ip_address(&self, ip: &IpAddressRecord) -> Result<IpAddressRecord> {
        let body = json!({
            "address": ip.address.to_string(),
            "status": "active",
            "assigned_object_type": ip.assigned.map(|a| a.content_type()),
            "assigned_object_id": ip.assigned.map(|a| a.id),
        });
        let stored = match ip.id {
            Some(id) => self.patch(IP_ADDRESSES, id, &body).await?,
            None => self.post(IP_ADDRESSES, &body).await?,
        };
        ip_from_json(&stored)
    }

    async fn unassign_ip_address(&self, id: ObjectId) -> Result<()> {
        self.patch(
            IP_ADDRESSES,
            id,
            &json!({ "assigned_object_type": null, "assigned_object_id": null }),
        )
        .await?;
        Ok(())
    }

    async fn list_disks(&self, vm: ObjectId) -> Result<Vec<DiskRecord>> {
        self.list(VIRTUAL_DISKS, &[("virtual_machine_id", vm.to_string())])
            .await?
            .iter()
            .map(disk_from_json)
            .collect()
    }

    async fn upsert_disk(&self, vm: ObjectId, disk: &DiskRecord) -> Result<DiskRecord> {
        let body = json!({
            "virtual_machine": vm,
            "name": disk.name,
            "size": disk.size_mb,
            "description": disk.description.clone().unwrap_or_default(),
            "custom_fields": disk.custom_fields,
        });
        let stored = match disk.id {
            Some(id) => self.patch(VIRTUAL_DISKS, id, &body).await?,
            None => self.post(VIRTUAL_DISKS, &body).await?,
        };
        disk_from_json(&stored)
    }

    async fn delete_disk(&self, id: ObjectId) -> Result<()> {
        self.delete(VIRTUAL_DISKS, id).await
    }

    async fn list_extension_attributes(&self) -> Result<Vec<ExtensionAttribute>> {
        Ok(self
            .list(CUSTOM_FIELDS, &[])
            .await?
            .iter()
            .filter_map(attribute_from_json)
            .collect())
    }

    #[instrument(skip(self, attribute), fields(name = %attribute.name))]
    async fn ensure_extension_attribute(&self, attribute: &ExtensionAttribute) -> Result<()> {
        let found = self
            .list(CUSTOM_FIELDS, &[("name", attribute.name.clone())])
            .await?;
        let existing = found.iter().find(|v| {
            v.get("name").and_then(Value::as_str) == Some(attribute.name.as_str())
        });

        match existing {
            Some(value) => {
                let current = attribute_from_json(value).map(|a| a.object_types).unwrap_or_default();
                if attribute.object_types.is_subset(&current) {
                    return Ok(());
                }
                let merged: BTreeSet<ExtensionTarget> =
                    current.union(&attribute.object_types).copied().collect();
                self.patch(
                    CUSTOM_FIELDS,
                    id_of(value)?,
                    &json!({ "object_types": content_types(&merged) }),
                )
                .await?;
                info!("Extended custom field object types");
            }
            None => {
                self.post(
                    CUSTOM_FIELDS,
                    &json!({
                        "name": attribute.name,
                        "label": attribute.label,
                        "type": attribute.field_type.as_str(),
                        "object_types": content_types(&attribute.object_types),
                        "required": false,
                        "filter_logic": "loose",
                    }),
                )
                .await?;
                info!("Created custom field");
            }
        }
        Ok(())
    }
}
