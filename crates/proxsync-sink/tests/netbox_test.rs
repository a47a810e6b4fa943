// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP tests for the NetBox client against a mock API.

use chrono::{TimeZone, Utc};
use proxsync_sink::{
    ExtensionAttribute, ExtensionTarget, FieldType, InterfaceRecord, NetboxClient, NetboxConfig,
    ObjectKind, ParentRef, RecordQuery, SinkClient, SinkError,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> NetboxClient {
    NetboxClient::new(NetboxConfig::new(server.uri(), "secret")).unwrap()
}

fn page(results: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "count": results.as_array().map(|r| r.len()).unwrap_or(0),
        "next": null,
        "results": results,
    }))
}

#[tokio::test]
async fn test_get_or_create_returns_existing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/dcim/sites/"))
        .and(query_param("name", "lab"))
        .and(header("Authorization", "Token secret"))
        .respond_with(page(json!([
            {"id": 3, "name": "lab-2"},
            {"id": 7, "name": "lab"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/dcim/sites/"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let id = client_for(&server).get_or_create_site("lab").await.unwrap();
    assert_eq!(id, 7);
}

#[tokio::test]
async fn test_get_or_create_posts_name_and_slug() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/dcim/device-roles/"))
        .respond_with(page(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/dcim/device-roles/"))
        .and(body_partial_json(json!({
            "name": "Proxmox Node",
            "slug": "proxmox-node",
            "vm_role": false
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 12})))
        .expect(1)
        .mount(&server)
        .await;

    let id = client_for(&server)
        .get_or_create_role("Proxmox Node")
        .await
        .unwrap();
    assert_eq!(id, 12);
}

#[tokio::test]
async fn test_find_records_follows_pages() {
    let server = MockServer::start().await;
    let next = format!(
        "{}/api/virtualization/virtual-machines/?cluster_id=4&limit=1&offset=1",
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/api/virtualization/virtual-machines/"))
        .and(query_param("offset", "1"))
        .respond_with(page(json!([{
            "id": 21, "name": "db-01", "status": {"value": "offline"},
            "cluster": {"id": 4}, "custom_fields": {"vmid": 101, "vm_status": "Deployed"}
        }])))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/virtualization/virtual-machines/"))
        .and(query_param("cluster_id", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 2,
            "next": next,
            "results": [{
                "id": 20, "name": "web-01", "status": {"value": "active"},
                "cluster": {"id": 4}, "vcpus": "2.00", "memory": 2048,
                "tags": [{"id": 5, "name": "prod"}],
                "custom_fields": {"vmid": 100, "vm_status": "Deployed", "bridge": null}
            }]
        })))
        .mount(&server)
        .await;

    let records = client_for(&server)
        .find_records(&RecordQuery::in_cluster(4))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "web-01");
    assert_eq!(records[0].vcpus, Some(2));
    assert_eq!(records[0].source_id(), Some(100));
    assert!(records[0].tags.contains(&5));
    assert!(!records[0].custom_fields.contains_key("bridge"));
    assert_eq!(records[1].source_id(), Some(101));
}

#[tokio::test]
async fn test_validation_error_maps_field() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/extras/tags/"))
        .respond_with(page(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/extras/tags/"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"slug": ["Enter a valid \"slug\"."]})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .get_or_create_tag("a/b")
        .await
        .unwrap_err();
    match err {
        SinkError::ValidationRejected { field, message } => {
            assert_eq!(field, "slug");
            assert!(message.contains("valid"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_duplicate_name_is_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/virtualization/virtual-machines/"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "__all__": ["Virtual machine with this Cluster and Name already exists."]
        })))
        .mount(&server)
        .await;

    let mut record = proxsync_sink::SinkRecord::new(ObjectKind::VirtualMachine, "web-01");
    record.cluster = Some(4);
    let err = client_for(&server).upsert_record(&record).await.unwrap_err();
    assert!(matches!(err, SinkError::Conflict(_)));
}

#[tokio::test]
async fn test_forbidden_is_transport() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("{\"detail\":\"Invalid token\"}"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .find_records(&RecordQuery::all(ObjectKind::Device))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_upsert_interface_links_mac_object() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/virtualization/interfaces/"))
        .and(body_partial_json(json!({"virtual_machine": 20, "name": "net0"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 31, "name": "net0", "enabled": true, "primary_mac_address": null
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/dcim/mac-addresses/"))
        .and(query_param("mac_address", "BC:24:11:AA:BB:CC"))
        .respond_with(page(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/dcim/mac-addresses/"))
        .and(body_partial_json(json!({
            "assigned_object_type": "virtualization.vminterface",
            "assigned_object_id": 31
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 77})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/virtualization/interfaces/31/"))
        .and(body_partial_json(json!({"primary_mac_address": 77})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 31})))
        .expect(1)
        .mount(&server)
        .await;

    let mut interface = InterfaceRecord::new("net0");
    interface.mac = Some("BC:24:11:AA:BB:CC".to_string());
    let parent = ParentRef {
        kind: ObjectKind::VirtualMachine,
        id: 20,
    };
    let stored = client_for(&server)
        .upsert_interface(parent, &interface)
        .await
        .unwrap();
    assert_eq!(stored.id, Some(31));
    assert_eq!(stored.mac.as_deref(), Some("BC:24:11:AA:BB:CC"));
}

#[tokio::test]
async fn test_mark_orphan_patches_custom_fields() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/virtualization/virtual-machines/20/"))
        .and(body_partial_json(json!({
            "custom_fields": {
                "vm_status": "Deleted",
                "vm_last_sync": "2025-03-01T12:00:00Z"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 20})))
        .expect(1)
        .mount(&server)
        .await;

    let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    client_for(&server)
        .mark_orphan(ObjectKind::VirtualMachine, 20, at)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_ensure_extension_attribute_extends_object_types() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/extras/custom-fields/"))
        .and(query_param("name", "bridge"))
        .respond_with(page(json!([{
            "id": 9, "name": "bridge", "type": {"value": "text"},
            "object_types": ["virtualization.vminterface"]
        }])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/extras/custom-fields/9/"))
        .and(body_partial_json(json!({
            "object_types": ["virtualization.vminterface", "dcim.interface"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let covered = ExtensionAttribute::new("bridge", "Bridge", FieldType::Text)
        .applies_to(ExtensionTarget::VmInterface);
    client.ensure_extension_attribute(&covered).await.unwrap();

    let wider = covered.applies_to(ExtensionTarget::DeviceInterface);
    client.ensure_extension_attribute(&wider).await.unwrap();
}
