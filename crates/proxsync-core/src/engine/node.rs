// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node-to-device sync.

use chrono::Utc;
use proxsync_sink::{ExtensionTarget, ObjectKind, RecordQuery, SinkRecord};
use proxsync_source::SourceNode;
use tracing::{debug, info, instrument, warn};

use super::{Batch, SyncEngine, child_failure, record_changes, retry_sanitized};
use crate::config::NodeScope;
use crate::error::{Result, SyncError};
use crate::extension::apply_bag;
use crate::mapper::{self, MappedNode};
use crate::report::{EntityRef, Outcome, SyncReport};
use crate::sanitize::sanitize_name;

impl SyncEngine {
    /// Reconcile the hypervisor node itself as a device.
    #[instrument(skip(self, scope), fields(node = %scope.node))]
    pub async fn sync_node(&self, scope: &NodeScope) -> Result<SyncReport> {
        let mut report = SyncReport::new(Utc::now());
        let node = self.source.get_node(&scope.node).await?;
        let mut batch = self.prepare_batch().await?;

        let entity = EntityRef::device(&node.name);
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            report.push(entity, Outcome::skipped("cancelled"), Vec::new());
        } else {
            let mut warnings = Vec::new();
            let outcome = match self.sync_device(&mut batch, scope, &node, &mut warnings).await {
                Ok(outcome) => outcome,
                Err(err) if err.is_batch_fatal() => return Err(err),
                Err(err) => {
                    warn!(error = %err, "Node sync failed");
                    Outcome::failed(err)
                }
            };
            report.push(entity, outcome, warnings);
        }

        report.warnings.append(&mut batch.warnings);
        report.finished_at = Some(Utc::now());
        info!(summary = %report.summary(), "Node sync finished");
        Ok(report)
    }

    async fn sync_device(
        &self,
        batch: &mut Batch,
        scope: &NodeScope,
        node: &SourceNode,
        warnings: &mut Vec<String>,
    ) -> Result<Outcome> {
        let sink = self.sink.as_ref();
        let mapped = mapper::map_node(node);

        let site = required(&scope.site, "site", scope)?;
        let manufacturer = required(&scope.manufacturer, "manufacturer", scope)?;
        let model = required(&scope.device_type, "device type", scope)?;

        let site = retry_sanitized(site, |n| async move { sink.get_or_create_site(&n).await }).await?;
        let role =
            retry_sanitized(&scope.role, |n| async move { sink.get_or_create_role(&n).await }).await?;
        let manufacturer = retry_sanitized(manufacturer, |n| async move {
            sink.get_or_create_manufacturer(&n).await
        })
        .await?;
        let device_type = retry_sanitized(model, |n| async move {
            sink.get_or_create_device_type(&n, manufacturer).await
        })
        .await?;

        let platform_name = scope
            .platform
            .clone()
            .or_else(|| mapped.pve_version.as_ref().map(|v| format!("Proxmox VE {}", v)));

        let mut candidates = sink
            .find_records(&RecordQuery::all(ObjectKind::Device).with_name(&mapped.name))
            .await?;
        if candidates.is_empty() {
            // A previous run may have stored the sanitized name.
            if let Some(clean) = sanitize_name(&mapped.name).filter(|c| *c != mapped.name) {
                candidates = sink
                    .find_records(&RecordQuery::all(ObjectKind::Device).with_name(&clean))
                    .await?;
            }
        }
        let current = match candidates.as_slice() {
            [] => None,
            [record] => Some(record.clone()),
            many => {
                return Err(SyncError::IdentityAmbiguous {
                    entity: format!("device '{}'", mapped.name),
                    candidates: many.iter().filter_map(|r| r.id).collect(),
                });
            }
        };

        let platform = match &platform_name {
            Some(name) => match batch.platform(sink, name).await {
                Ok(id) => Some(id),
                Err(err) if err.is_transport() => return Err(err.into()),
                Err(err) => {
                    warnings.push(format!("platform '{}': {}", name, err));
                    current.as_ref().and_then(|c| c.platform)
                }
            },
            None => current.as_ref().and_then(|c| c.platform),
        };

        let mut desired = current
            .clone()
            .unwrap_or_else(|| SinkRecord::new(ObjectKind::Device, &mapped.name));
        desired.status = mapped.status;
        desired.site = Some(site);
        desired.role = Some(role);
        desired.device_type = Some(device_type);
        desired.platform = platform;
        let target = ExtensionTarget::Device;
        let mut bag = mapped.extensions.clone();
        batch.filter(target, &mut bag);
        apply_bag(&mut desired.custom_fields, &bag, &batch.managed(target));

        let now = Utc::now();
        let (mut record, outcome, stamped) = match &current {
            None => {
                desired.custom_fields.extend(batch.stamp(ObjectKind::Device, now));
                let stored = self.write_record(&desired).await?;
                info!(id = ?stored.id, "Created device");
                (stored, Outcome::Created, true)
            }
            Some(current) => {
                let changes = record_changes(current, &desired);
                if changes.is_empty() {
                    (current.clone(), Outcome::Updated { changes }, false)
                } else {
                    desired.custom_fields.extend(batch.stamp(ObjectKind::Device, now));
                    let stored = self.write_record(&desired).await?;
                    info!(id = ?stored.id, ?changes, "Updated device");
                    (stored, Outcome::Updated { changes }, true)
                }
            }
        };

        self.reconcile_host_interfaces(batch, &mut record, &mapped, warnings)
            .await?;

        if !stamped {
            let stamp = batch.stamp(ObjectKind::Device, now);
            if !stamp.is_empty() {
                record.custom_fields.extend(stamp);
                if let Err(err) = sink.upsert_record(&record).await {
                    child_failure(err, "sync stamp".to_string(), warnings)?;
                }
            }
        }
        Ok(outcome)
    }

    async fn reconcile_host_interfaces(
        &self,
        batch: &mut Batch,
        record: &mut SinkRecord,
        mapped: &MappedNode,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let Some(parent) = record.parent_ref() else {
            return Err(SyncError::Sink(format!("device '{}' has no id", record.name)));
        };
        if let Some(plan) = self
            .reconcile_interfaces(batch, parent, &mapped.interfaces, warnings)
            .await?
        {
            self.reconcile_addresses(record, &plan, false, warnings).await?;
            self.remove_stale_interfaces(&plan, warnings).await?;
        }
        debug!(interfaces = mapped.interfaces.len(), "Host interfaces reconciled");
        Ok(())
    }
}

fn required<'a>(value: &'a Option<String>, what: &str, scope: &NodeScope) -> Result<&'a str> {
    value.as_deref().ok_or_else(|| {
        SyncError::NotFound(format!("no {} configured for node {}", what, scope.node))
    })
}
