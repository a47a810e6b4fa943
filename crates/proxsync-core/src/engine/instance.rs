// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Guest batches: snapshot, per-guest reconciliation, orphan pass.

use std::collections::BTreeSet;

use chrono::Utc;
use proxsync_sink::{ExtensionTarget, ObjectId, ObjectKind, RecordQuery, SinkRecord};
use proxsync_source::SourceInstance;
use tracing::{debug, info, instrument, warn};

use super::{Batch, Selection, SyncEngine, child_failure, record_changes};
use crate::config::NodeScope;
use crate::error::{Result, SyncError};
use crate::extension::apply_bag;
use crate::identity::{self, Match};
use crate::mapper::{self, MappedInstance};
use crate::report::{EntityRef, Outcome, SyncReport};
use crate::sanitize::sanitize_name;

impl SyncEngine {
    /// Reconcile the selected guests of one node, then mark orphans.
    ///
    /// Errors only when the source or sink is unreachable, or the snapshot
    /// cannot be interpreted. Everything else is reported per guest.
    #[instrument(skip(self, scope), fields(node = %scope.node, cluster = %scope.cluster_name))]
    pub async fn sync_instances(&self, scope: &NodeScope, selection: Selection) -> Result<SyncReport> {
        let mut report = SyncReport::new(Utc::now());

        let snapshot = self.source.list_instances(&scope.node).await?;
        info!(instances = snapshot.len(), "Fetched source snapshot");

        let mut batch = self.prepare_batch().await?;
        let cluster_type = self
            .sink
            .get_or_create_cluster_type(&self.config.cluster_type_name)
            .await?;
        let cluster = self
            .sink
            .get_or_create_cluster(&scope.cluster_name, cluster_type)
            .await?;
        batch.records = self.sink.find_records(&RecordQuery::in_cluster(cluster)).await?;

        for instance in snapshot.iter().filter(|i| selection.contains(i.vmid)) {
            let entity = EntityRef::guest(instance.vmid, &instance.name);
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.push(entity, Outcome::skipped("cancelled"), Vec::new());
                continue;
            }

            let mut warnings = Vec::new();
            let outcome = match self
                .sync_instance(&mut batch, cluster, instance, &mut warnings)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) if err.is_batch_fatal() => {
                    warn!(vmid = instance.vmid, error = %err, "Aborting batch");
                    return Err(err);
                }
                Err(err) => {
                    warn!(vmid = instance.vmid, name = %instance.name, error = %err, "Guest sync failed");
                    Outcome::failed(err)
                }
            };
            report.push(entity, outcome, warnings);
        }

        if let Selection::Ids(ids) = &selection {
            let present: BTreeSet<u32> = snapshot.iter().map(|i| i.vmid).collect();
            for vmid in ids.difference(&present) {
                report.push(
                    EntityRef::guest(*vmid, vmid.to_string()),
                    Outcome::failed("not present at source"),
                    Vec::new(),
                );
            }
        }

        if report.cancelled {
            info!("Batch cancelled, orphan pass skipped");
        } else if self.config.mark_orphans {
            self.mark_orphans(cluster, &snapshot, &mut report).await?;
        }

        report.warnings.append(&mut batch.warnings);
        report.finished_at = Some(Utc::now());
        info!(summary = %report.summary(), "Guest batch finished");
        Ok(report)
    }

    #[instrument(skip_all, fields(vmid = instance.vmid, name = %instance.name))]
    async fn sync_instance(
        &self,
        batch: &mut Batch,
        cluster: ObjectId,
        instance: &SourceInstance,
        warnings: &mut Vec<String>,
    ) -> Result<Outcome> {
        let sink = self.sink.as_ref();
        let mapped = mapper::map_instance(instance);

        let current = match identity::resolve(&batch.records, mapped.vmid, &mapped.name)? {
            Match::BySourceId(record) => Some(record.clone()),
            Match::ByName(record) => {
                info!(id = ?record.id, "Claiming record by name");
                Some(record.clone())
            }
            Match::New => None,
        };

        // Platform and tags are best effort.
        let platform = match &mapped.platform {
            Some(name) => match batch.platform(sink, name).await {
                Ok(id) => Some(id),
                Err(err) if err.is_transport() => return Err(err.into()),
                Err(err) => {
                    warnings.push(format!("platform '{}': {}", name, err));
                    current.as_ref().and_then(|c| c.platform)
                }
            },
            None => None,
        };
        let mut tags = BTreeSet::new();
        for name in &mapped.tags {
            match batch.tag(sink, name).await {
                Ok(id) => {
                    tags.insert(id);
                }
                Err(err) if err.is_transport() => return Err(err.into()),
                Err(err) => warnings.push(format!("tag '{}': {}", name, err)),
            }
        }

        let mut desired = current
            .clone()
            .unwrap_or_else(|| SinkRecord::new(ObjectKind::VirtualMachine, &mapped.name));
        desired.name = desired_name(&batch.records, current.as_ref(), &mapped);
        desired.status = mapped.status;
        desired.cluster = Some(cluster);
        desired.vcpus = Some(mapped.vcpus);
        desired.memory_mb = mapped.memory_mb;
        desired.disk_mb = mapped.disk_mb;
        desired.comments = mapped.comments.clone();
        desired.platform = platform;
        desired.tags = tags;

        let target = ExtensionTarget::VirtualMachine;
        let mut bag = mapped.extensions.clone();
        batch.filter(target, &mut bag);
        apply_bag(&mut desired.custom_fields, &bag, &batch.managed(target));

        let now = Utc::now();
        let (mut record, outcome, stamped) = match &current {
            None => {
                desired.custom_fields.extend(batch.stamp(ObjectKind::VirtualMachine, now));
                let stored = self.write_record(&desired).await?;
                info!(id = ?stored.id, "Created virtual machine");
                (stored, Outcome::Created, true)
            }
            Some(current) => {
                let mut changes = record_changes(current, &desired);
                if current.is_orphaned() {
                    changes.push(proxsync_sink::fields::SYNC_STATE.to_string());
                }
                if changes.is_empty() {
                    debug!("Base record unchanged");
                    (current.clone(), Outcome::Updated { changes }, false)
                } else {
                    desired.custom_fields.extend(batch.stamp(ObjectKind::VirtualMachine, now));
                    let stored = self.write_record(&desired).await?;
                    info!(id = ?stored.id, ?changes, "Updated virtual machine");
                    (stored, Outcome::Updated { changes }, true)
                }
            }
        };
        batch.remember(&record);

        self.reconcile_children(batch, &mut record, &mapped, warnings).await?;

        if !stamped {
            let stamp = batch.stamp(ObjectKind::VirtualMachine, now);
            if !stamp.is_empty() {
                record.custom_fields.extend(stamp);
                match self.sink.upsert_record(&record).await {
                    Ok(stored) => batch.remember(&stored),
                    Err(err) => child_failure(err, "sync stamp".to_string(), warnings)?,
                }
            }
        }
        Ok(outcome)
    }

    /// Interfaces, addresses and disks of a stored guest record.
    async fn reconcile_children(
        &self,
        batch: &mut Batch,
        record: &mut SinkRecord,
        mapped: &MappedInstance,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let Some(parent) = record.parent_ref() else {
            return Err(SyncError::Sink(format!("record '{}' has no id", record.name)));
        };
        if let Some(plan) = self
            .reconcile_interfaces(batch, parent, &mapped.interfaces, warnings)
            .await?
        {
            self.reconcile_addresses(record, &plan, true, warnings).await?;
            batch.remember(record);
            self.remove_stale_interfaces(&plan, warnings).await?;
        }
        self.reconcile_disks(batch, parent.id, &mapped.disks, warnings)
            .await
    }
}

/// Name to write for a guest.
///
/// Keeps the stored name when it is the sanitized form of the wanted one, and
/// appends the vmid when another guest in the cluster already holds the name.
fn desired_name(records: &[SinkRecord], current: Option<&SinkRecord>, mapped: &MappedInstance) -> String {
    let own_id = current.and_then(|c| c.id);
    let taken = |candidate: &str| {
        let candidate = candidate.to_lowercase();
        records.iter().any(|r| {
            r.id != own_id
                && r.source_id() != Some(mapped.vmid)
                && r.name.to_lowercase() == candidate
        })
    };

    let wanted = if taken(&mapped.name) {
        identity::disambiguated(&mapped.name, mapped.vmid)
    } else {
        mapped.name.clone()
    };
    match current {
        Some(c) if c.name != wanted && sanitize_name(&wanted).as_deref() == Some(c.name.as_str()) => {
            c.name.clone()
        }
        _ => wanted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxsync_sink::fields;
    use proxsync_source::{InstanceKind, InstanceStatus, KindDetails};
    use serde_json::json;

    fn guest(vmid: u32, name: &str) -> MappedInstance {
        let instance = SourceInstance {
            vmid,
            name: name.to_string(),
            kind: InstanceKind::Vm,
            status: InstanceStatus::Running,
            vcpus: 1,
            memory_mb: None,
            min_memory_mb: None,
            cpu_sockets: None,
            interfaces: vec![],
            disks: vec![],
            notes: None,
            tags: BTreeSet::new(),
            details: KindDetails::Vm {
                ostype: None,
                bios: None,
                machine: None,
                cpu_type: None,
                cores_per_socket: None,
                numa: None,
                boot_order: None,
            },
        };
        mapper::map_instance(&instance)
    }

    fn record(id: ObjectId, name: &str, vmid: Option<u32>) -> SinkRecord {
        let mut r = SinkRecord::new(ObjectKind::VirtualMachine, name);
        r.id = Some(id);
        if let Some(vmid) = vmid {
            r.custom_fields.insert(fields::SOURCE_ID.to_string(), json!(vmid));
        }
        r
    }

    #[test]
    fn test_name_conflict_appends_vmid() {
        let records = vec![record(1, "Web-01", Some(200))];
        assert_eq!(desired_name(&records, None, &guest(100, "web-01")), "web-01 (100)");
        assert_eq!(desired_name(&records, None, &guest(100, "web-02")), "web-02");
    }

    #[test]
    fn test_own_record_is_not_a_conflict() {
        let records = vec![record(1, "web-01", Some(100))];
        assert_eq!(
            desired_name(&records, Some(&records[0]), &guest(100, "web-01")),
            "web-01"
        );
    }

    #[test]
    fn test_sanitized_name_is_kept() {
        let records = vec![record(1, "web-01-prod", Some(100))];
        assert_eq!(
            desired_name(&records, Some(&records[0]), &guest(100, "web/01:prod")),
            "web-01-prod"
        );
        assert_eq!(
            desired_name(&records, Some(&records[0]), &guest(100, "web-02")),
            "web-02"
        );
    }
}
