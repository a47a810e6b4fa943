// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orphan pass: one evaluation per cluster record against the full snapshot.

use std::collections::BTreeSet;

use chrono::Utc;
use proxsync_sink::{ObjectId, ObjectKind, RecordQuery};
use proxsync_source::SourceInstance;
use tracing::{debug, info, instrument, warn};

use super::SyncEngine;
use crate::error::{Result, SyncError};
use crate::identity::present_in_snapshot;
use crate::report::{EntityRef, Outcome, SyncReport};
use crate::sanitize::sanitize_name;

impl SyncEngine {
    /// Mark cluster records with no counterpart in `snapshot`.
    ///
    /// `snapshot` must be the node's complete listing, not the selection.
    /// Records are only flagged, never deleted.
    #[instrument(skip(self, snapshot, report))]
    pub(super) async fn mark_orphans(
        &self,
        cluster: ObjectId,
        snapshot: &[SourceInstance],
        report: &mut SyncReport,
    ) -> Result<()> {
        let vmids: BTreeSet<u32> = snapshot.iter().map(|i| i.vmid).collect();
        let mut names: BTreeSet<String> = BTreeSet::new();
        for instance in snapshot {
            names.insert(instance.name.clone());
            names.extend(sanitize_name(&instance.name));
        }

        let records = self.sink.find_records(&RecordQuery::in_cluster(cluster)).await?;
        for record in records.iter().filter(|r| !r.is_orphaned()) {
            if present_in_snapshot(record, &vmids, &names) {
                continue;
            }
            let Some(id) = record.id else { continue };
            let entity = EntityRef {
                kind: ObjectKind::VirtualMachine,
                name: record.name.clone(),
                source_id: record.source_id(),
            };

            let at = Utc::now();
            match self.sink.mark_orphan(ObjectKind::VirtualMachine, id, at).await {
                Ok(()) => {
                    info!(id, name = %record.name, "Marked orphan");
                    report.push(entity, Outcome::OrphanMarked { at }, Vec::new());
                }
                Err(err) if err.is_transport() => return Err(SyncError::from(err)),
                Err(err) => {
                    warn!(id, name = %record.name, error = %err, "Could not mark orphan");
                    report.push(entity, Outcome::failed(err), Vec::new());
                }
            }
        }
        debug!(checked = records.len(), "Orphan pass finished");
        Ok(())
    }
}
