// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation engine.
//!
//! One [`SyncEngine`] runs one batch at a time, issuing every source and
//! sink call sequentially in source order. Per-entity failures end up in the
//! [`SyncReport`]; only an unreachable source or sink (or a malformed
//! snapshot) aborts the batch with an error.

mod children;
mod instance;
mod node;
mod orphans;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use proxsync_sink::{
    ExtensionTarget, ObjectId, ObjectKind, SinkClient, SinkError, SinkRecord, fields,
};
use proxsync_source::SourceClient;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::extension::{self, ExtensionBag, STAMP_FIELDS, SupportedExtensions};
use crate::sanitize::sanitize_name;

// ============================================================================
// Engine
// ============================================================================

/// Which guests of a node a batch reconciles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    Ids(BTreeSet<u32>),
}

impl Selection {
    pub fn ids(ids: impl IntoIterator<Item = u32>) -> Self {
        Selection::Ids(ids.into_iter().collect())
    }

    pub fn contains(&self, vmid: u32) -> bool {
        match self {
            Selection::All => true,
            Selection::Ids(ids) => ids.contains(&vmid),
        }
    }
}

/// Source-to-sink reconciliation engine.
pub struct SyncEngine {
    source: Arc<dyn SourceClient>,
    sink: Arc<dyn SinkClient>,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Token observed between entities.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ensure the extension attributes and read back what the sink supports.
    async fn prepare_batch(&self) -> Result<Batch> {
        let mut warnings = Vec::new();
        if self.config.ensure_extension_attributes {
            for attribute in extension::definitions() {
                if let Err(err) = self.sink.ensure_extension_attribute(&attribute).await {
                    if err.is_transport() {
                        return Err(err.into());
                    }
                    warn!(name = %attribute.name, error = %err, "Could not ensure extension attribute");
                    warnings.push(format!(
                        "could not ensure extension attribute '{}': {}",
                        attribute.name, err
                    ));
                }
            }
        }
        let attributes = self.sink.list_extension_attributes().await?;
        debug!(count = attributes.len(), "Loaded extension attributes");

        let mut batch = Batch::new(SupportedExtensions::from_attributes(&attributes));
        batch.warnings = warnings;
        Ok(batch)
    }

    /// Create or update a record, retrying once with a sanitized name.
    async fn write_record(&self, record: &SinkRecord) -> Result<SinkRecord> {
        let sink = self.sink.as_ref();
        let stored = retry_sanitized(&record.name, |name| {
            let mut attempt = record.clone();
            attempt.name = name;
            async move { sink.upsert_record(&attempt).await }
        })
        .await?;
        Ok(stored)
    }
}

/// Builder for a [`SyncEngine`].
#[derive(Default)]
pub struct SyncEngineBuilder {
    source: Option<Arc<dyn SourceClient>>,
    sink: Option<Arc<dyn SinkClient>>,
    config: SyncConfig,
    cancel: Option<CancellationToken>,
}

impl SyncEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source client (required).
    pub fn source(mut self, source: Arc<dyn SourceClient>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the sink client (required).
    pub fn sink(mut self, sink: Arc<dyn SinkClient>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a cancellation token with the caller. A fresh one is used otherwise.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<SyncEngine> {
        let source = self
            .source
            .ok_or_else(|| SyncError::Config("source client is required".to_string()))?;
        let sink = self
            .sink
            .ok_or_else(|| SyncError::Config("sink client is required".to_string()))?;

        Ok(SyncEngine {
            source,
            sink,
            config: self.config,
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}

// ============================================================================
// Batch state
// ============================================================================

/// State shared by the entities of one batch.
struct Batch {
    supported: SupportedExtensions,
    /// (name, target) pairs already reported as unsupported.
    reported: BTreeSet<(String, ExtensionTarget)>,
    warnings: Vec<String>,
    platforms: HashMap<String, ObjectId>,
    tags: HashMap<String, ObjectId>,
    vlans: HashMap<u16, ObjectId>,
    /// Records of the cluster being synced, kept current as they are written.
    records: Vec<SinkRecord>,
}

impl Batch {
    fn new(supported: SupportedExtensions) -> Self {
        Self {
            supported,
            reported: BTreeSet::new(),
            warnings: Vec::new(),
            platforms: HashMap::new(),
            tags: HashMap::new(),
            vlans: HashMap::new(),
            records: Vec::new(),
        }
    }

    /// Drop names the sink lacks for `target`, warning once per name.
    fn filter(&mut self, target: ExtensionTarget, bag: &mut ExtensionBag) {
        for name in self.supported.retain(target, bag) {
            if self.reported.insert((name.clone(), target)) {
                warn!(%name, target = target.content_type(), "Extension attribute not available, skipping");
                self.warnings.push(format!(
                    "extension attribute '{}' is not available for {}; values skipped",
                    name,
                    target.content_type()
                ));
            }
        }
    }

    fn managed(&self, target: ExtensionTarget) -> Vec<String> {
        self.supported.managed(target)
    }

    /// Stamp fields for `kind`, minus the ones the sink lacks.
    fn stamp(&mut self, kind: ObjectKind, at: DateTime<Utc>) -> ExtensionBag {
        let now = Value::from(at.to_rfc3339_opts(SecondsFormat::Secs, true));
        let mut bag = ExtensionBag::new();
        match kind {
            ObjectKind::VirtualMachine => {
                bag.insert(fields::SYNC_STATE.to_string(), Value::from(fields::STATE_DEPLOYED));
                bag.insert(fields::LAST_SYNC.to_string(), now);
            }
            ObjectKind::Device => {
                bag.insert(fields::NODE_LAST_SYNC.to_string(), now);
            }
        }
        self.filter(ExtensionTarget::record(kind), &mut bag);
        bag
    }

    async fn platform(&mut self, sink: &dyn SinkClient, name: &str) -> std::result::Result<ObjectId, SinkError> {
        if let Some(id) = self.platforms.get(name) {
            return Ok(*id);
        }
        let id = retry_sanitized(name, |n| async move { sink.get_or_create_platform(&n).await }).await?;
        self.platforms.insert(name.to_string(), id);
        Ok(id)
    }

    async fn tag(&mut self, sink: &dyn SinkClient, name: &str) -> std::result::Result<ObjectId, SinkError> {
        if let Some(id) = self.tags.get(name) {
            return Ok(*id);
        }
        let id = retry_sanitized(name, |n| async move { sink.get_or_create_tag(&n).await }).await?;
        self.tags.insert(name.to_string(), id);
        Ok(id)
    }

    async fn vlan(&mut self, sink: &dyn SinkClient, vid: u16) -> std::result::Result<ObjectId, SinkError> {
        if let Some(id) = self.vlans.get(&vid) {
            return Ok(*id);
        }
        let id = sink.get_or_create_vlan(vid).await?;
        self.vlans.insert(vid, id);
        Ok(id)
    }

    /// Replace or add `record` in the cluster cache.
    fn remember(&mut self, record: &SinkRecord) {
        match self.records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record.clone(),
            None => self.records.push(record.clone()),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Run `op` with `name`; if the sink rejects the value, run it once more with
/// the sanitized name.
async fn retry_sanitized<T, F, Fut>(name: &str, op: F) -> std::result::Result<T, SinkError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = proxsync_sink::Result<T>>,
{
    match op(name.to_string()).await {
        Err(err @ SinkError::ValidationRejected { .. }) => match sanitize_name(name) {
            Some(clean) if clean != name => {
                debug!(original = %name, sanitized = %clean, error = %err, "Retrying with sanitized name");
                op(clean).await
            }
            _ => Err(err),
        },
        other => other,
    }
}

/// Base-record fields that differ, stamp fields excluded.
fn record_changes(current: &SinkRecord, desired: &SinkRecord) -> Vec<String> {
    let mut changes = Vec::new();
    let mut check = |field: &str, differs: bool| {
        if differs {
            changes.push(field.to_string());
        }
    };
    check("name", current.name != desired.name);
    check("status", current.status != desired.status);
    check("cluster", current.cluster != desired.cluster);
    check("site", current.site != desired.site);
    check("role", current.role != desired.role);
    check("device_type", current.device_type != desired.device_type);
    check("platform", current.platform != desired.platform);
    check("vcpus", current.vcpus != desired.vcpus);
    check("memory_mb", current.memory_mb != desired.memory_mb);
    check("disk_mb", current.disk_mb != desired.disk_mb);
    check("comments", current.comments != desired.comments);
    check("tags", current.tags != desired.tags);

    let keys: BTreeSet<&String> = current
        .custom_fields
        .keys()
        .chain(desired.custom_fields.keys())
        .collect();
    for key in keys {
        if STAMP_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if field_value(&current.custom_fields, key) != field_value(&desired.custom_fields, key) {
            changes.push(key.clone());
        }
    }
    changes
}

static NULL: Value = Value::Null;

fn field_value<'a>(fields: &'a BTreeMap<String, Value>, key: &str) -> &'a Value {
    fields.get(key).unwrap_or(&NULL)
}

/// Keep child failures local, except those that stop the batch.
fn child_failure(err: SinkError, what: String, warnings: &mut Vec<String>) -> Result<()> {
    if err.is_transport() {
        return Err(err.into());
    }
    warn!(%what, error = %err, "Child reconciliation failed");
    warnings.push(format!("{}: {}", what, err));
    Ok(())
}
