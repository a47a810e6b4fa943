// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-entity outcomes of one sync batch.

use std::fmt;

use chrono::{DateTime, Utc};
use proxsync_sink::ObjectKind;
use serde::Serialize;

/// What happened to one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Created,
    /// Existing record reconciled. `changes` lists the base-record fields that
    /// differed; empty when only the sync stamp was written.
    Updated { changes: Vec<String> },
    OrphanMarked { at: DateTime<Utc> },
    Failed { reason: String },
    Skipped { reason: String },
}

impl Outcome {
    pub fn failed(reason: impl fmt::Display) -> Self {
        Outcome::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Outcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// The entity an outcome belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityRef {
    pub kind: ObjectKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<u32>,
}

impl EntityRef {
    pub fn guest(vmid: u32, name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::VirtualMachine,
            name: name.into(),
            source_id: Some(vmid),
        }
    }

    pub fn device(name: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Device,
            name: name.into(),
            source_id: None,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source_id {
            Some(id) => write!(f, "{} {} ({})", self.kind, self.name, id),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReport {
    pub entity: EntityRef,
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Non-fatal problems met while reconciling children.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Ordered outcome list of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub entries: Vec<EntityReport>,
    /// Batch-level warnings such as unsupported extension attributes.
    pub warnings: Vec<String>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            entries: Vec::new(),
            warnings: Vec::new(),
            cancelled: false,
            started_at,
            finished_at: None,
        }
    }

    pub fn push(&mut self, entity: EntityRef, outcome: Outcome, warnings: Vec<String>) {
        self.entries.push(EntityReport {
            entity,
            outcome,
            warnings,
        });
    }

    /// Outcome of the guest with `vmid`, if it was reported.
    pub fn outcome_for(&self, vmid: u32) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| e.entity.source_id == Some(vmid))
            .map(|e| &e.outcome)
    }

    /// Outcome of the entity reported under `name`.
    pub fn outcome_named(&self, name: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|e| e.entity.name == name)
            .map(|e| &e.outcome)
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| e.outcome.is_failure())
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for entry in &self.entries {
            match entry.outcome {
                Outcome::Created => summary.created += 1,
                Outcome::Updated { .. } => summary.updated += 1,
                Outcome::OrphanMarked { .. } => summary.orphaned += 1,
                Outcome::Failed { .. } => summary.failed += 1,
                Outcome::Skipped { .. } => summary.skipped += 1,
            }
            summary.warnings += entry.warnings.len();
        }
        summary.warnings += self.warnings.len();
        summary
    }
}

/// Outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub created: usize,
    pub updated: usize,
    pub orphaned: usize,
    pub failed: usize,
    pub skipped: usize,
    pub warnings: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} orphaned, {} failed, {} skipped, {} warnings",
            self.created, self.updated, self.orphaned, self.failed, self.skipped, self.warnings
        )
    }
}
