// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Correlation between source guests and sink records.
//!
//! The stored source id wins. Only records that carry no source id at all
//! may be claimed by name, and more than one candidate at either tier is an
//! error rather than a guess.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use proxsync_sink::SinkRecord;
use regex::Regex;

use crate::error::{Result, SyncError};

static VMID_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<base>.*\S)\s+\(\d+\)$").expect("vmid suffix is a valid regex pattern")
});

/// How a guest was matched to an existing record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Match<'a> {
    BySourceId(&'a SinkRecord),
    ByName(&'a SinkRecord),
    New,
}

impl<'a> Match<'a> {
    pub fn record(&self) -> Option<&'a SinkRecord> {
        match self {
            Match::BySourceId(r) | Match::ByName(r) => Some(r),
            Match::New => None,
        }
    }
}

/// Resolve a guest against the records of its cluster.
pub fn resolve<'a>(records: &'a [SinkRecord], vmid: u32, name: &str) -> Result<Match<'a>> {
    let by_id: Vec<&SinkRecord> = records
        .iter()
        .filter(|r| r.source_id() == Some(vmid))
        .collect();
    match by_id.as_slice() {
        [record] => return Ok(Match::BySourceId(record)),
        [] => {}
        many => return Err(ambiguous(format!("vmid {}", vmid), many)),
    }

    let by_name: Vec<&SinkRecord> = records
        .iter()
        .filter(|r| r.source_id().is_none() && r.name == name)
        .collect();
    match by_name.as_slice() {
        [] => Ok(Match::New),
        [record] => Ok(Match::ByName(record)),
        many => Err(ambiguous(format!("name '{}'", name), many)),
    }
}

fn ambiguous(entity: String, candidates: &[&SinkRecord]) -> SyncError {
    SyncError::IdentityAmbiguous {
        entity,
        candidates: candidates.iter().filter_map(|r| r.id).collect(),
    }
}

/// Record name with a trailing ` (1234)` disambiguation suffix removed.
pub fn base_name(name: &str) -> &str {
    VMID_SUFFIX
        .captures(name)
        .and_then(|c| c.name("base"))
        .map_or(name, |m| m.as_str())
}

/// Name written for a guest whose plain name is taken by another record.
pub fn disambiguated(name: &str, vmid: u32) -> String {
    format!("{} ({})", name, vmid)
}

/// Whether `record` still has a counterpart in the full source snapshot.
///
/// Records carrying a source id are judged by id alone. Others fall back to
/// their name, with the disambiguation suffix stripped.
pub fn present_in_snapshot(
    record: &SinkRecord,
    vmids: &BTreeSet<u32>,
    names: &BTreeSet<String>,
) -> bool {
    match record.source_id() {
        Some(vmid) => vmids.contains(&vmid),
        None => names.contains(&record.name) || names.contains(base_name(&record.name)),
    }
}
