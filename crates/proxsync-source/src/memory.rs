// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory source for tests.
//!
//! Holds a snapshot per node that tests can rewrite between sync runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::client::SourceClient;
use crate::error::{Result, SourceError};
use crate::types::{SourceInstance, SourceNode};

#[derive(Default)]
struct State {
    instances: HashMap<String, Vec<SourceInstance>>,
    nodes: HashMap<String, SourceNode>,
    fail_next: Option<SourceError>,
    calls: usize,
}

/// Source client backed by fixed snapshots.
#[derive(Clone, Default)]
pub struct StaticSource {
    state: Arc<Mutex<State>>,
}

impl StaticSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the guest list of `node`.
    pub async fn set_instances(&self, node: &str, instances: Vec<SourceInstance>) {
        let mut state = self.state.lock().await;
        state.instances.insert(node.to_string(), instances);
    }

    /// Remove one guest from `node`, returning it if present.
    pub async fn remove_instance(&self, node: &str, vmid: u32) -> Option<SourceInstance> {
        let mut state = self.state.lock().await;
        let list = state.instances.get_mut(node)?;
        let pos = list.iter().position(|i| i.vmid == vmid)?;
        Some(list.remove(pos))
    }

    /// Replace the facts of a node.
    pub async fn set_node(&self, node: SourceNode) {
        let mut state = self.state.lock().await;
        state.nodes.insert(node.name.clone(), node);
    }

    /// Make the next call fail with `err`.
    pub async fn fail_next(&self, err: SourceError) {
        self.state.lock().await.fail_next = Some(err);
    }

    /// Number of calls served so far.
    pub async fn calls(&self) -> usize {
        self.state.lock().await.calls
    }
}

#[async_trait]
impl SourceClient for StaticSource {
    async fn list_instances(&self, node: &str) -> Result<Vec<SourceInstance>> {
        let mut state = self.state.lock().await;
        state.calls += 1;
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        let mut list = state.instances.get(node).cloned().unwrap_or_default();
        list.sort_by_key(|i| i.vmid);
        Ok(list)
    }

    async fn get_node(&self, node: &str) -> Result<SourceNode> {
        let mut state = self.state.lock().await;
        state.calls += 1;
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        state
            .nodes
            .get(node)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("node {}", node)))
    }
}
