//! In-memory versioned store
//!
//! Keeps each record as a JSON blob under a per-namespace version counter,
//! mirroring the layout of a KV-backed deployment. Used by the demo binary
//! and the end-to-end tests; production deployments supply their own
//! [`Store`] implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{DistributorError, Result};

use super::{
    AssignedState, ExecutorRecord, HeartbeatState, NamespaceSnapshot, NamespaceState,
    ShardMetrics, Store,
};

#[derive(Default)]
struct NamespaceRecord {
    /// Bumped on every write; compare-and-set token for plan writes.
    version: u64,
    /// Shard catalog, kept sorted.
    shards: Vec<String>,
    /// Executor id to JSON-encoded [`ExecutorRecord`].
    executors: HashMap<String, String>,
    /// JSON-encoded [`NamespaceState`].
    state: Option<String>,
}

impl NamespaceRecord {
    fn decode_executor(&self, executor_id: &str) -> Result<Option<ExecutorRecord>> {
        match self.executors.get(executor_id) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    fn decode_state(&self) -> Result<NamespaceState> {
        match &self.state {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(NamespaceState::default()),
        }
    }

    fn encode_state(&mut self, state: &NamespaceState) -> Result<()> {
        self.state = Some(serde_json::to_string(state)?);
        Ok(())
    }
}

/// In-memory [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    namespaces: RwLock<HashMap<String, NamespaceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register catalog shards for a namespace. Catalog management belongs
    /// to the external launcher, so this lives outside the [`Store`] trait.
    pub async fn register_shards(&self, namespace: &str, shard_ids: Vec<String>) {
        let mut namespaces = self.namespaces.write().await;
        let record = namespaces.entry(namespace.to_string()).or_default();
        for shard_id in shard_ids {
            if !record.shards.contains(&shard_id) {
                record.shards.push(shard_id);
            }
        }
        record.shards.sort();
        record.version += 1;
    }

    /// Drop all records for an executor. External pruning of executors that
    /// have been silent for a long time goes through this.
    pub async fn remove_executor(&self, namespace: &str, executor_id: &str) {
        let mut namespaces = self.namespaces.write().await;
        if let Some(record) = namespaces.get_mut(namespace) {
            if record.executors.remove(executor_id).is_some() {
                record.version += 1;
                debug!("pruned executor {} from namespace {}", executor_id, namespace);
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_heartbeat(
        &self,
        namespace: &str,
        executor_id: &str,
    ) -> Result<(HeartbeatState, AssignedState)> {
        let namespaces = self.namespaces.read().await;
        let executor = namespaces
            .get(namespace)
            .map(|record| record.decode_executor(executor_id))
            .transpose()?
            .flatten();

        match executor {
            Some(record) => Ok((record.heartbeat, record.assigned)),
            None => Err(DistributorError::ExecutorNotFound {
                namespace: namespace.to_string(),
                executor_id: executor_id.to_string(),
            }),
        }
    }

    async fn record_heartbeat(
        &self,
        namespace: &str,
        executor_id: &str,
        state: HeartbeatState,
    ) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        let record = namespaces.entry(namespace.to_string()).or_default();

        let existing = record.decode_executor(executor_id)?;
        let updated = ExecutorRecord {
            heartbeat: state,
            assigned: existing.map(|r| r.assigned).unwrap_or_default(),
        };
        record
            .executors
            .insert(executor_id.to_string(), serde_json::to_string(&updated)?);
        record.version += 1;
        Ok(())
    }

    async fn get_state(&self, namespace: &str) -> Result<NamespaceState> {
        let namespaces = self.namespaces.read().await;
        match namespaces.get(namespace) {
            Some(record) => record.decode_state(),
            None => Ok(NamespaceState::default()),
        }
    }

    async fn update_shard_metrics(
        &self,
        namespace: &str,
        _executor_id: &str,
        metrics: HashMap<String, ShardMetrics>,
    ) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        let record = namespaces.entry(namespace.to_string()).or_default();

        let mut state = record.decode_state()?;
        state.shard_metrics.extend(metrics);
        record.encode_state(&state)?;
        record.version += 1;
        Ok(())
    }

    async fn get_snapshot(&self, namespace: &str) -> Result<NamespaceSnapshot> {
        let namespaces = self.namespaces.read().await;
        let record = match namespaces.get(namespace) {
            Some(record) => record,
            None => {
                return Err(DistributorError::NamespaceNotFound {
                    namespace: namespace.to_string(),
                })
            }
        };

        let mut executors = HashMap::with_capacity(record.executors.len());
        for executor_id in record.executors.keys() {
            if let Some(executor) = record.decode_executor(executor_id)? {
                executors.insert(executor_id.clone(), executor);
            }
        }

        Ok(NamespaceSnapshot {
            shards: record.shards.clone(),
            executors,
            state: record.decode_state()?,
            version: record.version,
        })
    }

    async fn apply_assignments(
        &self,
        namespace: &str,
        plan: HashMap<String, AssignedState>,
        metrics: HashMap<String, ShardMetrics>,
        version: u64,
    ) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        let record = match namespaces.get_mut(namespace) {
            Some(record) => record,
            None => {
                return Err(DistributorError::NamespaceNotFound {
                    namespace: namespace.to_string(),
                })
            }
        };

        if record.version != version {
            return Err(DistributorError::VersionConflict {
                namespace: namespace.to_string(),
                record: "assignments".to_string(),
            });
        }

        for (executor_id, assigned) in plan {
            // An executor pruned between snapshot and write has nothing to
            // receive; its shards re-enter the pool on the next tick.
            let Some(existing) = record.decode_executor(&executor_id)? else {
                continue;
            };
            let updated = ExecutorRecord {
                heartbeat: existing.heartbeat,
                assigned,
            };
            record
                .executors
                .insert(executor_id, serde_json::to_string(&updated)?);
        }

        if !metrics.is_empty() {
            let mut state = record.decode_state()?;
            state.shard_metrics.extend(metrics);
            record.encode_state(&state)?;
        }
        record.version += 1;
        Ok(())
    }
}
