//! Store contract and data model
//!
//! The distributor owns no durable state of its own; everything lives in a
//! transactional key-value store behind the [`Store`] trait. Records are
//! plain id-keyed maps, mutated only through compare-and-set.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::MemoryStore;

/// Executor lifecycle status, set by the executor in each heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorStatus {
    Active,
    Draining,
    Stopped,
}

/// Assignment lifecycle status, set by the balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentStatus {
    Ready,
    Pending,
    Stopped,
}

/// Shard processing status, reported by the owning executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardStatus {
    Ready,
    Done,
}

/// Per-shard load and status as reported in a single heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardStatusReport {
    pub status: ShardStatus,
    pub shard_load: f64,
}

/// Last observed heartbeat for an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatState {
    /// Unix seconds of the last accepted heartbeat write.
    pub last_heartbeat: i64,
    pub status: ExecutorStatus,
    #[serde(default)]
    pub reported_shards: HashMap<String, ShardStatusReport>,
}

/// A single shard's assignment entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAssignment {
    pub status: AssignmentStatus,
}

/// The authoritative set of shards an executor should run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignedState {
    #[serde(default)]
    pub assigned_shards: HashMap<String, ShardAssignment>,
}

/// Server-side per-shard statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardMetrics {
    /// EWMA of reported load. Finite and non-negative.
    pub smoothed_load: f64,
    /// Unix seconds of the last smoothing update. Monotonic per shard.
    pub last_update_time: i64,
    /// Unix seconds of the last balancer-initiated move.
    pub last_move_time: i64,
}

/// Persistent per-namespace state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceState {
    #[serde(default)]
    pub shard_metrics: HashMap<String, ShardMetrics>,
}

/// One executor's records as seen in a consistent snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorRecord {
    pub heartbeat: HeartbeatState,
    pub assigned: AssignedState,
}

/// Consistent per-namespace snapshot read by the reconciliation loop.
///
/// `version` is the compare-and-set token for the write pass that consumes
/// this snapshot.
#[derive(Debug, Clone, Default)]
pub struct NamespaceSnapshot {
    /// Shard catalog for the namespace.
    pub shards: Vec<String>,
    pub executors: HashMap<String, ExecutorRecord>,
    pub state: NamespaceState,
    pub version: u64,
}

/// Transactional, versioned store for distributor state.
///
/// All calls are subject to the caller's deadline; implementations must not
/// retry internally. `update_shard_metrics` and `apply_assignments` are
/// compare-and-set operations and may fail with a version conflict.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch an executor's last heartbeat and current assignment.
    ///
    /// Returns [`DistributorError::ExecutorNotFound`] when the executor has
    /// never heartbeated; callers treat that as "first heartbeat".
    ///
    /// [`DistributorError::ExecutorNotFound`]: crate::error::DistributorError::ExecutorNotFound
    async fn get_heartbeat(
        &self,
        namespace: &str,
        executor_id: &str,
    ) -> Result<(HeartbeatState, AssignedState)>;

    /// Persist a new heartbeat for an executor.
    async fn record_heartbeat(
        &self,
        namespace: &str,
        executor_id: &str,
        state: HeartbeatState,
    ) -> Result<()>;

    /// Read the namespace-wide shard statistics.
    async fn get_state(&self, namespace: &str) -> Result<NamespaceState>;

    /// Merge updated shard metrics into the namespace state.
    ///
    /// May fail with [`DistributorError::VersionConflict`] under concurrent
    /// balancer writes; the heartbeat path swallows that and converges on
    /// the next report.
    ///
    /// [`DistributorError::VersionConflict`]: crate::error::DistributorError::VersionConflict
    async fn update_shard_metrics(
        &self,
        namespace: &str,
        executor_id: &str,
        metrics: HashMap<String, ShardMetrics>,
    ) -> Result<()>;

    /// Read a consistent snapshot of the namespace for reconciliation.
    async fn get_snapshot(&self, namespace: &str) -> Result<NamespaceSnapshot>;

    /// Write an assignment plan plus shard-metric move stamps atomically.
    ///
    /// `version` must match the snapshot the plan was computed from;
    /// otherwise the call fails with a version conflict and the caller
    /// retries on its next tick.
    async fn apply_assignments(
        &self,
        namespace: &str,
        plan: HashMap<String, AssignedState>,
        metrics: HashMap<String, ShardMetrics>,
        version: u64,
    ) -> Result<()>;
}
