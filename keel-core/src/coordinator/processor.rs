//! Per-namespace reconciliation loop
//!
//! Reads a consistent snapshot, filters to live executors, plans placements
//! and steals with the balancer, and writes the plan back under
//! compare-and-set. Runs only while the leadership gate is open.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::clock::TimeSource;
use crate::error::Result;
use crate::metrics::standard;
use crate::store::{
    AssignedState, AssignmentStatus, ExecutorStatus, ShardAssignment, ShardMetrics, Store,
};

use super::balancer::{
    assign_unassigned_shards, compute_executor_loads, redistribute_to_empty_executors,
};
use super::election::LeaderGate;

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Interval between reconciliation ticks
    pub tick_interval: Duration,
    /// Heartbeat age beyond which an executor is not live
    pub heartbeat_ttl: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            heartbeat_ttl: Duration::from_secs(10),
        }
    }
}

/// What one tick changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebalanceOutcome {
    /// Unassigned shards placed onto executors
    pub placed: usize,
    /// Shards moved to idle executors
    pub stolen: usize,
    /// Shards revoked from dead or draining executors
    pub revoked: usize,
}

impl RebalanceOutcome {
    pub fn changed(&self) -> bool {
        *self != Self::default()
    }
}

/// Leader-elected control loop for one namespace.
pub struct NamespaceProcessor {
    namespace: String,
    storage: Arc<dyn Store>,
    time_source: Arc<dyn TimeSource>,
    config: ProcessorConfig,
}

impl NamespaceProcessor {
    pub fn new(
        namespace: impl Into<String>,
        storage: Arc<dyn Store>,
        time_source: Arc<dyn TimeSource>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            storage,
            time_source,
            config,
        }
    }

    /// Drive reconciliation ticks while the leadership gate is open.
    ///
    /// Returns when the election sender is dropped. A tick that loses the
    /// compare-and-set race is abandoned; the next tick re-reads state.
    pub async fn run(&self, mut gate: LeaderGate) {
        info!("namespace processor starting for {}", self.namespace);
        let mut ticker = interval(self.config.tick_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !*gate.borrow() {
                        continue;
                    }
                    match self.rebalance_once().await {
                        Ok(outcome) if outcome.changed() => {
                            info!(
                                "rebalanced namespace {}: placed={} stolen={} revoked={}",
                                self.namespace, outcome.placed, outcome.stolen, outcome.revoked
                            );
                        }
                        Ok(_) => {}
                        Err(err) if err.is_version_conflict() => {
                            standard::REBALANCE_CONFLICTS.inc();
                            debug!(
                                "tick lost the write race in namespace {}, retrying next tick",
                                self.namespace
                            );
                        }
                        Err(err) => {
                            warn!("rebalance failed in namespace {}: {}", self.namespace, err);
                        }
                    }
                }
                changed = gate.changed() => {
                    if changed.is_err() {
                        info!("election gate closed, stopping processor for {}", self.namespace);
                        return;
                    }
                }
            }
        }
    }

    /// One reconciliation pass: snapshot, plan, compare-and-set write.
    pub async fn rebalance_once(&self) -> Result<RebalanceOutcome> {
        let started = Instant::now();
        let snapshot = self.storage.get_snapshot(&self.namespace).await?;
        let now_unix = self.time_source.now().timestamp();
        let ttl = self.config.heartbeat_ttl.as_secs() as i64;

        // Live executors keep their current shards; everything held by a
        // stale, draining, or stopped executor re-enters the pool.
        let mut assignments: HashMap<String, Vec<String>> = HashMap::new();
        for (executor_id, record) in &snapshot.executors {
            let fresh = now_unix - record.heartbeat.last_heartbeat <= ttl;
            if record.heartbeat.status == ExecutorStatus::Active && fresh {
                let mut shards: Vec<String> =
                    record.assigned.assigned_shards.keys().cloned().collect();
                shards.sort();
                assignments.insert(executor_id.clone(), shards);
            }
        }
        standard::ACTIVE_EXECUTORS.set(assignments.len() as i64);
        if assignments.is_empty() {
            debug!("no live executors in namespace {}", self.namespace);
        }

        let stats = &snapshot.state.shard_metrics;

        let owned: HashSet<&String> = assignments.values().flatten().collect();
        let unassigned: Vec<String> = snapshot
            .shards
            .iter()
            .filter(|shard_id| !owned.contains(shard_id))
            .cloned()
            .collect();
        standard::UNASSIGNED_SHARDS.set(unassigned.len() as i64);

        let loads = compute_executor_loads(&assignments, stats);
        let placements = assign_unassigned_shards(&unassigned, &loads, stats, &assignments);
        for (executor_id, shards) in &placements {
            assignments
                .entry(executor_id.clone())
                .or_default()
                .extend(shards.iter().cloned());
        }

        let loads = compute_executor_loads(&assignments, stats);
        let (steals, _) =
            redistribute_to_empty_executors(now_unix, &loads, stats, &mut assignments);
        for (target, shards) in &steals {
            assignments
                .entry(target.clone())
                .or_default()
                .extend(shards.iter().cloned());
        }

        let outcome = RebalanceOutcome {
            placed: placements.values().map(Vec::len).sum(),
            stolen: steals.values().map(Vec::len).sum(),
            revoked: snapshot
                .executors
                .iter()
                .filter(|(id, _)| !assignments.contains_key(*id))
                .map(|(_, record)| record.assigned.assigned_shards.len())
                .sum(),
        };

        let (plan, moved) = self.build_plan(&snapshot, &assignments, now_unix);
        if plan.is_empty() && moved.is_empty() {
            standard::REBALANCE_TICKS.inc();
            standard::REBALANCE_DURATION.observe(started.elapsed().as_secs_f64());
            return Ok(outcome);
        }

        self.storage
            .apply_assignments(&self.namespace, plan, moved, snapshot.version)
            .await?;

        standard::SHARDS_ASSIGNED.inc_by(outcome.placed as u64);
        standard::SHARDS_STOLEN.inc_by(outcome.stolen as u64);
        standard::REBALANCE_TICKS.inc();
        standard::REBALANCE_DURATION.observe(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Diff the desired assignment against the snapshot.
    ///
    /// Produces per-executor writes only where the shard set changed, plus
    /// metric stamps (`last_move_time = now`) for every shard whose owner
    /// changed. Metrics entries for newly seen shards are created here, so
    /// every assigned shard has one.
    fn build_plan(
        &self,
        snapshot: &crate::store::NamespaceSnapshot,
        assignments: &HashMap<String, Vec<String>>,
        now_unix: i64,
    ) -> (HashMap<String, AssignedState>, HashMap<String, ShardMetrics>) {
        let mut plan: HashMap<String, AssignedState> = HashMap::new();
        let mut moved: HashMap<String, ShardMetrics> = HashMap::new();

        for (executor_id, shards) in assignments {
            let previous = snapshot
                .executors
                .get(executor_id)
                .map(|record| &record.assigned.assigned_shards);

            let mut assigned_shards = HashMap::with_capacity(shards.len());
            for shard_id in shards {
                match previous.and_then(|map| map.get(shard_id)) {
                    Some(entry) => {
                        assigned_shards.insert(shard_id.clone(), *entry);
                    }
                    None => {
                        assigned_shards.insert(
                            shard_id.clone(),
                            ShardAssignment {
                                status: AssignmentStatus::Ready,
                            },
                        );
                        let mut metric = snapshot
                            .state
                            .shard_metrics
                            .get(shard_id)
                            .copied()
                            .unwrap_or_default();
                        metric.last_move_time = now_unix;
                        moved.insert(shard_id.clone(), metric);
                    }
                }
            }

            let changed = previous.map_or(true, |map| *map != assigned_shards);
            if changed {
                plan.insert(executor_id.clone(), AssignedState { assigned_shards });
            }
        }

        // Clear the record of every non-live executor still holding shards
        // so no shard has two owners once the plan lands.
        for (executor_id, record) in &snapshot.executors {
            if assignments.contains_key(executor_id) {
                continue;
            }
            if !record.assigned.assigned_shards.is_empty() {
                plan.insert(executor_id.clone(), AssignedState::default());
            }
        }

        (plan, moved)
    }
}
