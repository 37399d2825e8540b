//! Executor-facing heartbeat handler
//!
//! Stateless request handler for the heartbeat channel. Reads prior state,
//! rate-gates writes, folds reported shard loads into the server-side EWMA,
//! and answers with the authoritative assignment.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::TimeSource;
use crate::coordinator::balancer::safe_load;
use crate::error::Result;
use crate::metrics::standard;
use crate::store::{
    AssignedState, ExecutorStatus, HeartbeatState, ShardAssignment,
    ShardStatusReport, Store,
};
use crate::{EWMA_ALPHA, HEARTBEAT_REFRESH_RATE};

/// Heartbeat request from an executor.
#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    pub namespace: String,
    pub executor_id: String,
    pub status: ExecutorStatus,
    pub shard_status_reports: HashMap<String, ShardStatusReport>,
}

/// Heartbeat response: the authoritative shard set for the executor.
///
/// `shard_assignments` is always present; an executor with nothing assigned
/// receives an empty map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeartbeatResponse {
    pub shard_assignments: HashMap<String, ShardAssignment>,
}

/// Stateless heartbeat handler. Reentrant; holds no cross-request state.
pub struct ExecutorHandler {
    storage: Arc<dyn Store>,
    time_source: Arc<dyn TimeSource>,
}

impl ExecutorHandler {
    pub fn new(storage: Arc<dyn Store>, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            storage,
            time_source,
        }
    }

    /// Process one heartbeat.
    ///
    /// The sequence is read, optional heartbeat write, optional metrics
    /// write. A heartbeat whose status is unchanged within the refresh rate
    /// touches nothing and answers from the read.
    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        standard::HEARTBEATS_RECEIVED.inc();

        // An executor heartbeating for the first time has no state yet.
        let (previous_heartbeat, assigned_shards) = match self
            .storage
            .get_heartbeat(&request.namespace, &request.executor_id)
            .await
        {
            Ok((heartbeat, assigned)) => (Some(heartbeat), assigned),
            Err(err) if err.is_not_found() => (None, AssignedState::default()),
            Err(err) => return Err(err),
        };

        let now = self.time_source.now();

        // A status change must be visible promptly; otherwise heartbeat
        // writes are capped at one per refresh interval per executor.
        if let Some(previous) = &previous_heartbeat {
            if request.status == previous.status
                && now.timestamp() - previous.last_heartbeat
                    < HEARTBEAT_REFRESH_RATE.as_secs() as i64
            {
                standard::HEARTBEATS_THROTTLED.inc();
                return Ok(convert_response(&assigned_shards));
            }
        }

        let new_heartbeat = HeartbeatState {
            last_heartbeat: now.timestamp(),
            status: request.status,
            reported_shards: request.shard_status_reports.clone(),
        };
        self.storage
            .record_heartbeat(&request.namespace, &request.executor_id, new_heartbeat)
            .await?;

        self.update_shard_load(request, &assigned_shards, now).await?;

        Ok(convert_response(&assigned_shards))
    }

    /// Fold reported loads into the namespace-wide smoothed metrics.
    ///
    /// Only shards that are both assigned to this executor and present in
    /// the report are touched; a departing owner cannot corrupt the value
    /// for a shard that already moved, and an assigned shard with no report
    /// keeps its previous smoothed load.
    async fn update_shard_load(
        &self,
        request: &HeartbeatRequest,
        assigned_shards: &AssignedState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let state = self.storage.get_state(&request.namespace).await?;

        let mut new_shard_metrics = HashMap::new();
        for (shard_id, report) in &request.shard_status_reports {
            if !assigned_shards.assigned_shards.contains_key(shard_id) {
                continue;
            }

            let reported = safe_load(report.shard_load);
            let mut metric = state
                .shard_metrics
                .get(shard_id)
                .copied()
                .unwrap_or_default();
            // An entry the balancer created but never load-updated carries
            // no prior smoothed value; the first report seeds the average.
            metric.smoothed_load = if metric.last_update_time > 0 {
                EWMA_ALPHA * reported + (1.0 - EWMA_ALPHA) * safe_load(metric.smoothed_load)
            } else {
                reported
            };
            metric.last_update_time = metric.last_update_time.max(now.timestamp());
            new_shard_metrics.insert(shard_id.clone(), metric);
        }

        if new_shard_metrics.is_empty() {
            return Ok(());
        }

        match self
            .storage
            .update_shard_metrics(&request.namespace, &request.executor_id, new_shard_metrics)
            .await
        {
            // Expected under concurrent balancer writes; the next heartbeat
            // retries with fresh state.
            Err(err) if err.is_version_conflict() => {
                standard::METRIC_CONFLICTS_SWALLOWED.inc();
                debug!(
                    "shard metric update conflict in namespace {}, executor {}",
                    request.namespace, request.executor_id
                );
                Ok(())
            }
            other => other,
        }
    }
}

fn convert_response(shards: &AssignedState) -> HeartbeatResponse {
    HeartbeatResponse {
        shard_assignments: shards.assigned_shards.clone(),
    }
}
