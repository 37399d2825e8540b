//! Executor heartbeat client
//!
//! Periodically reports shard loads to the distributor and reconciles the
//! local processor set against the returned assignment: newly assigned
//! shards get a processor, revoked shards are stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::handler::{ExecutorHandler, HeartbeatRequest};
use crate::store::{ExecutorStatus, ShardAssignment};

use super::{ShardProcessor, ShardProcessorFactory};

/// Configuration for an executor client
#[derive(Debug, Clone)]
pub struct ExecutorClientConfig {
    pub namespace: String,
    pub executor_id: String,
    /// Interval between heartbeats. The server-side rate gate caps actual
    /// write frequency, so this can be faster than the refresh rate.
    pub heartbeat_interval: Duration,
}

impl ExecutorClientConfig {
    pub fn new(namespace: impl Into<String>, executor_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            executor_id: executor_id.into(),
            heartbeat_interval: Duration::from_secs(1),
        }
    }
}

/// Heartbeating executor that runs shard processors.
///
/// The transport to the distributor is external; this client speaks to the
/// handler interface directly.
pub struct ExecutorClient {
    config: ExecutorClientConfig,
    handler: Arc<ExecutorHandler>,
    factory: Arc<dyn ShardProcessorFactory>,
    processors: RwLock<HashMap<String, Arc<dyn ShardProcessor>>>,
    status: RwLock<ExecutorStatus>,
}

impl ExecutorClient {
    pub fn new(
        config: ExecutorClientConfig,
        handler: Arc<ExecutorHandler>,
        factory: Arc<dyn ShardProcessorFactory>,
    ) -> Self {
        Self {
            config,
            handler,
            factory,
            processors: RwLock::new(HashMap::new()),
            status: RwLock::new(ExecutorStatus::Active),
        }
    }

    /// Heartbeat until shutdown is signalled.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "executor {} starting in namespace {}",
            self.config.executor_id, self.config.namespace
        );
        let mut ticker = interval(self.config.heartbeat_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.heartbeat_once().await {
                        warn!(
                            "heartbeat failed for executor {}: {}",
                            self.config.executor_id, err
                        );
                    }
                }
                _ = shutdown.recv() => {
                    self.shutdown().await;
                    return;
                }
            }
        }
    }

    /// Send one heartbeat and reconcile processors with the response.
    pub async fn heartbeat_once(&self) -> Result<()> {
        let status = *self.status.read().await;

        let shard_status_reports = {
            let processors = self.processors.read().await;
            processors
                .iter()
                .map(|(shard_id, processor)| (shard_id.clone(), processor.shard_report()))
                .collect()
        };

        let request = HeartbeatRequest {
            namespace: self.config.namespace.clone(),
            executor_id: self.config.executor_id.clone(),
            status,
            shard_status_reports,
        };
        let response = self.handler.heartbeat(&request).await?;
        self.reconcile(response.shard_assignments).await;
        Ok(())
    }

    /// Start processors for newly assigned shards, stop revoked ones.
    async fn reconcile(&self, assigned: HashMap<String, ShardAssignment>) {
        let mut processors = self.processors.write().await;

        let revoked: Vec<String> = processors
            .keys()
            .filter(|shard_id| !assigned.contains_key(*shard_id))
            .cloned()
            .collect();
        for shard_id in revoked {
            if let Some(processor) = processors.remove(&shard_id) {
                processor.stop();
                debug!(
                    "executor {} released shard {}",
                    self.config.executor_id, shard_id
                );
            }
        }

        for shard_id in assigned.keys() {
            if !processors.contains_key(shard_id) {
                let processor = self.factory.new_processor(shard_id);
                processor.start();
                processors.insert(shard_id.clone(), processor);
                debug!(
                    "executor {} picked up shard {}",
                    self.config.executor_id, shard_id
                );
            }
        }
    }

    /// Report DRAINING from the next heartbeat on.
    pub async fn drain(&self) {
        *self.status.write().await = ExecutorStatus::Draining;
    }

    /// Stop all processors and report STOPPED.
    pub async fn shutdown(&self) {
        *self.status.write().await = ExecutorStatus::Stopped;
        let mut processors = self.processors.write().await;
        for (shard_id, processor) in processors.drain() {
            processor.stop();
            debug!(
                "executor {} stopped shard {}",
                self.config.executor_id, shard_id
            );
        }
        info!("executor {} stopped", self.config.executor_id);
    }

    /// Shard ids currently running locally.
    pub async fn running_shards(&self) -> Vec<String> {
        let mut shards: Vec<String> = self.processors.read().await.keys().cloned().collect();
        shards.sort();
        shards
    }
}
