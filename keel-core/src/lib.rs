//! Keel Core - Load-aware shard distributor control plane
//!
//! This crate provides the core of a shard distributor service:
//! - Heartbeat handling and server-side load aggregation
//! - Load-based shard placement and rebalancing
//! - Per-namespace reconciliation loop behind leader election
//! - Executor-side client runtime with synthetic load processors

pub mod clock;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod handler;
pub mod metrics;
pub mod store;

pub use error::DistributorError;
pub use handler::ExecutorHandler;

use std::time::Duration;

/// Minimum interval between heartbeat writes for an unchanged status.
pub const HEARTBEAT_REFRESH_RATE: Duration = Duration::from_secs(2);

/// Smoothing factor for the server-side EWMA of reported shard load.
pub const EWMA_ALPHA: f64 = 0.1;

/// Window after a shard move during which the shard cannot move again.
pub const MOVE_COOLDOWN_SECS: i64 = 60;
