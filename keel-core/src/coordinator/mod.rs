//! Namespace reconciliation
//!
//! Pure balancing functions plus the leader-gated control loop that applies
//! them to store snapshots.

pub mod balancer;
pub mod election;
pub mod processor;

pub use election::{LeaderElection, LeaderGate};
pub use processor::{NamespaceProcessor, ProcessorConfig, RebalanceOutcome};
