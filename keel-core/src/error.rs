//! Error types for the shard distributor
//!
//! Error taxonomy covering storage, balancing, and executor-facing
//! request handling.

use thiserror::Error;

/// Primary error type for all distributor operations
#[derive(Debug, Error)]
pub enum DistributorError {
    // ========== Storage Errors ==========
    /// No state recorded for this executor yet; treated as a first heartbeat
    #[error("executor {executor_id} not found in namespace {namespace}")]
    ExecutorNotFound {
        namespace: String,
        executor_id: String,
    },

    /// Namespace has no record in the store
    #[error("namespace {namespace} not found")]
    NamespaceNotFound { namespace: String },

    /// Compare-and-set lost against a concurrent writer
    #[error("version conflict writing {record} in namespace {namespace}")]
    VersionConflict { namespace: String, record: String },

    /// Store operation failed
    #[error("storage operation failed: {message}")]
    Storage { message: String },

    /// Record payload could not be encoded or decoded
    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========== Balancing Errors ==========
    /// Balancing was asked to pick from an empty executor set
    #[error("no executors available for placement")]
    NoExecutorsAvailable,

    // ========== Runtime Errors ==========
    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DistributorError {
    /// Returns true for the "no state yet" sentinel on first heartbeat
    pub fn is_not_found(&self) -> bool {
        matches!(self, DistributorError::ExecutorNotFound { .. })
    }

    /// Returns true if a compare-and-set write lost the race
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, DistributorError::VersionConflict { .. })
    }

    /// Returns true if the operation may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DistributorError::Storage { .. } | DistributorError::VersionConflict { .. }
        )
    }
}

/// Result type alias for distributor operations
pub type Result<T> = std::result::Result<T, DistributorError>;
