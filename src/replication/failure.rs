//! Replica Failure Classification

use crate::error::Error;

/// Why a copy is considered gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotAvailableReason {
    ShardNotFound,
    IndexNotFound,
    /// Copy was relocated away, closed, or is still recovering
    IllegalShardState,
    NoShardAvailable,
    UnavailableShards,
    NodeClosed,
}

/// A newer operation already reached the copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    VersionConflict,
    DocumentMissing,
}

/// How a failed replica operation is accounted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaFailureKind {
    /// The target copy no longer exists where we sent the operation
    ShardNotAvailable(NotAvailableReason),
    /// Operations apply in primary order, so a later one got there first
    SupersededWrite(ConflictKind),
    /// A real failure: recorded and the copy is failed
    Fatal,
}

impl ReplicaFailureKind {
    /// Classify the cause of a replica failure, looking through transport wrappers
    pub fn classify(error: &Error) -> ReplicaFailureKind {
        use NotAvailableReason::*;

        match error.unwrap_cause() {
            Error::ShardNotFound(_) => ReplicaFailureKind::ShardNotAvailable(ShardNotFound),
            Error::IndexNotFound(_) => ReplicaFailureKind::ShardNotAvailable(IndexNotFound),
            Error::IllegalShardState { .. } => {
                ReplicaFailureKind::ShardNotAvailable(IllegalShardState)
            }
            Error::NoShardAvailable(_) => ReplicaFailureKind::ShardNotAvailable(NoShardAvailable),
            Error::UnavailableShards { .. } => {
                ReplicaFailureKind::ShardNotAvailable(UnavailableShards)
            }
            Error::NodeClosed(_) => ReplicaFailureKind::ShardNotAvailable(NodeClosed),
            Error::VersionConflict { .. } => {
                ReplicaFailureKind::SupersededWrite(ConflictKind::VersionConflict)
            }
            Error::DocumentMissing { .. } => {
                ReplicaFailureKind::SupersededWrite(ConflictKind::DocumentMissing)
            }
            _ => ReplicaFailureKind::Fatal,
        }
    }

    /// Dropped without a failure record
    pub fn is_ignorable(&self) -> bool {
        !matches!(self, ReplicaFailureKind::Fatal)
    }
}
