//! Shard Info
//!
//! Per-operation report of how many shard copies took a write.

use std::sync::Arc;
use serde::{Serialize, Serializer};

use crate::error::Error;
use crate::routing::ShardId;

/// A shard copy that did not take the write
#[derive(Debug, Clone, Serialize)]
pub struct ShardFailure {
    pub shard_id: ShardId,
    pub node_id: Option<String>,
    #[serde(rename = "reason", serialize_with = "serialize_cause")]
    pub cause: Arc<Error>,
    pub primary: bool,
    /// Whether resending to this copy may succeed
    pub retryable: bool,
    pub failed_at: chrono::DateTime<chrono::Utc>,
}

impl ShardFailure {
    pub fn new(shard_id: ShardId, node_id: Option<String>, cause: Arc<Error>, primary: bool) -> Self {
        let retryable = cause.is_retryable();
        Self {
            shard_id,
            node_id,
            cause,
            primary,
            retryable,
            failed_at: chrono::Utc::now(),
        }
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }
}

fn serialize_cause<S: Serializer>(cause: &Arc<Error>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&cause.to_string())
}

/// Totals of a replicated write
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShardInfo {
    /// Copies that had to take the write, including unassigned ones
    pub total: usize,
    /// Copies that acknowledged it
    pub successful: usize,
    /// Recorded failures, in the order they occurred
    pub failures: Vec<ShardFailure>,
}

impl ShardInfo {
    pub fn new(total: usize, successful: usize, failures: Vec<ShardFailure>) -> Self {
        Self {
            total,
            successful,
            failures,
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}
