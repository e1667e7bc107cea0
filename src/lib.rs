//! WolfShard - Primary/Replica Write Replication
//!
//! Coordinates a single replicated write on a sharded store: the write is
//! applied to the shard's primary copy first, then fanned out concurrently to
//! every replica copy listed in a fresh routing snapshot.
//!
//! # Architecture
//!
//! A [`replication::ReplicationOperation`] drives one write. Collaborators are
//! traits: the local [`replication::Primary`], the remote
//! [`replication::Replicas`], and a [`routing::ClusterStateSupplier`] that
//! returns the current routing table on every call.
//!
//! # Features
//!
//! - Write consistency gate (one, quorum, all) checked before the primary runs
//! - Relocation-aware replica fan-out
//! - Benign replica failures (shard gone, superseded write) kept out of the result
//! - Primary demotion detected while failing a replica, surfaced as retryable
//! - In-memory simulated cluster with fault injection

pub mod config;
pub mod error;
pub mod replication;
pub mod routing;
pub mod simulation;

pub use config::WolfShardConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ReplicationSettings, WolfShardConfig};
    pub use crate::error::{Error, Result};
    pub use crate::replication::{
        FailShardOutcome, Primary, PrimaryResult, Replicas, ReplicaRequest,
        ReplicationCoordinator, ReplicationOperation, ReplicationRequest, ReplicationResponse,
        ShardFailure, ShardInfo, WriteConsistencyLevel,
    };
    pub use crate::routing::{ClusterState, ClusterStateSupplier, ShardId, ShardRouting};
}
