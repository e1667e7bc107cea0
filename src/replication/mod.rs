//! Replication Module
//!
//! Executes a write on a shard's primary copy, then fans the resulting
//! operation out to every replica copy and accounts for the outcome.

pub mod consistency;
mod coordinator;
mod failure;
mod operation;
mod shard_info;

pub use consistency::{check_write_consistency, ConsistencyShortfall, WriteConsistencyLevel};
pub use coordinator::ReplicationCoordinator;
pub use failure::{ConflictKind, NotAvailableReason, ReplicaFailureKind};
pub use operation::ReplicationOperation;
pub use shard_info::{ShardFailure, ShardInfo};

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::routing::{ShardId, ShardRouting};

/// A client write entering the replication path
pub trait ReplicationRequest: fmt::Display + Send + Sync + 'static {
    /// Shard the write targets
    fn shard_id(&self) -> &ShardId;

    /// How long the caller is prepared to wait
    fn timeout(&self) -> Duration;

    /// Requested write consistency
    fn consistency_level(&self) -> WriteConsistencyLevel;
}

/// The operation derived by the primary and shipped to replicas
pub trait ReplicaRequest: fmt::Debug + Send + Sync + 'static {
    fn shard_id(&self) -> &ShardId;

    /// Term of the primary that produced this operation. Always positive.
    fn primary_term(&self) -> u64;
}

/// Response returned to the client, annotated with shard totals
pub trait ReplicationResponse: Send + 'static {
    fn set_shard_info(&mut self, shard_info: ShardInfo);

    fn shard_info(&self) -> Option<&ShardInfo>;
}

/// What the primary produced for one request
#[derive(Debug)]
pub struct PrimaryResult<Response, Replica> {
    /// Provisional response for the client
    pub response: Response,
    /// Operation every replica must apply, exactly as the primary resolved it
    pub replica_request: Replica,
}

/// The local primary copy of a shard
#[async_trait::async_trait]
pub trait Primary: Send + Sync + 'static {
    type Request: ReplicationRequest;
    type ReplicaRequest: ReplicaRequest;
    type Response: ReplicationResponse;

    /// Routing entry of this primary
    fn routing_entry(&self) -> ShardRouting;

    /// Fail this primary, typically after learning it was demoted
    fn fail_shard(&self, message: &str, cause: &Error);

    /// Apply the request to the primary
    async fn perform(
        &self,
        request: &Self::Request,
    ) -> Result<PrimaryResult<Self::Response, Self::ReplicaRequest>>;
}

/// Outcome of asking the master to fail a replica copy
#[derive(Debug)]
pub enum FailShardOutcome {
    /// The copy was removed from the active set
    Failed,
    /// Rejected because the requesting primary is no longer the primary
    PrimaryDemoted(Error),
    /// Could not fail the copy, but the operation may finish anyway.
    /// Reserved for node shutdown and similar.
    Ignored(Error),
}

/// Remote replica copies of a shard
#[async_trait::async_trait]
pub trait Replicas<R: ReplicaRequest>: Send + Sync + 'static {
    /// Apply `request` on `replica`
    async fn perform_on(&self, replica: &ShardRouting, request: &R) -> Result<()>;

    /// Remove `replica` from the active copies of its shard
    async fn fail_shard(
        &self,
        replica: &ShardRouting,
        primary: &ShardRouting,
        message: &str,
        cause: &Error,
    ) -> FailShardOutcome;
}
