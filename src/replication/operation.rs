//! Replication Operation
//!
//! Drives one write through consistency check, primary execution, and
//! concurrent replica fan-out, then delivers exactly one result.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use futures::FutureExt;
use tokio::sync::oneshot;

use crate::config::ReplicationSettings;
use crate::error::{Error, Result};
use crate::replication::consistency::{check_write_consistency, WriteConsistencyLevel};
use crate::replication::failure::ReplicaFailureKind;
use crate::replication::shard_info::{ShardFailure, ShardInfo};
use crate::replication::{
    FailShardOutcome, Primary, PrimaryResult, Replicas, ReplicaRequest, ReplicationRequest,
    ReplicationResponse,
};
use crate::routing::{ClusterStateSupplier, ShardId, ShardRouting};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A single in-flight replicated write
pub struct ReplicationOperation<P, R>
where
    P: Primary,
    R: Replicas<P::ReplicaRequest>,
{
    request: P::Request,
    primary: Arc<P>,
    replicas: Arc<R>,
    cluster_state: Arc<dyn ClusterStateSupplier>,
    op_type: String,
    consistency_level: WriteConsistencyLevel,
    execute_on_replicas: bool,
    check_write_consistency: bool,
}

/// Progress shared between the operation and its replica tasks
struct OperationState<Response> {
    shard_id: ShardId,
    op_type: String,
    total: AtomicUsize,
    pending: AtomicUsize,
    successful: AtomicUsize,
    finished: AtomicBool,
    primary_failed: AtomicBool,
    failures: Mutex<Vec<ShardFailure>>,
    final_response: Mutex<Option<Response>>,
    listener: Mutex<Option<oneshot::Sender<Result<Response>>>>,
}

impl<P, R> ReplicationOperation<P, R>
where
    P: Primary,
    R: Replicas<P::ReplicaRequest>,
{
    /// Create a new operation.
    ///
    /// A request asking for [`WriteConsistencyLevel::Default`] gets the
    /// level configured in `settings`.
    pub fn new(
        request: P::Request,
        primary: Arc<P>,
        replicas: Arc<R>,
        cluster_state: Arc<dyn ClusterStateSupplier>,
        op_type: impl Into<String>,
        settings: &ReplicationSettings,
    ) -> Self {
        let consistency_level = request
            .consistency_level()
            .resolve(settings.default_consistency());
        Self {
            request,
            primary,
            replicas,
            cluster_state,
            op_type: op_type.into(),
            consistency_level,
            execute_on_replicas: settings.execute_on_replicas,
            check_write_consistency: settings.check_write_consistency,
        }
    }

    /// Run the operation to completion.
    ///
    /// Resolves with the primary's response carrying [`ShardInfo`], or with
    /// the error that aborted the operation. Replica tasks still running when
    /// the operation fails keep running, but their outcomes are discarded.
    pub async fn execute(self) -> Result<P::Response> {
        let (tx, rx) = oneshot::channel();
        let shard_id = self.primary.routing_entry().shard_id().clone();
        let state = Arc::new(OperationState::new(shard_id, self.op_type.clone(), tx));

        if let Err(e) = self.run(&state).await {
            state.finish_as_failed(e);
        }

        rx.await
            .map_err(|_| Error::Internal("replication operation dropped its listener".into()))?
    }

    async fn run(&self, state: &Arc<OperationState<P::Response>>) -> Result<()> {
        let primary_routing = self.primary.routing_entry();
        let shard_id = primary_routing.shard_id().clone();

        if self.check_write_consistency {
            if let Some(failure) = self.consistency_failure(&shard_id) {
                return Err(failure);
            }
        }

        state.total.fetch_add(1, Ordering::SeqCst);
        // Held until every replica has been dispatched
        state.pending.fetch_add(1, Ordering::SeqCst);

        let PrimaryResult {
            response,
            replica_request,
        } = self.primary.perform(&self.request).await?;
        state.successful.fetch_add(1, Ordering::SeqCst);
        *lock(&state.final_response) = Some(response);

        debug_assert!(
            replica_request.primary_term() > 0,
            "replica request doesn't have a primary term"
        );
        tracing::trace!(
            "{} op [{}] completed on primary for request [{}]",
            shard_id,
            self.op_type,
            self.request
        );

        // Re-read the cluster state: a copy that started recovering or
        // relocating while the primary executed must still get this write.
        let cluster_state = self.cluster_state.state();
        let shards = cluster_state.routing_table().shards_of(&shard_id);
        let local_node_id = primary_routing.current_node_id();
        let replica_request = Arc::new(replica_request);

        for shard in shards {
            if !self.execute_on_replicas || shard.is_unassigned() {
                if !shard.primary() {
                    state.total.fetch_add(1, Ordering::SeqCst);
                }
                continue;
            }

            if shard.current_node_id() != local_node_id {
                self.perform_on_replica(state, shard.clone(), replica_request.clone());
            }

            if shard.is_relocating() && shard.relocating_node_id() != local_node_id {
                if let Some(target) = shard.build_target_relocating_shard() {
                    self.perform_on_replica(state, target, replica_request.clone());
                }
            }
        }

        state.dec_pending_and_finish_if_needed();
        Ok(())
    }

    fn perform_on_replica(
        &self,
        state: &Arc<OperationState<P::Response>>,
        shard: ShardRouting,
        replica_request: Arc<P::ReplicaRequest>,
    ) {
        tracing::trace!(
            "{} sending op [{}] to replica {} for request [{:?}]",
            shard.shard_id(),
            self.op_type,
            shard,
            replica_request
        );

        state.total.fetch_add(1, Ordering::SeqCst);
        state.pending.fetch_add(1, Ordering::SeqCst);

        let state = state.clone();
        let primary = self.primary.clone();
        let replicas = self.replicas.clone();
        tokio::spawn(async move {
            // A panicking replica transport must still resolve its pending slot
            let result = AssertUnwindSafe(replicas.perform_on(&shard, &replica_request))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Internal(format!("replica operation on {} panicked", shard)))
                });
            match result {
                Ok(()) => {
                    state.successful.fetch_add(1, Ordering::SeqCst);
                    state.dec_pending_and_finish_if_needed();
                }
                Err(e) => {
                    on_replica_failure(&state, &*primary, &*replicas, &shard, &replica_request, e)
                        .await;
                }
            }
        });
    }

    /// `None` when the write may proceed, otherwise the error to fail with
    fn consistency_failure(&self, shard_id: &ShardId) -> Option<Error> {
        let level = self.consistency_level;
        let state = self.cluster_state.state();

        let Some(index_table) = state.routing_table().index(&shard_id.index) else {
            tracing::trace!(
                "{} not enough active copies to meet write consistency of [{}] (index [{}] not found in cluster state), scheduling a retry. op [{}], request [{}]",
                shard_id,
                level,
                shard_id.index,
                self.op_type,
                self.request
            );
            return Some(self.unavailable(
                shard_id,
                0,
                1,
                format!(
                    "Not enough active copies to meet write consistency of [{}] (index [{}] not found in cluster state).",
                    level, shard_id.index
                ),
            ));
        };

        let shortfall = check_write_consistency(level, index_table.shard(shard_id.id))?;
        tracing::trace!(
            "{} not enough active copies to meet write consistency of [{}] (have {}, needed {}), scheduling a retry. op [{}], request [{}]",
            shard_id,
            level,
            shortfall.have,
            shortfall.need,
            self.op_type,
            self.request
        );
        Some(self.unavailable(
            shard_id,
            shortfall.have,
            shortfall.need,
            format!(
                "Not enough active copies to meet write consistency of [{}] (have {}, needed {}).",
                level, shortfall.have, shortfall.need
            ),
        ))
    }

    fn unavailable(&self, shard_id: &ShardId, have: usize, need: usize, reason: String) -> Error {
        Error::UnavailableShards {
            shard_id: shard_id.clone(),
            have,
            need,
            reason,
            timeout: self.request.timeout(),
            request: self.request.to_string(),
        }
    }
}

async fn on_replica_failure<P, R>(
    state: &Arc<OperationState<P::Response>>,
    primary: &P,
    replicas: &R,
    shard: &ShardRouting,
    replica_request: &P::ReplicaRequest,
    cause: Error,
) where
    P: Primary,
    R: Replicas<P::ReplicaRequest>,
{
    tracing::trace!(
        "{} failure while performing [{}] on replica {}, request [{:?}]: {}",
        shard.shard_id(),
        state.op_type,
        shard,
        replica_request,
        cause
    );

    if ReplicaFailureKind::classify(&cause).is_ignorable() {
        state.dec_pending_and_finish_if_needed();
        return;
    }

    let cause = Arc::new(cause);
    lock(&state.failures).push(ShardFailure::new(
        shard.shard_id().clone(),
        shard.current_node_id().map(str::to_string),
        cause.clone(),
        false,
    ));

    let message = format!("failed to perform {} on replica {}", state.op_type, shard);
    tracing::warn!("{} {}: {}", shard.shard_id(), message, cause);

    let primary_routing = primary.routing_entry();
    let outcome = AssertUnwindSafe(replicas.fail_shard(shard, &primary_routing, &message, &cause))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            FailShardOutcome::Ignored(Error::Internal(format!(
                "failing replica {} panicked",
                shard
            )))
        });
    match outcome {
        FailShardOutcome::Failed => state.dec_pending_and_finish_if_needed(),
        FailShardOutcome::PrimaryDemoted(demotion) => {
            on_primary_demoted(state, primary, &primary_routing, demotion);
        }
        FailShardOutcome::Ignored(e) => {
            tracing::debug!("{} ignoring failure to fail replica {}: {}", shard.shard_id(), shard, e);
            state.dec_pending_and_finish_if_needed();
        }
    }
}

fn on_primary_demoted<P: Primary>(
    state: &OperationState<P::Response>,
    primary: &P,
    primary_routing: &ShardRouting,
    demotion: Error,
) {
    let message = format!(
        "primary shard [{}] was demoted while failing replica shard",
        primary_routing
    );
    tracing::warn!("{} {}: {}", state.shard_id, message, demotion);

    // We are no longer the primary: fail ourselves and let the caller start over
    if !state.primary_failed.swap(true, Ordering::SeqCst) {
        primary.fail_shard(&message, &demotion);
    }
    state.finish_as_failed(Error::RetryOnPrimary {
        shard_id: state.shard_id.clone(),
        message,
        cause: Arc::new(demotion),
    });
}

impl<Response: ReplicationResponse> OperationState<Response> {
    fn new(shard_id: ShardId, op_type: String, listener: oneshot::Sender<Result<Response>>) -> Self {
        Self {
            shard_id,
            op_type,
            total: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            successful: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            primary_failed: AtomicBool::new(false),
            failures: Mutex::new(Vec::new()),
            final_response: Mutex::new(None),
            listener: Mutex::new(Some(listener)),
        }
    }

    fn dec_pending_and_finish_if_needed(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "pending shard count went negative");
        if previous == 1 {
            self.finish();
        }
    }

    fn finish(&self) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let failures = std::mem::take(&mut *lock(&self.failures));
        let shard_info = ShardInfo::new(
            self.total.load(Ordering::SeqCst),
            self.successful.load(Ordering::SeqCst),
            failures,
        );
        tracing::debug!(
            "{} op [{}] finished: total [{}], successful [{}], failed [{}]",
            self.shard_id,
            self.op_type,
            shard_info.total,
            shard_info.successful,
            shard_info.failed()
        );

        let result = match lock(&self.final_response).take() {
            Some(mut response) => {
                response.set_shard_info(shard_info);
                Ok(response)
            }
            None => Err(Error::Internal(format!(
                "{} op [{}] finished without a primary response",
                self.shard_id, self.op_type
            ))),
        };
        self.deliver(result);
    }

    fn finish_as_failed(&self, error: Error) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.deliver(Err(error));
        }
    }

    fn deliver(&self, result: Result<Response>) {
        if let Some(listener) = lock(&self.listener).take() {
            // The caller may have stopped waiting
            let _ = listener.send(result);
        }
    }
}
