//! Replication Coordinator
//!
//! Long-lived entry point that starts one [`ReplicationOperation`] per write.

use std::sync::Arc;

use crate::config::ReplicationSettings;
use crate::error::Result;
use crate::replication::{Primary, ReplicationOperation, Replicas};
use crate::routing::ClusterStateSupplier;

/// Runs replicated writes of one kind against a shared cluster view
pub struct ReplicationCoordinator<R> {
    op_type: String,
    settings: ReplicationSettings,
    cluster_state: Arc<dyn ClusterStateSupplier>,
    replicas: Arc<R>,
}

impl<R> ReplicationCoordinator<R> {
    pub fn new(
        op_type: impl Into<String>,
        settings: ReplicationSettings,
        cluster_state: Arc<dyn ClusterStateSupplier>,
        replicas: Arc<R>,
    ) -> Self {
        Self {
            op_type: op_type.into(),
            settings,
            cluster_state,
            replicas,
        }
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn settings(&self) -> &ReplicationSettings {
        &self.settings
    }

    /// Replicate `request` through `primary`
    pub async fn execute<P>(&self, request: P::Request, primary: Arc<P>) -> Result<P::Response>
    where
        P: Primary,
        R: Replicas<P::ReplicaRequest>,
    {
        ReplicationOperation::new(
            request,
            primary,
            self.replicas.clone(),
            self.cluster_state.clone(),
            self.op_type.clone(),
            &self.settings,
        )
        .execute()
        .await
    }
}
