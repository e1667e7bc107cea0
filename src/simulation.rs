//! In-Memory Cluster Simulation
//!
//! A small document store spread over simulated nodes. Primaries assign
//! versions, replicas apply them in order, and a master-like view of the
//! cluster state fails copies on request. Faults from [`SimulationConfig`]
//! are injected on the replica path.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{FaultKind, ReplicationSettings, SimulationConfig};
use crate::error::{Error, Result};
use crate::replication::{
    FailShardOutcome, Primary, PrimaryResult, ReplicaRequest, Replicas, ReplicationCoordinator,
    ReplicationRequest, ReplicationResponse, ShardInfo, WriteConsistencyLevel,
};
use crate::routing::{
    ClusterState, ClusterStateHolder, ClusterStateSupplier, RoutingTable, RoutingTableBuilder,
    ShardId, ShardRouting,
};

const WRITE_ACTION: &str = "indices:data/write/index[r]";

/// Engine message carried by a fired `demote_on_fail` fault
const DEMOTING_FAILURE: &str = "simulated replica failure, master will reject the primary";

/// A client write of one document
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub shard_id: ShardId,
    pub id: String,
    pub body: serde_json::Value,
    pub timeout: Duration,
    pub consistency: WriteConsistencyLevel,
}

impl fmt::Display for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index {{{}}} [{}]", self.shard_id, self.id)
    }
}

impl ReplicationRequest for WriteRequest {
    fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn consistency_level(&self) -> WriteConsistencyLevel {
        self.consistency
    }
}

/// The write as resolved by the primary
#[derive(Debug, Clone)]
pub struct ReplicaWrite {
    pub shard_id: ShardId,
    pub id: String,
    pub version: u64,
    pub body: serde_json::Value,
    pub primary_term: u64,
}

impl ReplicaRequest for ReplicaWrite {
    fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    fn primary_term(&self) -> u64 {
        self.primary_term
    }
}

/// Result of a write
#[derive(Debug, Clone, Serialize)]
pub struct WriteResponse {
    pub index: String,
    pub shard: u32,
    pub id: String,
    pub version: u64,
    pub created: bool,
    #[serde(rename = "_shards", skip_serializing_if = "Option::is_none")]
    pub shard_info: Option<ShardInfo>,
}

impl ReplicationResponse for WriteResponse {
    fn set_shard_info(&mut self, shard_info: ShardInfo) {
        self.shard_info = Some(shard_info);
    }

    fn shard_info(&self) -> Option<&ShardInfo> {
        self.shard_info.as_ref()
    }
}

/// A stored document
#[derive(Debug, Clone)]
pub struct Document {
    pub version: u64,
    pub body: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

type ShardStore = HashMap<String, Document>;

/// One simulated node and the shard copies it holds
#[derive(Debug, Default)]
struct SimNode {
    shards: RwLock<HashMap<ShardId, ShardStore>>,
    closed: AtomicBool,
}

/// Simulated cluster: nodes, their data, and the master's view
pub struct SimCluster {
    config: SimulationConfig,
    nodes: HashMap<String, SimNode>,
    state: Arc<ClusterStateHolder>,
    terms: std::sync::RwLock<HashMap<ShardId, u64>>,
}

impl SimCluster {
    /// Lay out `config.shards` shards over the configured nodes.
    ///
    /// Shard `n` has its primary on node `n mod nodes`, and its replicas on
    /// the nodes that follow.
    pub fn new(config: SimulationConfig) -> Result<Arc<Self>> {
        let node_ids = config.node_ids();
        if node_ids.is_empty() {
            return Err(Error::Config("simulation needs at least one node".into()));
        }
        if config.replicas >= node_ids.len() {
            return Err(Error::Config(format!(
                "cannot place {} replicas on {} nodes",
                config.replicas,
                node_ids.len()
            )));
        }

        let mut builder = RoutingTable::builder();
        let mut terms = HashMap::new();
        for shard in 0..config.shards {
            let shard_id = ShardId::new(config.index.clone(), shard);
            let copies = (0..=config.replicas)
                .map(|copy| {
                    let node = &node_ids[(shard as usize + copy) % node_ids.len()];
                    ShardRouting::started(shard_id.clone(), node.as_str(), copy == 0)
                })
                .collect();
            builder = builder.shard(shard_id.clone(), copies);
            terms.insert(shard_id, 1);
        }

        let nodes = node_ids
            .into_iter()
            .map(|id| (id, SimNode::default()))
            .collect();

        tracing::info!(
            "Simulated cluster: index [{}], {} shards, {} replicas",
            config.index,
            config.shards,
            config.replicas
        );

        Ok(Arc::new(Self {
            config,
            nodes,
            state: Arc::new(ClusterStateHolder::new(ClusterState::new(1, builder.build()))),
            terms: std::sync::RwLock::new(terms),
        }))
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Shared cluster state
    pub fn state_holder(&self) -> Arc<ClusterStateHolder> {
        self.state.clone()
    }

    /// Current primary term of a shard
    pub fn primary_term(&self, shard_id: &ShardId) -> u64 {
        self.terms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(shard_id)
            .copied()
            .unwrap_or(0)
    }

    /// Shard a document id routes to
    pub fn shard_for(&self, id: &str) -> ShardId {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let shard = (hasher.finish() % self.config.shards.max(1) as u64) as u32;
        ShardId::new(self.config.index.clone(), shard)
    }

    /// Build a write request for a document
    pub fn write_request(&self, id: impl Into<String>, body: serde_json::Value) -> WriteRequest {
        let id = id.into();
        WriteRequest {
            shard_id: self.shard_for(&id),
            id,
            body,
            timeout: self.config.timeout(),
            consistency: WriteConsistencyLevel::Default,
        }
    }

    /// Handle on the current primary copy of a shard
    pub fn primary(self: &Arc<Self>, shard_id: &ShardId) -> Result<SimPrimary> {
        let state = self.state.state();
        let routing = state
            .routing_table()
            .shard_routing_table(shard_id)
            .ok_or_else(|| Error::ShardNotFound(shard_id.clone()))?
            .primary_shard()
            .filter(|p| p.active())
            .cloned()
            .ok_or_else(|| Error::NoShardAvailable(shard_id.clone()))?;

        Ok(SimPrimary {
            cluster: self.clone(),
            routing,
            term: self.primary_term(shard_id),
            failed: AtomicBool::new(false),
        })
    }

    /// Replica transport for this cluster
    pub fn replicas(self: &Arc<Self>) -> SimReplicas {
        SimReplicas {
            cluster: self.clone(),
        }
    }

    /// Coordinator wired to this cluster
    pub fn coordinator(self: &Arc<Self>, settings: ReplicationSettings) -> ReplicationCoordinator<SimReplicas> {
        ReplicationCoordinator::new(
            "index",
            settings,
            self.state.clone(),
            Arc::new(self.replicas()),
        )
    }

    /// Stored document on one node
    pub async fn document(&self, node: &str, shard_id: &ShardId, id: &str) -> Option<Document> {
        let node = self.nodes.get(node)?;
        let shards = node.shards.read().await;
        shards.get(shard_id)?.get(id).cloned()
    }

    /// Stop a node from serving shard operations
    pub fn close_node(&self, node: &str) {
        if let Some(n) = self.nodes.get(node) {
            n.closed.store(true, Ordering::SeqCst);
            tracing::info!("Node {} closed", node);
        }
    }

    /// Fail the primary of a shard and promote its first active replica,
    /// bumping the primary term. Returns the new term.
    pub fn promote_replica(&self, shard_id: &ShardId) -> Result<u64> {
        let mut promoted = None;
        let state = self.state.update(|state| {
            let copies = state.routing_table().shards_of(shard_id);
            let next = copies.iter().position(|c| !c.primary() && c.active());
            let copies: Vec<ShardRouting> = copies
                .iter()
                .enumerate()
                .map(|(i, copy)| {
                    if copy.primary() {
                        ShardRouting::unassigned(shard_id.clone(), false)
                    } else if Some(i) == next {
                        promoted = Some(copy.clone());
                        copy.promoted_to_primary()
                    } else {
                        copy.clone()
                    }
                })
                .collect();
            if promoted.is_none() {
                return state.clone();
            }
            let table = RoutingTableBuilder::from(state.routing_table())
                .shard(shard_id.clone(), copies)
                .build();
            state.with_routing_table(table)
        });

        let promoted = promoted.ok_or_else(|| Error::NoShardAvailable(shard_id.clone()))?;
        let mut terms = self.terms.write().unwrap_or_else(|e| e.into_inner());
        let term = terms.entry(shard_id.clone()).or_insert(0);
        *term += 1;
        tracing::info!(
            "{} promoted {} to primary in term [{}], cluster state version [{}]",
            shard_id,
            promoted,
            term,
            state.version()
        );
        Ok(*term)
    }

    fn node(&self, node_id: &str) -> Result<&SimNode> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| Error::NodeDisconnected(node_id.to_string()))?;
        if node.closed.load(Ordering::SeqCst) {
            return Err(Error::NodeClosed(node_id.to_string()));
        }
        Ok(node)
    }

    /// Fault to inject for one replica operation on `node`, if any fires
    fn sample_fault(&self, node: &str) -> Option<FaultKind> {
        self.config
            .faults_for(node)
            .find(|fault| rand::random::<f64>() < fault.probability)
            .map(|fault| fault.kind)
    }

    /// Whether `cause` came from a `demote_on_fail` fault that fired
    fn demotes_on_fail(cause: &Error) -> bool {
        matches!(cause.unwrap_cause(), Error::Engine(message) if message == DEMOTING_FAILURE)
    }
}

/// Primary copy of one shard on its node
pub struct SimPrimary {
    cluster: Arc<SimCluster>,
    routing: ShardRouting,
    term: u64,
    failed: AtomicBool,
}

impl SimPrimary {
    /// Whether this primary failed itself
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn term(&self) -> u64 {
        self.term
    }
}

#[async_trait::async_trait]
impl Primary for SimPrimary {
    type Request = WriteRequest;
    type ReplicaRequest = ReplicaWrite;
    type Response = WriteResponse;

    fn routing_entry(&self) -> ShardRouting {
        self.routing.clone()
    }

    fn fail_shard(&self, message: &str, cause: &Error) {
        self.failed.store(true, Ordering::SeqCst);
        tracing::warn!("{} failing primary {}: {}: {}", self.routing.shard_id(), self.routing, message, cause);
    }

    async fn perform(&self, request: &WriteRequest) -> Result<PrimaryResult<WriteResponse, ReplicaWrite>> {
        let shard_id = self.routing.shard_id();
        let node_id = self
            .routing
            .current_node_id()
            .ok_or_else(|| Error::NoShardAvailable(shard_id.clone()))?;
        if self.is_failed() {
            return Err(Error::IllegalShardState {
                shard_id: shard_id.clone(),
                state: self.routing.state(),
                reason: "primary was failed".into(),
            });
        }

        let node = self.cluster.node(node_id)?;
        let mut shards = node.shards.write().await;
        let store = shards.entry(shard_id.clone()).or_default();
        let (version, created) = match store.get(&request.id) {
            Some(doc) => (doc.version + 1, false),
            None => (1, true),
        };
        store.insert(
            request.id.clone(),
            Document {
                version,
                body: request.body.clone(),
                updated_at: Utc::now(),
            },
        );

        tracing::trace!("{} [{}] indexed on primary, version [{}]", shard_id, request.id, version);

        Ok(PrimaryResult {
            response: WriteResponse {
                index: shard_id.index.clone(),
                shard: shard_id.id,
                id: request.id.clone(),
                version,
                created,
                shard_info: None,
            },
            replica_request: ReplicaWrite {
                shard_id: shard_id.clone(),
                id: request.id.clone(),
                version,
                body: request.body.clone(),
                primary_term: self.term,
            },
        })
    }
}

/// Sends replica writes to simulated nodes and fails copies through the master
pub struct SimReplicas {
    cluster: Arc<SimCluster>,
}

#[async_trait::async_trait]
impl Replicas<ReplicaWrite> for SimReplicas {
    async fn perform_on(&self, replica: &ShardRouting, request: &ReplicaWrite) -> Result<()> {
        let node_id = replica
            .current_node_id()
            .ok_or_else(|| Error::NoShardAvailable(replica.shard_id().clone()))?;

        if let Some(fault) = self.cluster.sample_fault(node_id) {
            tracing::debug!("{} injecting {} on {}", replica.shard_id(), fault, node_id);
            return Err(match fault {
                FaultKind::Timeout => Error::ReceiveTimeout {
                    node: node_id.to_string(),
                    action: WRITE_ACTION.into(),
                    timeout: self.cluster.config.timeout(),
                },
                FaultKind::Disconnect => Error::NodeDisconnected(node_id.to_string()),
                FaultKind::VersionConflict => Error::VersionConflict {
                    shard_id: request.shard_id.clone(),
                    id: request.id.clone(),
                    current: request.version + 1,
                    provided: request.version,
                }
                .remote(node_id, WRITE_ACTION),
                FaultKind::ShardClosed => Error::IllegalShardState {
                    shard_id: request.shard_id.clone(),
                    state: replica.state(),
                    reason: "shard closed".into(),
                }
                .remote(node_id, WRITE_ACTION),
                FaultKind::DemoteOnFail => {
                    Error::Engine(DEMOTING_FAILURE.into()).remote(node_id, WRITE_ACTION)
                }
            });
        }

        let node = self.cluster.node(node_id)?;
        let current_term = self.cluster.primary_term(&request.shard_id);
        if request.primary_term < current_term {
            return Err(Error::StalePrimaryTerm {
                shard_id: request.shard_id.clone(),
                provided: request.primary_term,
                current: current_term,
            }
            .remote(node_id, WRITE_ACTION));
        }

        let mut shards = node.shards.write().await;
        let store = shards.entry(request.shard_id.clone()).or_default();
        if let Some(existing) = store.get(&request.id) {
            if existing.version >= request.version {
                return Err(Error::VersionConflict {
                    shard_id: request.shard_id.clone(),
                    id: request.id.clone(),
                    current: existing.version,
                    provided: request.version,
                }
                .remote(node_id, WRITE_ACTION));
            }
        }
        store.insert(
            request.id.clone(),
            Document {
                version: request.version,
                body: request.body.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn fail_shard(
        &self,
        replica: &ShardRouting,
        primary: &ShardRouting,
        message: &str,
        cause: &Error,
    ) -> FailShardOutcome {
        let shard_id = replica.shard_id();
        let state = self.cluster.state.state();
        let is_current_primary = state
            .routing_table()
            .shard_routing_table(shard_id)
            .and_then(|table| table.primary_shard())
            .map(|p| p.allocation_id() == primary.allocation_id())
            .unwrap_or(false);

        let demoted = !is_current_primary || SimCluster::demotes_on_fail(cause);
        if demoted {
            return FailShardOutcome::PrimaryDemoted(Error::NoLongerPrimary {
                shard_id: shard_id.clone(),
                term: self.cluster.primary_term(shard_id),
                reason: format!("primary {} is not the current primary", primary),
            });
        }

        let mut removed = false;
        let updated = self.cluster.state.update(|state| {
            let copies: Vec<ShardRouting> = state
                .routing_table()
                .shards_of(shard_id)
                .into_iter()
                .map(|copy| {
                    if copy.allocation_id().is_some() && copy.allocation_id() == replica.allocation_id() {
                        removed = true;
                        copy.moved_to_unassigned()
                    } else {
                        copy
                    }
                })
                .collect();
            if !removed {
                return state.clone();
            }
            let table = RoutingTableBuilder::from(state.routing_table())
                .shard(shard_id.clone(), copies)
                .build();
            state.with_routing_table(table)
        });

        if removed {
            tracing::info!(
                "{} failed replica {} ({}: {}), cluster state version [{}]",
                shard_id,
                replica,
                message,
                cause,
                updated.version()
            );
        }
        FailShardOutcome::Failed
    }
}

/// Index `writes` documents concurrently and collect every outcome.
///
/// Even-numbered writes reuse a small set of ids so that some documents see
/// several versions racing to their replicas.
pub async fn run_writes(
    cluster: &Arc<SimCluster>,
    settings: ReplicationSettings,
    writes: usize,
) -> Vec<Result<WriteResponse>> {
    let coordinator = Arc::new(cluster.coordinator(settings));
    tracing::debug!(
        "Starting {} [{}] writes, write consistency [{}]",
        writes,
        coordinator.op_type(),
        coordinator.settings().default_consistency()
    );

    let tasks = (0..writes).map(|seq| {
        let cluster = cluster.clone();
        let coordinator = coordinator.clone();
        async move {
            let id = if seq % 2 == 0 {
                format!("doc-{}", seq % 4)
            } else {
                Uuid::new_v4().to_string()
            };
            let request = cluster.write_request(
                id,
                serde_json::json!({ "seq": seq, "at": Utc::now().to_rfc3339() }),
            );
            match cluster.primary(&request.shard_id) {
                Ok(primary) => coordinator.execute(request, Arc::new(primary)).await,
                Err(e) => Err(e),
            }
        }
    });

    futures::future::join_all(tasks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FaultConfig;

    fn config(faults: Vec<FaultConfig>) -> SimulationConfig {
        SimulationConfig {
            index: "docs".into(),
            shards: 1,
            nodes: 3,
            replicas: 2,
            timeout_ms: 1_000,
            faults,
        }
    }

    fn fault(node: &str, kind: FaultKind) -> FaultConfig {
        FaultConfig {
            node: node.into(),
            kind,
            probability: 1.0,
        }
    }

    #[tokio::test]
    async fn test_write_reaches_every_copy() {
        let cluster = SimCluster::new(config(vec![])).unwrap();
        let coordinator = cluster.coordinator(ReplicationSettings::default());
        assert_eq!(coordinator.op_type(), "index");
        assert_eq!(coordinator.settings().default_consistency(), WriteConsistencyLevel::Quorum);

        let request = cluster.write_request("1", serde_json::json!({"title": "wolf"}));
        let shard_id = request.shard_id.clone();
        let primary = Arc::new(cluster.primary(&shard_id).unwrap());
        let response = coordinator.execute(request, primary).await.unwrap();

        assert!(response.created);
        assert_eq!(response.version, 1);
        let info = response.shard_info().unwrap();
        assert_eq!((info.total, info.successful, info.failed()), (3, 3, 0));

        for node in ["node-1", "node-2", "node-3"] {
            let doc = cluster.document(node, &shard_id, "1").await.unwrap();
            assert_eq!(doc.version, 1);
            assert_eq!(doc.body["title"], "wolf");
        }

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["_shards"]["successful"], 3);
    }

    #[tokio::test]
    async fn test_failed_replica_is_unassigned() {
        let cluster = SimCluster::new(config(vec![fault("node-3", FaultKind::Timeout)])).unwrap();
        let coordinator = cluster.coordinator(ReplicationSettings::default());

        let request = cluster.write_request("1", serde_json::json!({}));
        let shard_id = request.shard_id.clone();
        let primary = Arc::new(cluster.primary(&shard_id).unwrap());
        let response = coordinator.execute(request, primary).await.unwrap();

        let info = response.shard_info().unwrap();
        assert_eq!((info.total, info.successful, info.failed()), (3, 2, 1));
        assert_eq!(info.failures[0].node_id.as_deref(), Some("node-3"));

        let state = cluster.state_holder().state();
        assert_eq!(state.version(), 2);
        assert_eq!(state.routing_table().active_copies_of(&shard_id), 2);

        // The unassigned copy still counts towards total on the next write
        let request = cluster.write_request("2", serde_json::json!({}));
        let primary = Arc::new(cluster.primary(&shard_id).unwrap());
        let response = coordinator.execute(request, primary).await.unwrap();
        let info = response.shard_info().unwrap();
        assert_eq!((info.total, info.successful, info.failed()), (3, 2, 0));
    }

    #[tokio::test]
    async fn test_version_conflicts_are_invisible() {
        let cluster =
            SimCluster::new(config(vec![fault("node-2", FaultKind::VersionConflict)])).unwrap();
        let coordinator = cluster.coordinator(ReplicationSettings::default());

        let request = cluster.write_request("1", serde_json::json!({}));
        let shard_id = request.shard_id.clone();
        let primary = Arc::new(cluster.primary(&shard_id).unwrap());
        let response = coordinator.execute(request, primary).await.unwrap();

        let info = response.shard_info().unwrap();
        assert_eq!((info.total, info.successful, info.failed()), (3, 2, 0));
        assert_eq!(cluster.state_holder().state().version(), 1);
    }

    #[tokio::test]
    async fn test_replica_rejects_older_version() {
        let cluster = SimCluster::new(config(vec![])).unwrap();
        let replicas = cluster.replicas();
        let shard_id = ShardId::new("docs", 0);
        let replica = ShardRouting::started(shard_id.clone(), "node-2", false);
        let write = |version| ReplicaWrite {
            shard_id: shard_id.clone(),
            id: "1".into(),
            version,
            body: serde_json::json!({ "v": version }),
            primary_term: 1,
        };

        replicas.perform_on(&replica, &write(2)).await.unwrap();
        let err = replicas.perform_on(&replica, &write(1)).await.unwrap_err();
        assert!(err.is_conflict());
        let doc = cluster.document("node-2", &shard_id, "1").await.unwrap();
        assert_eq!(doc.version, 2);
    }

    #[tokio::test]
    async fn test_demote_on_fail_fault() {
        let cluster =
            SimCluster::new(config(vec![fault("node-2", FaultKind::DemoteOnFail)])).unwrap();
        let coordinator = cluster.coordinator(ReplicationSettings::default());

        let request = cluster.write_request("1", serde_json::json!({}));
        let primary = Arc::new(cluster.primary(&request.shard_id).unwrap());
        let err = coordinator.execute(request, primary.clone()).await.unwrap_err();

        assert!(matches!(err, Error::RetryOnPrimary { .. }));
        assert!(err.is_retryable());
        assert!(primary.is_failed());
    }

    #[tokio::test]
    async fn test_unfired_demote_fault_does_not_demote() {
        let cluster = SimCluster::new(config(vec![
            fault("node-2", FaultKind::Timeout),
            FaultConfig {
                probability: 0.0,
                ..fault("node-2", FaultKind::DemoteOnFail)
            },
        ]))
        .unwrap();
        let coordinator = cluster.coordinator(ReplicationSettings::default());

        let request = cluster.write_request("1", serde_json::json!({}));
        let primary = Arc::new(cluster.primary(&request.shard_id).unwrap());
        let response = coordinator.execute(request, primary.clone()).await.unwrap();

        let info = response.shard_info().unwrap();
        assert_eq!((info.total, info.successful, info.failed()), (3, 2, 1));
        assert_eq!(info.failures[0].node_id.as_deref(), Some("node-2"));
        assert!(!primary.is_failed());
    }

    #[tokio::test]
    async fn test_failed_relocation_target_leaves_routing_unchanged() {
        let cluster = SimCluster::new(SimulationConfig {
            replicas: 1,
            ..config(vec![fault("node-3", FaultKind::Timeout)])
        })
        .unwrap();
        let shard_id = ShardId::new("docs", 0);
        let table = RoutingTable::builder()
            .shard(
                shard_id.clone(),
                vec![
                    ShardRouting::started(shard_id.clone(), "node-1", true),
                    ShardRouting::relocating(shard_id.clone(), "node-2", "node-3", false),
                ],
            )
            .build();
        let holder = cluster.state_holder();
        holder.set(ClusterState::new(2, table));
        let coordinator = cluster.coordinator(ReplicationSettings::default());

        let request = cluster.write_request("1", serde_json::json!({}));
        let primary = Arc::new(cluster.primary(&shard_id).unwrap());
        let response = coordinator.execute(request, primary.clone()).await.unwrap();

        let info = response.shard_info().unwrap();
        assert_eq!((info.total, info.successful, info.failed()), (3, 2, 1));
        assert_eq!(info.failures[0].node_id.as_deref(), Some("node-3"));
        assert!(!primary.is_failed());

        let state = holder.state();
        assert_eq!(state.version(), 2);
        assert_eq!(state.routing_table().active_copies_of(&shard_id), 2);
        assert!(cluster.document("node-2", &shard_id, "1").await.is_some());
    }

    #[tokio::test]
    async fn test_stale_primary_is_demoted() {
        let cluster = SimCluster::new(config(vec![])).unwrap();
        let coordinator = cluster.coordinator(ReplicationSettings {
            write_consistency: WriteConsistencyLevel::One,
            ..Default::default()
        });

        let request = cluster.write_request("1", serde_json::json!({}));
        let shard_id = request.shard_id.clone();
        let old_primary = Arc::new(cluster.primary(&shard_id).unwrap());
        assert_eq!(cluster.promote_replica(&shard_id).unwrap(), 2);

        // Replicas reject the old term, and the master refuses the old primary
        let err = coordinator.execute(request, old_primary.clone()).await.unwrap_err();
        assert!(matches!(err, Error::RetryOnPrimary { .. }));
        assert!(old_primary.is_failed());

        let new_primary = Arc::new(cluster.primary(&shard_id).unwrap());
        assert_eq!(new_primary.term(), 2);
        assert!(new_primary.routing_entry().is_on_node("node-2"));
        let request = cluster.write_request("1", serde_json::json!({}));
        let response = coordinator.execute(request, new_primary).await.unwrap();
        let info = response.shard_info().unwrap();
        assert_eq!((info.total, info.successful), (3, 2));
    }

    #[tokio::test]
    async fn test_closed_node_is_ignored() {
        let cluster = SimCluster::new(config(vec![])).unwrap();
        cluster.close_node("node-3");
        let coordinator = cluster.coordinator(ReplicationSettings::default());

        let request = cluster.write_request("1", serde_json::json!({}));
        let primary = Arc::new(cluster.primary(&request.shard_id).unwrap());
        let response = coordinator.execute(request, primary).await.unwrap();
        let info = response.shard_info().unwrap();
        assert_eq!((info.total, info.successful, info.failed()), (3, 2, 0));
    }

    #[tokio::test]
    async fn test_run_writes() {
        let cluster = SimCluster::new(SimulationConfig {
            shards: 3,
            nodes: 4,
            ..config(vec![])
        })
        .unwrap();

        let results = run_writes(&cluster, ReplicationSettings::default(), 20).await;
        assert_eq!(results.len(), 20);
        for result in results {
            let response = result.unwrap();
            let info = response.shard_info().unwrap();
            assert_eq!(info.total, 3);
            assert_eq!(info.failed(), 0);
            assert!(info.successful <= info.total);
        }
    }
}
