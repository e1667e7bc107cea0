//! Routing Tables
//!
//! Immutable snapshots of where every shard copy lives, and the
//! supplier abstraction used to fetch the latest one.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use serde::{Deserialize, Serialize};

use super::shard::{ShardId, ShardRouting};

/// All copies of a single shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexShardRoutingTable {
    shard_id: ShardId,
    shards: Vec<ShardRouting>,
}

impl IndexShardRoutingTable {
    pub fn new(shard_id: ShardId, shards: Vec<ShardRouting>) -> Self {
        Self { shard_id, shards }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Every copy, in routing order
    pub fn shards(&self) -> &[ShardRouting] {
        &self.shards
    }

    /// Number of configured copies (primary + replicas)
    pub fn size(&self) -> usize {
        self.shards.len()
    }

    /// Copies that are started or relocating
    pub fn active_shards(&self) -> Vec<&ShardRouting> {
        self.shards.iter().filter(|s| s.active()).collect()
    }

    pub fn primary_shard(&self) -> Option<&ShardRouting> {
        self.shards.iter().find(|s| s.primary())
    }

    pub fn replica_shards(&self) -> Vec<&ShardRouting> {
        self.shards.iter().filter(|s| !s.primary()).collect()
    }
}

/// Shard tables for one index, keyed by shard number
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRoutingTable {
    shards: BTreeMap<u32, IndexShardRoutingTable>,
}

impl IndexRoutingTable {
    pub fn shard(&self, id: u32) -> Option<&IndexShardRoutingTable> {
        self.shards.get(&id)
    }

    pub fn shards(&self) -> impl Iterator<Item = &IndexShardRoutingTable> {
        self.shards.values()
    }
}

/// Routing for the whole cluster, keyed by index name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder::default()
    }

    pub fn index(&self, name: &str) -> Option<&IndexRoutingTable> {
        self.indices.get(name)
    }

    /// Table for one shard, `None` if the index or shard is gone
    pub fn shard_routing_table(&self, shard_id: &ShardId) -> Option<&IndexShardRoutingTable> {
        self.index(&shard_id.index).and_then(|index| index.shard(shard_id.id))
    }

    /// Copies of a shard, empty if the index or shard is gone
    pub fn shards_of(&self, shard_id: &ShardId) -> Vec<ShardRouting> {
        self.shard_routing_table(shard_id)
            .map(|table| table.shards().to_vec())
            .unwrap_or_default()
    }

    /// Number of active copies of a shard
    pub fn active_copies_of(&self, shard_id: &ShardId) -> usize {
        self.shard_routing_table(shard_id)
            .map(|table| table.active_shards().len())
            .unwrap_or(0)
    }

    pub fn indices(&self) -> impl Iterator<Item = (&String, &IndexRoutingTable)> {
        self.indices.iter()
    }
}

/// Incrementally assembles a [`RoutingTable`]
#[derive(Debug, Default)]
pub struct RoutingTableBuilder {
    indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTableBuilder {
    /// Add (or replace) the copies of one shard
    pub fn shard(mut self, shard_id: ShardId, copies: Vec<ShardRouting>) -> Self {
        self.indices
            .entry(shard_id.index.clone())
            .or_default()
            .shards
            .insert(shard_id.id, IndexShardRoutingTable::new(shard_id, copies));
        self
    }

    /// Drop a whole index
    pub fn remove_index(mut self, name: &str) -> Self {
        self.indices.remove(name);
        self
    }

    pub fn build(self) -> RoutingTable {
        RoutingTable {
            indices: self.indices,
        }
    }
}

impl From<&RoutingTable> for RoutingTableBuilder {
    fn from(table: &RoutingTable) -> Self {
        Self {
            indices: table.indices.clone(),
        }
    }
}

/// A versioned, immutable view of the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    version: u64,
    routing_table: RoutingTable,
}

impl ClusterState {
    pub fn new(version: u64, routing_table: RoutingTable) -> Self {
        Self {
            version,
            routing_table,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Next version of this state with a new routing table
    pub fn with_routing_table(&self, routing_table: RoutingTable) -> ClusterState {
        ClusterState {
            version: self.version + 1,
            routing_table,
        }
    }
}

/// Supplies the cluster state as of the time of the call.
///
/// Each call may return a different state. Callers that need a fresh view
/// call again instead of caching.
pub trait ClusterStateSupplier: Send + Sync {
    fn state(&self) -> Arc<ClusterState>;
}

impl<F> ClusterStateSupplier for F
where
    F: Fn() -> Arc<ClusterState> + Send + Sync,
{
    fn state(&self) -> Arc<ClusterState> {
        self()
    }
}

/// Holds the latest applied cluster state
#[derive(Debug, Default)]
pub struct ClusterStateHolder {
    current: RwLock<Arc<ClusterState>>,
}

impl ClusterStateHolder {
    pub fn new(state: ClusterState) -> Self {
        Self {
            current: RwLock::new(Arc::new(state)),
        }
    }

    /// Install a new state, returning the one it replaced
    pub fn set(&self, state: ClusterState) -> Arc<ClusterState> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *current, Arc::new(state))
    }

    /// Apply `f` to the current state and install the result atomically
    pub fn update<F>(&self, f: F) -> Arc<ClusterState>
    where
        F: FnOnce(&ClusterState) -> ClusterState,
    {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(f(&current));
        *current = next.clone();
        next
    }
}

impl ClusterStateSupplier for ClusterStateHolder {
    fn state(&self) -> Arc<ClusterState> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_copies(shard_id: &ShardId) -> Vec<ShardRouting> {
        vec![
            ShardRouting::started(shard_id.clone(), "node-1", true),
            ShardRouting::started(shard_id.clone(), "node-2", false),
            ShardRouting::unassigned(shard_id.clone(), false),
        ]
    }

    #[test]
    fn test_shard_lookup() {
        let shard_id = ShardId::new("orders", 0);
        let table = RoutingTable::builder()
            .shard(shard_id.clone(), three_copies(&shard_id))
            .build();

        let shard_table = table.shard_routing_table(&shard_id).unwrap();
        assert_eq!(shard_table.size(), 3);
        assert_eq!(shard_table.active_shards().len(), 2);
        assert_eq!(table.active_copies_of(&shard_id), 2);
        assert!(shard_table.primary_shard().unwrap().is_on_node("node-1"));
        assert_eq!(shard_table.replica_shards().len(), 2);

        let indices: Vec<&String> = table.indices().map(|(name, _)| name).collect();
        assert_eq!(indices, vec!["orders"]);
        assert_eq!(table.index("orders").unwrap().shards().count(), 1);

        assert!(table.shards_of(&ShardId::new("orders", 1)).is_empty());
        assert!(table.shards_of(&ShardId::new("missing", 0)).is_empty());
        assert_eq!(table.active_copies_of(&ShardId::new("missing", 0)), 0);
    }

    #[test]
    fn test_holder_update_bumps_version() {
        let shard_id = ShardId::new("orders", 0);
        let holder = ClusterStateHolder::new(ClusterState::new(
            1,
            RoutingTable::builder()
                .shard(shard_id.clone(), three_copies(&shard_id))
                .build(),
        ));

        let before = holder.state();
        let after = holder.update(|state| {
            let table = RoutingTableBuilder::from(state.routing_table())
                .remove_index("orders")
                .build();
            state.with_routing_table(table)
        });

        assert_eq!(before.version(), 1);
        assert_eq!(after.version(), 2);
        assert_eq!(holder.state().version(), 2);
        assert!(holder.state().routing_table().index("orders").is_none());
        // Earlier snapshots are unaffected
        assert!(before.routing_table().index("orders").is_some());
    }

    #[test]
    fn test_closure_supplier() {
        let state = Arc::new(ClusterState::default());
        let supplier = move || state.clone();
        assert_eq!(ClusterStateSupplier::state(&supplier).version(), 0);
    }
}
