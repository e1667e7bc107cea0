//! Routing Module
//!
//! Read-only snapshots of which nodes host which shard copies.

mod shard;
mod table;

pub use shard::{ShardId, ShardRouting, ShardRoutingState};
pub use table::{
    ClusterState, ClusterStateHolder, ClusterStateSupplier, IndexRoutingTable,
    IndexShardRoutingTable, RoutingTable, RoutingTableBuilder,
};
