//! Shard Copies
//!
//! Identity and placement of a single physical copy of a shard.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a shard: one slice of an index that is replicated independently
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId {
    /// Index the shard belongs to
    pub index: String,
    /// Shard number within the index
    pub id: u32,
}

impl ShardId {
    /// Create a new shard id
    pub fn new(index: impl Into<String>, id: u32) -> Self {
        Self {
            index: index.into(),
            id,
        }
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}][{}]", self.index, self.id)
    }
}

/// Routing state of a shard copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardRoutingState {
    /// Not allocated to any node
    Unassigned,
    /// Allocated and recovering
    Initializing,
    /// Allocated and serving
    Started,
    /// Serving, and being moved to another node
    Relocating,
}

impl std::fmt::Display for ShardRoutingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardRoutingState::Unassigned => write!(f, "UNASSIGNED"),
            ShardRoutingState::Initializing => write!(f, "INITIALIZING"),
            ShardRoutingState::Started => write!(f, "STARTED"),
            ShardRoutingState::Relocating => write!(f, "RELOCATING"),
        }
    }
}

/// One copy of a shard as seen in a routing snapshot.
///
/// Values are snapshots; nothing in the replication path mutates them after
/// they are read from a [`ClusterState`](super::ClusterState).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRouting {
    shard_id: ShardId,
    primary: bool,
    state: ShardRoutingState,
    current_node_id: Option<String>,
    relocating_node_id: Option<String>,
    allocation_id: Option<Uuid>,
}

impl ShardRouting {
    /// A copy that is not allocated anywhere
    pub fn unassigned(shard_id: ShardId, primary: bool) -> Self {
        Self {
            shard_id,
            primary,
            state: ShardRoutingState::Unassigned,
            current_node_id: None,
            relocating_node_id: None,
            allocation_id: None,
        }
    }

    /// A copy allocated to `node_id` and still recovering
    pub fn initializing(shard_id: ShardId, node_id: impl Into<String>, primary: bool) -> Self {
        Self {
            shard_id,
            primary,
            state: ShardRoutingState::Initializing,
            current_node_id: Some(node_id.into()),
            relocating_node_id: None,
            allocation_id: Some(Uuid::new_v4()),
        }
    }

    /// A started copy on `node_id`
    pub fn started(shard_id: ShardId, node_id: impl Into<String>, primary: bool) -> Self {
        Self {
            state: ShardRoutingState::Started,
            ..Self::initializing(shard_id, node_id, primary)
        }
    }

    /// A started copy on `node_id` that is moving to `target_node_id`
    pub fn relocating(
        shard_id: ShardId,
        node_id: impl Into<String>,
        target_node_id: impl Into<String>,
        primary: bool,
    ) -> Self {
        Self {
            state: ShardRoutingState::Relocating,
            relocating_node_id: Some(target_node_id.into()),
            ..Self::initializing(shard_id, node_id, primary)
        }
    }

    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    pub fn primary(&self) -> bool {
        self.primary
    }

    pub fn state(&self) -> ShardRoutingState {
        self.state
    }

    pub fn current_node_id(&self) -> Option<&str> {
        self.current_node_id.as_deref()
    }

    pub fn relocating_node_id(&self) -> Option<&str> {
        self.relocating_node_id.as_deref()
    }

    pub fn allocation_id(&self) -> Option<Uuid> {
        self.allocation_id
    }

    /// Not allocated to any node
    pub fn is_unassigned(&self) -> bool {
        self.state == ShardRoutingState::Unassigned
    }

    /// Started or relocating: the copy holds all acknowledged writes
    pub fn active(&self) -> bool {
        matches!(
            self.state,
            ShardRoutingState::Started | ShardRoutingState::Relocating
        )
    }

    pub fn is_relocating(&self) -> bool {
        self.state == ShardRoutingState::Relocating
    }

    pub fn initializing_state(&self) -> bool {
        self.state == ShardRoutingState::Initializing
    }

    /// Copy hosted on `node_id`, ignoring relocation targets
    pub fn is_on_node(&self, node_id: &str) -> bool {
        self.current_node_id.as_deref() == Some(node_id)
    }

    /// The recovering copy on the relocation target node.
    ///
    /// Returns `None` when this copy is not relocating.
    pub fn build_target_relocating_shard(&self) -> Option<ShardRouting> {
        if !self.is_relocating() {
            return None;
        }
        Some(ShardRouting {
            shard_id: self.shard_id.clone(),
            primary: self.primary,
            state: ShardRoutingState::Initializing,
            current_node_id: self.relocating_node_id.clone(),
            relocating_node_id: self.current_node_id.clone(),
            allocation_id: Some(Uuid::new_v4()),
        })
    }

    /// Same copy, moved back to the unassigned pool
    pub fn moved_to_unassigned(&self) -> ShardRouting {
        ShardRouting::unassigned(self.shard_id.clone(), self.primary)
    }

    /// Same copy, promoted to primary
    pub fn promoted_to_primary(&self) -> ShardRouting {
        ShardRouting {
            primary: true,
            ..self.clone()
        }
    }
}

impl std::fmt::Display for ShardRouting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, node[{}], {}, s[{}]",
            self.shard_id,
            self.current_node_id.as_deref().unwrap_or("null"),
            if self.primary { "[P]" } else { "[R]" },
            self.state
        )?;
        if let Some(target) = &self.relocating_node_id {
            write!(f, ", relocating [{}]", target)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relocation_target() {
        let shard = ShardRouting::relocating(ShardId::new("orders", 0), "node-1", "node-4", false);
        assert!(shard.active());

        let target = shard.build_target_relocating_shard().unwrap();
        assert_eq!(target.current_node_id(), Some("node-4"));
        assert_eq!(target.relocating_node_id(), Some("node-1"));
        assert!(target.initializing_state());
        assert!(!target.active());
        assert_ne!(target.allocation_id(), shard.allocation_id());
    }

    #[test]
    fn test_non_relocating_has_no_target() {
        let shard = ShardRouting::started(ShardId::new("orders", 0), "node-1", true);
        assert!(shard.build_target_relocating_shard().is_none());
    }

    #[test]
    fn test_display() {
        let shard = ShardRouting::unassigned(ShardId::new("orders", 2), false);
        assert!(shard.is_unassigned());
        assert_eq!(shard.to_string(), "[orders][2], node[null], [R], s[UNASSIGNED]");
    }
}
