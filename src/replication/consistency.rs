//! Write Consistency
//!
//! Decides whether enough copies of a shard are active to attempt a write.

use serde::{Deserialize, Serialize};

use crate::routing::IndexShardRoutingTable;

/// Minimum number of active copies required before a write is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteConsistencyLevel {
    /// Use the configured default
    Default,
    /// At least one active copy
    One,
    /// A majority of copies, when the shard has more than two
    Quorum,
    /// Every configured copy
    All,
}

impl std::fmt::Display for WriteConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteConsistencyLevel::Default => write!(f, "DEFAULT"),
            WriteConsistencyLevel::One => write!(f, "ONE"),
            WriteConsistencyLevel::Quorum => write!(f, "QUORUM"),
            WriteConsistencyLevel::All => write!(f, "ALL"),
        }
    }
}

impl std::str::FromStr for WriteConsistencyLevel {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(WriteConsistencyLevel::Default),
            "one" => Ok(WriteConsistencyLevel::One),
            "quorum" => Ok(WriteConsistencyLevel::Quorum),
            "all" => Ok(WriteConsistencyLevel::All),
            other => Err(crate::Error::Config(format!(
                "no write consistency match [{}]",
                other
            ))),
        }
    }
}

/// Active copies fell short of the requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyShortfall {
    pub have: usize,
    pub need: usize,
}

impl WriteConsistencyLevel {
    /// `Default` resolves to `fallback`, everything else to itself
    pub fn resolve(self, fallback: WriteConsistencyLevel) -> WriteConsistencyLevel {
        match self {
            WriteConsistencyLevel::Default => fallback,
            level => level,
        }
    }

    /// Copies required out of `size` configured copies
    pub fn required_copies(self, size: usize) -> usize {
        match self {
            // 1 primary + 1 replica must not need both to be up
            WriteConsistencyLevel::Quorum if size > 2 => size / 2 + 1,
            WriteConsistencyLevel::All => size,
            _ => 1,
        }
    }

    /// Returns the shortfall if `active` of `size` copies is not enough
    pub fn check(self, active: usize, size: usize) -> Option<ConsistencyShortfall> {
        let need = self.required_copies(size);
        if active < need {
            Some(ConsistencyShortfall { have: active, need })
        } else {
            None
        }
    }
}

/// Check a shard's routing table against `level`.
///
/// A missing table (index deleted or closed) always blocks with have 0, need 1.
pub fn check_write_consistency(
    level: WriteConsistencyLevel,
    shard_table: Option<&IndexShardRoutingTable>,
) -> Option<ConsistencyShortfall> {
    match shard_table {
        Some(table) => level.check(table.active_shards().len(), table.size()),
        None => Some(ConsistencyShortfall { have: 0, need: 1 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{ShardId, ShardRouting};

    fn table(active: usize, unassigned: usize) -> IndexShardRoutingTable {
        let shard_id = ShardId::new("orders", 0);
        let mut shards = Vec::new();
        for i in 0..active {
            shards.push(ShardRouting::started(shard_id.clone(), format!("node-{}", i), i == 0));
        }
        for _ in 0..unassigned {
            shards.push(ShardRouting::unassigned(shard_id.clone(), false));
        }
        IndexShardRoutingTable::new(shard_id, shards)
    }

    #[test]
    fn test_quorum_small_groups_need_one() {
        assert_eq!(WriteConsistencyLevel::Quorum.required_copies(1), 1);
        assert_eq!(WriteConsistencyLevel::Quorum.required_copies(2), 1);
        assert!(WriteConsistencyLevel::Quorum.check(1, 2).is_none());
        assert_eq!(
            WriteConsistencyLevel::Quorum.check(0, 2),
            Some(ConsistencyShortfall { have: 0, need: 1 })
        );
    }

    #[test]
    fn test_quorum_majority() {
        assert_eq!(WriteConsistencyLevel::Quorum.required_copies(3), 2);
        assert_eq!(WriteConsistencyLevel::Quorum.required_copies(4), 3);
        assert_eq!(WriteConsistencyLevel::Quorum.required_copies(5), 3);
        assert_eq!(
            WriteConsistencyLevel::Quorum.check(1, 3),
            Some(ConsistencyShortfall { have: 1, need: 2 })
        );
        assert!(WriteConsistencyLevel::Quorum.check(2, 3).is_none());
    }

    #[test]
    fn test_all_and_one() {
        assert_eq!(
            WriteConsistencyLevel::All.check(2, 3),
            Some(ConsistencyShortfall { have: 2, need: 3 })
        );
        assert!(WriteConsistencyLevel::All.check(3, 3).is_none());
        assert!(WriteConsistencyLevel::One.check(1, 5).is_none());
        assert!(WriteConsistencyLevel::One.check(0, 5).is_some());
    }

    #[test]
    fn test_routing_table_check() {
        assert_eq!(
            check_write_consistency(WriteConsistencyLevel::All, Some(&table(1, 2))),
            Some(ConsistencyShortfall { have: 1, need: 3 })
        );
        assert!(check_write_consistency(WriteConsistencyLevel::Quorum, Some(&table(2, 1))).is_none());
    }

    #[test]
    fn test_missing_table_always_blocks() {
        for level in [
            WriteConsistencyLevel::One,
            WriteConsistencyLevel::Quorum,
            WriteConsistencyLevel::All,
        ] {
            assert_eq!(
                check_write_consistency(level, None),
                Some(ConsistencyShortfall { have: 0, need: 1 })
            );
        }
    }

    #[test]
    fn test_parse_and_resolve() {
        assert_eq!("QUORUM".parse::<WriteConsistencyLevel>().unwrap(), WriteConsistencyLevel::Quorum);
        assert_eq!(" all ".parse::<WriteConsistencyLevel>().unwrap(), WriteConsistencyLevel::All);
        assert!("most".parse::<WriteConsistencyLevel>().is_err());
        assert_eq!(
            WriteConsistencyLevel::Default.resolve(WriteConsistencyLevel::One),
            WriteConsistencyLevel::One
        );
        assert_eq!(
            WriteConsistencyLevel::All.resolve(WriteConsistencyLevel::One),
            WriteConsistencyLevel::All
        );
    }
}
