//! WolfShard Error Types

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::replication::ReplicaFailureKind;
use crate::routing::{ShardId, ShardRoutingState};

/// Result type alias for WolfShard operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfShard error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    // Pre-flight errors
    #[error("{shard_id} {reason} Timeout: [{timeout:?}], request: [{request}]")]
    UnavailableShards {
        shard_id: ShardId,
        have: usize,
        need: usize,
        reason: String,
        timeout: Duration,
        request: String,
    },

    // Primary demotion
    #[error("{shard_id} {message}")]
    RetryOnPrimary {
        shard_id: ShardId,
        message: String,
        #[source]
        cause: Arc<Error>,
    },

    #[error("{shard_id} primary term [{term}] is no longer the primary: {reason}")]
    NoLongerPrimary {
        shard_id: ShardId,
        term: u64,
        reason: String,
    },

    // Shard availability errors
    #[error("{0} no such shard")]
    ShardNotFound(ShardId),

    #[error("no such index [{0}]")]
    IndexNotFound(String),

    #[error("{shard_id} operation only allowed when shard is started, current state [{state}]: {reason}")]
    IllegalShardState {
        shard_id: ShardId,
        state: ShardRoutingState,
        reason: String,
    },

    #[error("{0} no shard available")]
    NoShardAvailable(ShardId),

    #[error("node [{0}] is closed")]
    NodeClosed(String),

    // Write races on replicas
    #[error("{shard_id} [{id}]: version conflict, current version [{current}] is higher or equal to the one provided [{provided}]")]
    VersionConflict {
        shard_id: ShardId,
        id: String,
        current: u64,
        provided: u64,
    },

    #[error("{shard_id} [{id}]: document missing")]
    DocumentMissing { shard_id: ShardId, id: String },

    #[error("{shard_id} operation primary term [{provided}] is too old (current [{current}])")]
    StalePrimaryTerm {
        shard_id: ShardId,
        provided: u64,
        current: u64,
    },

    // Transport errors
    #[error("[{node}][{action}] remote failure")]
    RemoteTransport {
        node: String,
        action: String,
        #[source]
        cause: Box<Error>,
    },

    #[error("[{node}][{action}] request timed out after {timeout:?}")]
    ReceiveTimeout {
        node: String,
        action: String,
        timeout: Duration,
    },

    #[error("[{0}] disconnected")]
    NodeDisconnected(String),

    // Engine errors
    #[error("Engine error: {0}")]
    Engine(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Peel transport wrappers to reach the error raised by the remote shard
    pub fn unwrap_cause(&self) -> &Error {
        let mut current = self;
        while let Error::RemoteTransport { cause, .. } = current {
            current = cause;
        }
        current
    }

    /// The target copy is gone for structural reasons (node left, shard
    /// moved or closed, index deleted)
    pub fn is_shard_not_available(&self) -> bool {
        matches!(
            ReplicaFailureKind::classify(self),
            ReplicaFailureKind::ShardNotAvailable(_)
        )
    }

    /// A newer write already landed on the copy
    pub fn is_conflict(&self) -> bool {
        matches!(
            ReplicaFailureKind::classify(self),
            ReplicaFailureKind::SupersededWrite(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.unwrap_cause(),
            Error::UnavailableShards { .. }
                | Error::RetryOnPrimary { .. }
                | Error::ReceiveTimeout { .. }
                | Error::NodeDisconnected(_)
        )
    }

    /// Wrap this error as if it was returned from `action` on `node`
    pub fn remote(self, node: impl Into<String>, action: impl Into<String>) -> Error {
        Error::RemoteTransport {
            node: node.into(),
            action: action.into(),
            cause: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_cause() {
        let shard_id = ShardId::new("orders", 0);
        let err = Error::VersionConflict {
            shard_id,
            id: "1".into(),
            current: 3,
            provided: 2,
        }
        .remote("node-2", "indices:data/write[r]")
        .remote("node-3", "indices:data/write[r]");

        assert!(matches!(err.unwrap_cause(), Error::VersionConflict { .. }));
        assert!(err.is_conflict());
        assert!(!err.is_shard_not_available());
    }

    #[test]
    fn test_shard_not_available() {
        let shard_id = ShardId::new("orders", 0);
        assert!(Error::ShardNotFound(shard_id.clone()).is_shard_not_available());
        assert!(Error::IndexNotFound("orders".into()).is_shard_not_available());
        assert!(Error::NodeClosed("node-2".into()).is_shard_not_available());
        assert!(Error::IllegalShardState {
            shard_id,
            state: ShardRoutingState::Relocating,
            reason: "relocated".into(),
        }
        .remote("node-2", "write")
        .is_shard_not_available());
        assert!(!Error::NodeDisconnected("node-2".into()).is_shard_not_available());
    }

    #[test]
    fn test_helpers_agree_with_classification() {
        let shard_id = ShardId::new("orders", 0);
        let errors = vec![
            Error::NoShardAvailable(shard_id.clone()),
            Error::DocumentMissing {
                shard_id: shard_id.clone(),
                id: "1".into(),
            }
            .remote("node-2", "write"),
            Error::StalePrimaryTerm {
                shard_id,
                provided: 1,
                current: 2,
            },
            Error::NodeDisconnected("node-2".into()),
        ];
        for err in &errors {
            assert_eq!(
                err.is_shard_not_available() || err.is_conflict(),
                ReplicaFailureKind::classify(err).is_ignorable(),
                "{}",
                err
            );
        }
    }

    #[test]
    fn test_retryable() {
        assert!(Error::NodeDisconnected("node-2".into()).is_retryable());
        assert!(Error::ReceiveTimeout {
            node: "node-2".into(),
            action: "write".into(),
            timeout: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(!Error::Engine("disk full".into()).is_retryable());
    }
}
