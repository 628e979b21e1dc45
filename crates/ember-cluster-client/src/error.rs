//! Error types for the cluster client.

use ember_protocol::ProtocolError;

/// Failure reported by a single node connection or its pool.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server disconnected")]
    Disconnected,

    #[error("authentication failed: {0}")]
    Auth(String),

    /// The node answered with an error reply.
    #[error("{0}")]
    Server(String),

    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    #[error("connection pool is closed")]
    PoolClosed,

    /// The reply had a shape the caller did not expect. This points at a
    /// bug on our side rather than at the cluster, so it is never retried.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl NodeError {
    /// Returns true for failures that may clear up after the topology is
    /// re-discovered (unreachable node, dropped link, error reply).
    pub fn is_operational(&self) -> bool {
        !matches!(self, NodeError::UnexpectedReply(_))
    }
}

/// A malformed line in the node table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyParseError {
    #[error("empty node line")]
    EmptyLine,

    #[error("node line has {0} fields, expected at least 8")]
    MissingFields(usize),

    #[error("invalid node address '{0}'")]
    InvalidAddress(String),

    #[error("invalid {field} value '{value}'")]
    InvalidNumber { field: &'static str, value: String },
}

/// Why a seed could not provide the topology.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Parse(#[from] TopologyParseError),
}

/// Errors surfaced by [`ClusterClient`](crate::ClusterClient) operations.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("topology parse error: {0}")]
    Parse(#[from] TopologyParseError),

    /// No seed answered the node table query. Carries the identity of the
    /// last seed tried.
    #[error("cluster discovery failed, last seed {endpoint}: {reason}")]
    DiscoveryExhausted {
        endpoint: String,
        #[source]
        reason: SeedError,
    },

    #[error("slot {slot} is not served by any master{}", key_suffix(.key))]
    SlotNotCovered { slot: u16, key: Option<String> },

    #[error("cross-slot keys not allowed (keys span slots {first} and {other})")]
    CrossSlot { first: u16, other: u16 },

    #[error("no routing keys given")]
    NoKeys,

    #[error("slot {0} is out of range")]
    InvalidSlot(u32),

    /// A node failed while running an operation.
    #[error("node {endpoint}: {source}")]
    Node {
        endpoint: String,
        #[source]
        source: NodeError,
    },

    #[error("node {0} is not part of the cluster")]
    NodeNotFound(String),

    #[error("node {0} is not a master")]
    NotMaster(String),

    /// The master exists but is excluded from routing (flagged, link down
    /// or without an address).
    #[error("node {0} is not available for routing")]
    NodeUnavailable(String),

    #[error("cluster has no routable masters")]
    NoMasters,

    #[error("invalid cluster configuration: {0}")]
    Configuration(String),

    #[error("cluster client is shut down")]
    Closed,
}

impl ClusterError {
    /// Wraps a node failure with the identity of the node it came from.
    pub fn node(endpoint: impl Into<String>, source: NodeError) -> Self {
        ClusterError::Node {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Returns true if this error may go away after the topology is
    /// refreshed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClusterError::SlotNotCovered { .. } | ClusterError::NoMasters => true,
            ClusterError::Node { source, .. } => source.is_operational(),
            _ => false,
        }
    }
}

fn key_suffix(key: &Option<String>) -> String {
    match key {
        Some(k) => format!(" (key '{k}')"),
        None => String::new(),
    }
}
