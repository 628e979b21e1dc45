//! ember-cluster-client: slot-routing client for sharded ember and Redis
//! Cluster deployments.
//!
//! The cluster splits its keyspace into 16384 hash slots, each served by
//! one master. This crate keeps a local copy of the slot map and sends
//! every operation straight to the master that owns its key.
//!
//! # Architecture
//!
//! - **Topology**: `CLUSTER NODES` lines parsed into node descriptors
//! - **Router**: an immutable slot table swapped in atomically on change
//! - **Discovery**: rate-limited, serialized refresh from a seed list
//! - **Dispatch**: bounded retry through discovery on node failures
//!
//! There is no MOVED/ASK handling. Any failure a topology change could
//! explain triggers a refresh, and the operation is retried against the
//! new router.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use bytes::Bytes;
//! use ember_cluster_client::{ClusterClient, ClusterConfig};
//!
//! let client = ClusterClient::connect(ClusterConfig::with_seeds(["127.0.0.1:7000"])).await?;
//! let reply = client
//!     .query(&["user:42"], &[Bytes::from_static(b"GET"), Bytes::from_static(b"user:42")])
//!     .await?;
//! ```

mod client;
mod config;
mod connection;
mod discovery;
mod dispatch;
mod endpoint;
mod error;
mod node;
mod pool;
mod router;
mod slots;
mod topology;


pub use client::ClusterClient;
pub use config::{ClusterConfig, PoolConfig};
pub use connection::{Connection, TcpConnector};
pub use discovery::fetch_topology;
pub use dispatch::resolve_slot;
pub use endpoint::Endpoint;
pub use error::{ClusterError, NodeError, SeedError, TopologyParseError};
pub use node::{cluster_nodes, Connector, NodeConnection};
pub use pool::{NodePool, PooledConnection};
pub use router::{Coverage, Master, SlotRouter};
pub use slots::{key_slot, SlotRange, SlotTable, SLOT_COUNT};
pub use topology::{
    parse_node_line, parse_topology, stamp_password, topology_changed, LinkState, NodeDescriptor,
    NodeRole,
};
