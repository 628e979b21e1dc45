//! The seam between the routing engine and single-node connections.
//!
//! The engine only needs to open a connection to an endpoint and send
//! commands over it. [`TcpConnector`](crate::TcpConnector) is the real
//! implementation; tests plug in scripted connectors.

use std::future::Future;

use bytes::Bytes;
use ember_protocol::Frame;

use crate::endpoint::Endpoint;
use crate::error::NodeError;

/// Opens authenticated connections to cluster nodes.
pub trait Connector: Send + Sync + 'static {
    type Conn: NodeConnection;

    /// Connects to `endpoint`, authenticating with its password if set.
    fn connect(&self, endpoint: &Endpoint)
        -> impl Future<Output = Result<Self::Conn, NodeError>> + Send;
}

/// A single connection to one node.
pub trait NodeConnection: Send + 'static {
    /// Sends one command and waits for its reply.
    ///
    /// Error replies are returned as `Ok(Frame::Error(..))`; only transport
    /// and protocol failures are `Err`.
    fn send_command(
        &mut self,
        args: &[Bytes],
    ) -> impl Future<Output = Result<Frame, NodeError>> + Send;

    /// Returns true once the connection can no longer be used. Broken
    /// connections are dropped instead of going back to the pool.
    fn is_broken(&self) -> bool {
        false
    }
}

/// Issues `CLUSTER NODES` and returns the raw node table.
pub async fn cluster_nodes<C: NodeConnection>(conn: &mut C) -> Result<String, NodeError> {
    let args = [Bytes::from_static(b"CLUSTER"), Bytes::from_static(b"NODES")];
    let reply = conn.send_command(&args).await?;
    if reply.is_null() {
        return Ok(String::new());
    }
    if let Some(text) = reply.as_text() {
        return Ok(text);
    }
    match reply {
        Frame::Error(msg) => Err(NodeError::Server(msg)),
        other => Err(NodeError::UnexpectedReply(format!(
            "CLUSTER NODES returned {other:?}"
        ))),
    }
}
