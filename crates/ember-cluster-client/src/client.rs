//! The cluster client handle.
//!
//! [`ClusterClient`] is cheap to clone; all clones share one router and
//! one discovery lock. Every operation resolves its target against the
//! current router snapshot, runs on a pooled connection and, when it fails
//! in a way a topology change could explain, refreshes the topology and
//! tries again (once by default).

use std::sync::Arc;

use bytes::Bytes;
use ember_protocol::Frame;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ClusterConfig;
use crate::connection::TcpConnector;
use crate::discovery::Discovery;
use crate::dispatch::Route;
use crate::endpoint::Endpoint;
use crate::error::{ClusterError, NodeError};
use crate::node::{Connector, NodeConnection};
use crate::router::{Coverage, Master};
use crate::topology::NodeDescriptor;

/// A handle to a slot-sharded cluster.
pub struct ClusterClient<C: Connector = TcpConnector> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Connector> {
    discovery: Discovery<C>,
    max_retries: u32,
}

impl<C: Connector> Clone for ClusterClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ClusterClient<TcpConnector> {
    /// Connects to the cluster over TCP and loads the initial topology.
    pub async fn connect(config: ClusterConfig) -> Result<Self, ClusterError> {
        let connector = TcpConnector::new(config.connect_timeout());
        Self::with_connector(config, connector).await
    }
}

impl<C: Connector> ClusterClient<C> {
    /// Creates a client using a custom connector and loads the initial
    /// topology. Fails if no seed can be reached.
    pub async fn with_connector(
        config: ClusterConfig,
        connector: C,
    ) -> Result<Self, ClusterError> {
        let seeds = config.validate()?;
        let client = Self {
            inner: Arc::new(Inner {
                discovery: Discovery::new(Arc::new(connector), &config, seeds),
                max_retries: config.max_retries,
            }),
        };
        client.inner.discovery.refresh().await?;
        Ok(client)
    }

    /// Runs `op` on the master that owns the slot of `keys`.
    ///
    /// Every key must hash to the same slot. `op` may be called more than
    /// once when the first attempt fails and the topology is refreshed.
    pub async fn execute<K, T, F>(&self, keys: &[K], op: F) -> Result<T, ClusterError>
    where
        K: AsRef<[u8]>,
        T: Send,
        F: for<'c> FnMut(&'c mut C::Conn) -> BoxFuture<'c, Result<T, NodeError>> + Send,
    {
        let route = Route::keyed(keys)?;
        self.run(route, op).await
    }

    /// Runs `op` on the master that owns `slot`.
    pub async fn execute_on_slot<T, F>(&self, slot: u32, op: F) -> Result<T, ClusterError>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut C::Conn) -> BoxFuture<'c, Result<T, NodeError>> + Send,
    {
        let route = Route::slot(slot)?;
        self.run(route, op).await
    }

    /// Runs `op` on a specific master, addressed by `host:port`.
    pub async fn execute_on_node<T, F>(&self, node: &Endpoint, op: F) -> Result<T, ClusterError>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut C::Conn) -> BoxFuture<'c, Result<T, NodeError>> + Send,
    {
        self.run(Route::Node(node.clone()), op).await
    }

    /// Runs `op` on every master, one after another. Stops at the first
    /// failure.
    pub async fn execute_on_masters<T, F>(
        &self,
        mut op: F,
    ) -> Result<Vec<(Endpoint, T)>, ClusterError>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut C::Conn) -> BoxFuture<'c, Result<T, NodeError>> + Send,
    {
        let masters = self.masters();
        let mut results = Vec::with_capacity(masters.len());
        for endpoint in masters {
            let value = self.run(Route::Node(endpoint.clone()), &mut op).await?;
            results.push((endpoint, value));
        }
        Ok(results)
    }

    /// Runs `op` on one master picked at random.
    pub async fn execute_on_random_master<T, F>(&self, op: F) -> Result<T, ClusterError>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut C::Conn) -> BoxFuture<'c, Result<T, NodeError>> + Send,
    {
        self.run(Route::RandomMaster, op).await
    }

    /// Sends a raw command to the owner of `keys`. An error reply is
    /// returned as [`NodeError::Server`].
    pub async fn query<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        args: &[Bytes],
    ) -> Result<Frame, ClusterError> {
        self.run(Route::keyed(keys)?, command_op(args)).await
    }

    /// Sends a raw command to a specific master.
    pub async fn query_on_node(
        &self,
        node: &Endpoint,
        args: &[Bytes],
    ) -> Result<Frame, ClusterError> {
        self.run(Route::Node(node.clone()), command_op(args)).await
    }

    /// Refreshes the topology now, subject to the minimum interval.
    /// Returns whether the view is fresh.
    pub async fn refresh(&self) -> Result<bool, ClusterError> {
        self.inner.discovery.refresh().await
    }

    /// The node table behind the current router.
    pub fn nodes(&self) -> Vec<NodeDescriptor> {
        self.inner.discovery.snapshot().nodes().to_vec()
    }

    /// Endpoints of the masters that receive traffic.
    pub fn masters(&self) -> Vec<Endpoint> {
        self.inner
            .discovery
            .snapshot()
            .masters()
            .iter()
            .map(|m| m.endpoint.clone())
            .collect()
    }

    /// The master currently serving `slot`.
    pub fn slot_owner(&self, slot: u16) -> Option<Endpoint> {
        self.inner
            .discovery
            .snapshot()
            .lookup(slot)
            .map(|m| m.endpoint.clone())
    }

    pub fn coverage(&self) -> Coverage {
        self.inner.discovery.snapshot().coverage()
    }

    /// The seed list the next discovery will use. After the first
    /// successful discovery these are the known masters.
    pub async fn seeds(&self) -> Vec<Endpoint> {
        self.inner.discovery.seeds().await
    }

    pub fn is_discovering(&self) -> bool {
        self.inner.discovery.is_discovering()
    }

    pub fn last_discovery(&self) -> Option<Instant> {
        self.inner.discovery.last_discovery()
    }

    /// Closes every connection. Later operations fail with
    /// [`ClusterError::Closed`].
    pub async fn shutdown(&self) {
        self.inner.discovery.shutdown().await;
    }

    /// The bounded retry loop shared by every operation.
    async fn run<T, F>(&self, route: Route, mut op: F) -> Result<T, ClusterError>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut C::Conn) -> BoxFuture<'c, Result<T, NodeError>> + Send,
    {
        let discovery = &self.inner.discovery;
        let mut retries_left = self.inner.max_retries;

        loop {
            if discovery.is_closed() {
                return Err(ClusterError::Closed);
            }

            let router = discovery.snapshot();
            let err = match route.resolve(&*router) {
                Ok(master) => match attempt(master, &mut op).await {
                    Ok(value) => return Ok(value),
                    Err(e) => e,
                },
                Err(e) => e,
            };

            if !err.is_retryable() || retries_left == 0 {
                return Err(err);
            }
            retries_left -= 1;

            debug!(error = %err, "operation failed, refreshing topology");
            if !discovery.refresh().await? {
                return Err(err);
            }
        }
    }
}

async fn attempt<C, T, F>(master: &Master<C>, op: &mut F) -> Result<T, ClusterError>
where
    C: Connector,
    F: for<'c> FnMut(&'c mut C::Conn) -> BoxFuture<'c, Result<T, NodeError>>,
{
    let identity = || master.endpoint.identity_key();
    let mut conn = master
        .pool
        .acquire()
        .await
        .map_err(|e| ClusterError::node(identity(), e))?;
    op(&mut *conn)
        .await
        .map_err(|e| ClusterError::node(identity(), e))
}

/// Builds an operation sending `args` verbatim.
fn command_op<N: NodeConnection>(
    args: &[Bytes],
) -> impl for<'c> FnMut(&'c mut N) -> BoxFuture<'c, Result<Frame, NodeError>> + Send {
    let args = args.to_vec();
    operation(move |conn: &mut N| {
        let args = args.clone();
        Box::pin(async move {
            match conn.send_command(&args).await? {
                Frame::Error(msg) => Err(NodeError::Server(msg)),
                frame => Ok(frame),
            }
        })
    })
}

/// Pins down the higher-ranked signature of an operation closure.
fn operation<N, T, F>(f: F) -> F
where
    F: for<'c> FnMut(&'c mut N) -> BoxFuture<'c, Result<T, NodeError>>,
{
    f
}
