//! Topology discovery.
//!
//! Discovery asks the seeds for `CLUSTER NODES`, compares the answer with
//! the table currently in use and, when anything that affects routing
//! changed, builds a new [`SlotRouter`] and swaps it in. Only one
//! discovery runs at a time; callers that arrive while one is in flight
//! wait for it and then see its outcome.
//!
//! Fetches are rate limited: within `min_discovery_interval` of the last
//! successful fetch the current view counts as fresh and no seed is
//! contacted. A burst of failing commands therefore costs at most one
//! round of topology queries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ClusterConfig, PoolConfig};
use crate::endpoint::Endpoint;
use crate::error::{ClusterError, SeedError};
use crate::node::{cluster_nodes, Connector};
use crate::router::SlotRouter;
use crate::topology::{parse_topology, stamp_password, topology_changed, NodeDescriptor};

/// Asks each seed in turn for the node table.
///
/// The first non-empty table wins. A seed that fails is followed by a
/// short pause before the next one is tried; when the last seed fails the
/// error names it. If every seed answers with an empty table the result
/// is an empty table.
pub async fn fetch_topology<C: Connector>(
    connector: &C,
    seeds: &[Endpoint],
    retry_delay: Duration,
) -> Result<Vec<NodeDescriptor>, ClusterError> {
    for (i, seed) in seeds.iter().enumerate() {
        match fetch_from_seed(connector, seed).await {
            Ok(nodes) if nodes.is_empty() => {
                debug!(seed = %seed, "seed returned an empty node table");
            }
            Ok(nodes) => {
                debug!(seed = %seed, nodes = nodes.len(), "fetched node table");
                return Ok(nodes);
            }
            Err(reason) => {
                warn!(seed = %seed, error = %reason, "seed unavailable for discovery");
                if i + 1 == seeds.len() {
                    return Err(ClusterError::DiscoveryExhausted {
                        endpoint: seed.identity_key(),
                        reason,
                    });
                }
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
    Ok(Vec::new())
}

async fn fetch_from_seed<C: Connector>(
    connector: &C,
    seed: &Endpoint,
) -> Result<Vec<NodeDescriptor>, SeedError> {
    let mut conn = connector.connect(seed).await?;
    let text = cluster_nodes(&mut conn).await?;
    let mut nodes = parse_topology(&text)?;
    stamp_password(&mut nodes, seed.password.as_deref());
    Ok(nodes)
}

/// Owns the current router and serializes its replacement.
pub(crate) struct Discovery<C: Connector> {
    connector: Arc<C>,
    pool_config: PoolConfig,
    min_interval: Duration,
    seed_retry_delay: Duration,
    router: ArcSwap<SlotRouter<C>>,
    // seeds for the next fetch; held for the whole refresh
    seeds: tokio::sync::Mutex<Vec<Endpoint>>,
    last_discovery: Mutex<Option<Instant>>,
    discovering: AtomicBool,
    closed: AtomicBool,
}

impl<C: Connector> Discovery<C> {
    pub fn new(connector: Arc<C>, config: &ClusterConfig, seeds: Vec<Endpoint>) -> Self {
        Self {
            connector,
            pool_config: config.pool.clone(),
            min_interval: config.min_discovery_interval(),
            seed_retry_delay: config.seed_retry_delay(),
            router: ArcSwap::from_pointee(SlotRouter::empty()),
            seeds: tokio::sync::Mutex::new(seeds),
            last_discovery: Mutex::new(None),
            discovering: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// The router currently in use.
    pub fn snapshot(&self) -> Arc<SlotRouter<C>> {
        self.router.load_full()
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn last_discovery(&self) -> Option<Instant> {
        *self.last_discovery.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_last_discovery(&self, at: Instant) {
        *self.last_discovery.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    /// Returns true if the last successful fetch is within the minimum
    /// interval.
    pub fn is_fresh(&self) -> bool {
        self.last_discovery()
            .is_some_and(|last| last.elapsed() < self.min_interval)
    }

    pub async fn seeds(&self) -> Vec<Endpoint> {
        self.seeds.lock().await.clone()
    }

    /// Brings the router up to date with the cluster.
    ///
    /// Returns whether the view is fresh afterwards. A `false` tells the
    /// caller that retrying against the current router is pointless.
    pub async fn refresh(&self) -> Result<bool, ClusterError> {
        let mut seeds = self.seeds.lock().await;
        let _flag = DiscoveringFlag::set(&self.discovering);

        if self.is_closed() {
            return Err(ClusterError::Closed);
        }
        if self.is_fresh() {
            debug!("topology refreshed recently, skipping fetch");
            return Ok(true);
        }

        let nodes = fetch_topology(&*self.connector, &seeds, self.seed_retry_delay).await?;
        if nodes.is_empty() {
            warn!("every seed returned an empty node table, keeping current topology");
            return Ok(self.is_fresh());
        }
        self.set_last_discovery(Instant::now());

        let current = self.router.load();
        if !topology_changed(current.nodes(), &nodes) {
            debug!("topology unchanged");
            return Ok(self.is_fresh());
        }

        let router = SlotRouter::build(nodes, &self.connector, &self.pool_config);
        if !router.masters().is_empty() {
            *seeds = router.masters().iter().map(|m| m.endpoint.clone()).collect();
        }
        info!(
            masters = router.masters().len(),
            covered = router.table().covered_count(),
            "cluster topology changed, router rebuilt"
        );

        let old = self.router.swap(Arc::new(router));
        old.dispose();
        Ok(self.is_fresh())
    }

    /// Stops discovery for good and closes every pool. Safe to call more
    /// than once and concurrently.
    pub async fn shutdown(&self) {
        let _seeds = self.seeds.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let old = self.router.swap(Arc::new(SlotRouter::empty()));
        old.dispose();
        info!("cluster client shut down");
    }
}

/// Raises the discovering flag for as long as it lives.
struct DiscoveringFlag<'a>(&'a AtomicBool);

impl<'a> DiscoveringFlag<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for DiscoveringFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
