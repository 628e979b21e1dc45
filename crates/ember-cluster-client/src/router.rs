//! Slot router: an immutable snapshot of who serves which slot.
//!
//! A router is built from a full node table and never changes afterwards.
//! Discovery publishes a replacement by swapping the shared pointer, so a
//! reader holding an `Arc<SlotRouter>` always sees one consistent table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::endpoint::Endpoint;
use crate::node::Connector;
use crate::pool::NodePool;
use crate::slots::{SlotRange, SlotTable};
use crate::topology::NodeDescriptor;

/// A master that receives traffic, with its connection pool.
pub struct Master<C: Connector> {
    pub node_id: String,
    pub endpoint: Endpoint,
    pub pool: Arc<NodePool<C>>,
}

pub struct SlotRouter<C: Connector> {
    nodes: Vec<NodeDescriptor>,
    masters: Vec<Master<C>>,
    table: SlotTable,
    disposed: AtomicBool,
}

impl<C: Connector> SlotRouter<C> {
    /// A router with no nodes; every lookup misses.
    pub fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            masters: Vec::new(),
            table: SlotTable::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Builds a router from a node table, opening one pool per routable
    /// master. When two masters claim the same slot the later one wins.
    pub fn build(nodes: Vec<NodeDescriptor>, connector: &Arc<C>, pool: &PoolConfig) -> Self {
        let mut masters = Vec::new();
        let mut table = SlotTable::new();

        for node in nodes.iter().filter(|n| n.is_routable_master()) {
            let Ok(index) = u16::try_from(masters.len()) else {
                warn!(node = %node.node_id, "too many masters, ignoring node");
                continue;
            };
            for range in node.slot_ranges() {
                let replaced = table.assign_range(range, index);
                if replaced > 0 {
                    warn!(
                        node = %node.node_id,
                        range = %range,
                        replaced,
                        "overlapping slot ownership, last master wins"
                    );
                }
            }
            masters.push(Master {
                node_id: node.node_id.clone(),
                endpoint: node.endpoint.clone(),
                pool: Arc::new(NodePool::new(node.endpoint.clone(), Arc::clone(connector), pool)),
            });
        }

        debug!(
            nodes = nodes.len(),
            masters = masters.len(),
            covered = table.covered_count(),
            "slot router built"
        );

        Self {
            nodes,
            masters,
            table,
            disposed: AtomicBool::new(false),
        }
    }

    /// Returns the master serving `slot`.
    pub fn lookup(&self, slot: u16) -> Option<&Master<C>> {
        self.table.owner(slot).and_then(|idx| self.masters.get(idx))
    }

    /// Finds a routable master by `host:port`.
    pub fn master_at(&self, addr: &str) -> Option<&Master<C>> {
        self.masters.iter().find(|m| m.endpoint.addr() == addr)
    }

    /// Finds any node in the table by `host:port`.
    pub fn node_at(&self, addr: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.endpoint.addr() == addr)
    }

    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    pub fn masters(&self) -> &[Master<C>] {
        &self.masters
    }

    pub fn table(&self) -> &SlotTable {
        &self.table
    }

    /// Slot ranges per routable master, plus the slots nobody serves.
    pub fn coverage(&self) -> Coverage {
        let masters = self
            .masters
            .iter()
            .enumerate()
            .map(|(idx, m)| {
                // build() never stores more than u16::MAX masters
                let ranges = u16::try_from(idx)
                    .map(|i| self.table.ranges_of(i))
                    .unwrap_or_default();
                (m.endpoint.clone(), ranges)
            })
            .collect();
        Coverage {
            masters,
            uncovered: self.table.uncovered_ranges(),
        }
    }

    /// Closes every pool of this snapshot. Only the first call has an
    /// effect; returns whether this call did the work.
    pub fn dispose(&self) -> bool {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        for master in &self.masters {
            master.pool.dispose_all();
        }
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Which master serves which slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    pub masters: Vec<(Endpoint, Vec<SlotRange>)>,
    pub uncovered: Vec<SlotRange>,
}

impl Coverage {
    pub fn covered_slots(&self) -> usize {
        self.masters
            .iter()
            .flat_map(|(_, ranges)| ranges)
            .map(SlotRange::len)
            .sum()
    }

    pub fn is_complete(&self) -> bool {
        self.uncovered.is_empty()
    }
}
