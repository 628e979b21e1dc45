//! Routing decisions for a single operation.

use rand::prelude::IndexedRandom;

use crate::endpoint::Endpoint;
use crate::error::ClusterError;
use crate::node::Connector;
use crate::router::{Master, SlotRouter};
use crate::slots::{key_slot, SLOT_COUNT};

/// Resolves the slot shared by every key.
///
/// Multi-key operations must stay within one slot, as on the server.
pub fn resolve_slot<K: AsRef<[u8]>>(keys: &[K]) -> Result<u16, ClusterError> {
    let (first, rest) = keys.split_first().ok_or(ClusterError::NoKeys)?;
    let slot = key_slot(first.as_ref());
    for key in rest {
        let other = key_slot(key.as_ref());
        if other != slot {
            return Err(ClusterError::CrossSlot { first: slot, other });
        }
    }
    Ok(slot)
}

/// Where an operation should run. Resolved against the current router on
/// every attempt, so a retry after a refresh picks up the new owner.
#[derive(Debug, Clone)]
pub(crate) enum Route {
    Slot { slot: u16, key: Option<String> },
    Node(Endpoint),
    RandomMaster,
}

impl Route {
    pub fn slot(slot: u32) -> Result<Self, ClusterError> {
        match u16::try_from(slot) {
            Ok(slot) if slot < SLOT_COUNT => Ok(Route::Slot { slot, key: None }),
            _ => Err(ClusterError::InvalidSlot(slot)),
        }
    }

    pub fn keyed<K: AsRef<[u8]>>(keys: &[K]) -> Result<Self, ClusterError> {
        let slot = resolve_slot(keys)?;
        let key = keys
            .first()
            .map(|k| String::from_utf8_lossy(k.as_ref()).into_owned());
        Ok(Route::Slot { slot, key })
    }

    pub fn resolve<'r, C: Connector>(
        &self,
        router: &'r SlotRouter<C>,
    ) -> Result<&'r Master<C>, ClusterError> {
        match self {
            Route::Slot { slot, key } => {
                router
                    .lookup(*slot)
                    .ok_or_else(|| ClusterError::SlotNotCovered {
                        slot: *slot,
                        key: key.clone(),
                    })
            }
            Route::Node(endpoint) => {
                let addr = endpoint.addr();
                let node = router
                    .node_at(&addr)
                    .ok_or_else(|| ClusterError::NodeNotFound(addr.clone()))?;
                if !node.is_master() {
                    return Err(ClusterError::NotMaster(addr));
                }
                router
                    .master_at(&addr)
                    .ok_or(ClusterError::NodeUnavailable(addr))
            }
            Route::RandomMaster => router
                .masters()
                .choose(&mut rand::rng())
                .ok_or(ClusterError::NoMasters),
        }
    }
}
