//! Bounded connection pool for one node.
//!
//! A semaphore caps the number of live connections. Idle connections are
//! reused most-recently-returned first; a connection that reports itself
//! broken is dropped on release instead of being reused. Once the pool is
//! disposed, waiting and future acquires fail with
//! [`NodeError::PoolClosed`].

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::PoolConfig;
use crate::endpoint::Endpoint;
use crate::error::NodeError;
use crate::node::{Connector, NodeConnection};

pub struct NodePool<C: Connector> {
    endpoint: Endpoint,
    connector: Arc<C>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<C::Conn>>,
    acquire_timeout: Duration,
    closed: AtomicBool,
}

impl<C: Connector> NodePool<C> {
    pub fn new(endpoint: Endpoint, connector: Arc<C>, config: &PoolConfig) -> Self {
        Self {
            endpoint,
            connector,
            permits: Arc::new(Semaphore::new(config.max_size)),
            idle: Mutex::new(Vec::new()),
            acquire_timeout: config.acquire_timeout(),
            closed: AtomicBool::new(false),
        }
    }

    /// Checks out a connection, opening a new one if none is idle.
    ///
    /// Waits up to the acquire timeout when every connection is in use.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<C>, NodeError> {
        if self.is_closed() {
            return Err(NodeError::PoolClosed);
        }

        let permit = tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| NodeError::PoolTimeout)?
            .map_err(|_| NodeError::PoolClosed)?;

        let reused = self.lock_idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.connector.connect(&self.endpoint).await?,
        };

        Ok(PooledConnection {
            pool: Arc::clone(self),
            conn: Some(conn),
            _permit: permit,
        })
    }

    /// Closes the pool and drops every idle connection. Connections that
    /// are checked out are dropped when they come back.
    pub fn dispose_all(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();
        let dropped = std::mem::take(&mut *self.lock_idle()).len();
        debug!(addr = %self.endpoint, idle = dropped, "connection pool disposed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.lock_idle().len()
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<C::Conn>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, conn: C::Conn) {
        if conn.is_broken() || self.is_closed() {
            return;
        }
        self.lock_idle().push(conn);
    }
}

/// A checked-out connection. Returns itself to the pool on drop.
pub struct PooledConnection<C: Connector> {
    pool: Arc<NodePool<C>>,
    conn: Option<C::Conn>,
    // released after the connection is handed back
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Conn;

    fn deref(&self) -> &C::Conn {
        // only taken in Drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C::Conn {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
