//! Per-node connection pooling.
//!
//! Each pool keeps a short list of idle multiplexed handles to one node. A
//! leased [`PooledConnection`] goes back to the idle list when dropped,
//! unless the transport marked it broken.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::address::NodeAddress;
use super::provider::NodePool;
use crate::core::connection;
use crate::core::multiplexed::MultiplexedConnection;
use crate::proto::frame::Frame;
use crate::Result;

/// Configuration for node pools.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Idle handles kept per node.
    pub max_idle_per_node: usize,
    /// Timeout for opening a new TCP connection.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_node: 8,
            connect_timeout: Duration::from_secs(2),
        }
    }
}

type IdleList = Arc<Mutex<Vec<MultiplexedConnection>>>;

/// Pool of connections to a single node.
pub struct ConnectionPool {
    address: NodeAddress,
    config: PoolConfig,
    idle: IdleList,
}

impl ConnectionPool {
    /// Creates an empty pool; connections are opened on demand.
    pub fn new(address: NodeAddress, config: PoolConfig) -> Self {
        Self {
            address,
            config,
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the node this pool connects to.
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Number of idle handles.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn take_idle(&self) -> Option<MultiplexedConnection> {
        let mut idle = self.idle.lock().ok()?;
        while let Some(conn) = idle.pop() {
            if !conn.is_closed() {
                return Some(conn);
            }
        }
        None
    }

    /// Leases a connection, reusing an idle handle when one is alive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if a new connection cannot be
    /// opened.
    pub async fn get(&self) -> Result<PooledConnection> {
        let conn = match self.take_idle() {
            Some(conn) => conn,
            None => {
                debug!(node = %self.address, "opening connection");
                connection::connect(&self.address, self.config.connect_timeout).await?
            }
        };
        Ok(PooledConnection {
            conn: Some(conn),
            idle: self.idle.clone(),
            max_idle: self.config.max_idle_per_node,
            broken: false,
        })
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.address)
            .field("idle", &self.idle_count())
            .finish()
    }
}

#[async_trait]
impl NodePool for ConnectionPool {
    type Connection = PooledConnection;

    async fn get_resource(&self) -> Result<PooledConnection> {
        self.get().await
    }
}

/// A connection leased from a [`ConnectionPool`].
pub struct PooledConnection {
    conn: Option<MultiplexedConnection>,
    idle: IdleList,
    max_idle: usize,
    broken: bool,
}

impl PooledConnection {
    /// Returns the node this connection talks to.
    pub fn address(&self) -> Option<&NodeAddress> {
        self.conn.as_ref().map(|c| c.address())
    }

    /// Returns the underlying multiplexed handle.
    pub fn inner(&self) -> Option<&MultiplexedConnection> {
        self.conn.as_ref()
    }

    /// Sends a frame and awaits the reply.
    pub async fn send(&self, frame: Frame) -> Result<Frame> {
        match &self.conn {
            Some(conn) => conn.send_command(frame).await,
            None => Err(crate::Error::broken_pipe("connection released")),
        }
    }

    /// Keeps the handle out of the idle list when this lease ends.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Returns true if the lease was marked broken.
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.broken || conn.is_closed() {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(conn);
            }
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("address", &self.address())
            .field("broken", &self.broken)
            .finish()
    }
}
