//! Seams between the executor and the rest of the driver.
//!
//! The executor only talks to these traits, so the retry loop can run
//! against real sockets or against the in-memory doubles in `testing`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::address::NodeAddress;
use super::slot::RoutingKey;
use crate::core::command::Cmd;
use crate::proto::frame::Frame;
use crate::Result;

/// Pools keyed by node address, iterated in address order.
pub type NodeMap<P> = BTreeMap<NodeAddress, Arc<P>>;

/// A source of connections to one node.
#[async_trait]
pub trait NodePool: Send + Sync {
    /// Connection handed out by the pool.
    type Connection: Send;

    /// Leases a connection. Dropping it gives it back.
    async fn get_resource(&self) -> Result<Self::Connection>;
}

/// Resolves connections and owns the cached slot table.
///
/// Implementations must tolerate concurrent lookups racing with renewals.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Leased connection; released when dropped.
    type Connection: Send + Sync;
    /// Per-node pool type returned in node maps.
    type Pool: NodePool<Connection = Self::Connection> + 'static;

    /// Returns a connection to the primary owning `key`, or to any reachable
    /// node for [`RoutingKey::Keyless`].
    async fn get_connection(&self, key: RoutingKey) -> Result<Self::Connection>;

    /// Returns a connection to a replica serving `key`.
    async fn get_replica_connection(&self, key: RoutingKey) -> Result<Self::Connection>;

    /// Returns a connection to an explicit node, bypassing slot lookup.
    async fn get_connection_to(&self, address: &NodeAddress) -> Result<Self::Connection>;

    /// Pools of the primary nodes.
    async fn primary_nodes_connection_map(&self) -> Result<NodeMap<Self::Pool>>;

    /// Pools of every known node, replicas included.
    async fn connection_map(&self) -> Result<NodeMap<Self::Pool>>;

    /// Refreshes the slot cache.
    ///
    /// `hint` is the connection that reported a `MOVED`; `None` asks for a
    /// general refresh. Failures are handled inside the provider.
    async fn renew_slot_cache(&self, hint: Option<&Self::Connection>);
}

/// Performs one wire round trip on a leased connection.
///
/// Error replies must be surfaced as typed errors, so that redirects come
/// back as [`Error::Moved`](crate::Error::Moved) and
/// [`Error::Ask`](crate::Error::Ask).
#[async_trait]
pub trait Transport<C: Send>: Send + Sync {
    /// Sends `cmd` over `connection` and returns the reply.
    async fn execute(&self, connection: &mut C, cmd: &Cmd) -> Result<Frame>;
}

#[async_trait]
impl<C, T> Transport<C> for Arc<T>
where
    C: Send,
    T: Transport<C> + ?Sized,
{
    async fn execute(&self, connection: &mut C, cmd: &Cmd) -> Result<Frame> {
        (**self).execute(connection, cmd).await
    }
}
