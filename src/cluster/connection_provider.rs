//! Slot-aware connection provider backed by real node pools.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::{IndexedRandom, SliceRandom};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::address::NodeAddress;
use super::commands::{cluster_slots, readonly};
use super::errors::parse_redis_error;
use super::pool::{ConnectionPool, PoolConfig, PooledConnection};
use super::provider::{ConnectionProvider, NodeMap};
use super::slot::RoutingKey;
use super::topology::ClusterTopology;
use crate::core::command::ping;
use crate::core::connection;
use crate::core::multiplexed::MultiplexedConnection;
use crate::proto::frame::Frame;
use crate::{Error, Result};

#[derive(Debug, Default)]
struct ProviderState {
    topology: ClusterTopology,
    pools: NodeMap<ConnectionPool>,
}

/// Connection provider for a live cluster.
///
/// Holds the slot table and one [`ConnectionPool`] per known node. Renewals
/// are single-flight: a caller that finds one already running returns at
/// once and keeps using the current table.
#[derive(Debug)]
pub struct ClusterConnectionProvider {
    seeds: Vec<NodeAddress>,
    pool_config: PoolConfig,
    state: RwLock<ProviderState>,
    rediscover: Mutex<()>,
}

impl ClusterConnectionProvider {
    /// Discovers the cluster from the first reachable seed.
    ///
    /// Seeds are tried in random order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClusterOperation`] if `seeds` is empty or no seed
    /// returns a usable slot table.
    pub async fn connect(seeds: Vec<NodeAddress>, pool_config: PoolConfig) -> Result<Self> {
        if seeds.is_empty() {
            return Err(Error::cluster_operation(
                "No nodes to initialize cluster slots cache.",
            ));
        }

        let provider = Self {
            seeds,
            pool_config,
            state: RwLock::new(ProviderState::default()),
            rediscover: Mutex::new(()),
        };

        let mut order = provider.seeds.clone();
        order.shuffle(&mut rand::rng());

        let mut first_error = None;
        for seed in &order {
            match provider.discover_from_address(seed).await {
                Ok(()) => return Ok(provider),
                Err(e) => {
                    debug!(node = %seed, error = %e, "seed discovery failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        Err(Error::cluster_operation_caused_by(
            "Could not initialize cluster slots cache.",
            first_error,
        ))
    }

    /// Spawns a task that renews the slot cache every `period`.
    ///
    /// The task stops once the provider is dropped.
    pub fn spawn_refresh_task(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(provider) = weak.upgrade() else {
                    return;
                };
                provider.renew(None).await;
                let nodes = provider.node_count().await;
                debug!(nodes, "periodic topology refresh");
            }
        })
    }

    /// Returns a copy of the current slot table.
    pub async fn topology(&self) -> ClusterTopology {
        self.state.read().await.topology.clone()
    }

    /// Number of nodes with a pool.
    pub async fn node_count(&self) -> usize {
        self.state.read().await.pools.len()
    }

    /// Re-discovers the topology and reports why it failed, if it did.
    ///
    /// Returns `Ok(())` without doing anything when another renewal is
    /// already running.
    ///
    /// # Errors
    ///
    /// Returns the first discovery error when no node produced a slot table.
    pub async fn refresh(&self, hint: Option<&MultiplexedConnection>) -> Result<()> {
        let Ok(_guard) = self.rediscover.try_lock() else {
            debug!("topology renewal already in progress");
            return Ok(());
        };

        let mut first_error = None;

        if let Some(conn) = hint {
            match self.discover_from(conn).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(node = %conn.address(), error = %e, "hinted discovery failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        let mut tried = BTreeSet::new();
        for seed in &self.seeds {
            tried.insert(seed.clone());
            match self.discover_from_address(seed).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        for pool in self.shuffled_pools().await {
            if tried.contains(pool.address()) {
                continue;
            }
            let result = match pool.get().await {
                Ok(lease) => match lease.inner() {
                    Some(conn) => self.discover_from(conn).await,
                    None => continue,
                },
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        Err(first_error.unwrap_or_else(|| Error::cluster_operation("No reachable node in cluster.")))
    }

    #[instrument(skip(self, hint), level = "debug")]
    async fn renew(&self, hint: Option<&MultiplexedConnection>) {
        if let Err(e) = self.refresh(hint).await {
            warn!(error = %e, "topology renewal failed on every node");
        }
    }

    async fn discover_from_address(&self, address: &NodeAddress) -> Result<()> {
        let conn = connection::connect(address, self.pool_config.connect_timeout).await?;
        self.discover_from(&conn).await
    }

    async fn discover_from(&self, conn: &MultiplexedConnection) -> Result<()> {
        let reply = conn.send_command(cluster_slots().into_frame()).await?;
        if let Frame::Error(msg) = &reply {
            return Err(parse_redis_error(msg));
        }
        let topology = ClusterTopology::from_cluster_slots(reply)?;
        if topology.slot_ranges().is_empty() {
            return Err(Error::cluster_operation("Cluster slots list is empty."));
        }
        self.install(topology).await;
        Ok(())
    }

    /// Swaps in a new slot table, opening pools for new nodes and dropping
    /// pools of nodes that left.
    async fn install(&self, topology: ClusterTopology) {
        let nodes = topology.all_nodes();
        let mut state = self.state.write().await;
        state.pools.retain(|addr, _| nodes.contains(addr));
        for addr in nodes {
            let config = self.pool_config.clone();
            state
                .pools
                .entry(addr.clone())
                .or_insert_with(|| Arc::new(ConnectionPool::new(addr, config)));
        }
        debug!(
            ranges = topology.slot_ranges().len(),
            nodes = state.pools.len(),
            "installed slot table"
        );
        state.topology = topology;
    }

    async fn pool_for(&self, address: &NodeAddress) -> Arc<ConnectionPool> {
        if let Some(pool) = self.state.read().await.pools.get(address) {
            return pool.clone();
        }
        let mut state = self.state.write().await;
        state
            .pools
            .entry(address.clone())
            .or_insert_with(|| {
                Arc::new(ConnectionPool::new(address.clone(), self.pool_config.clone()))
            })
            .clone()
    }

    async fn slot_pool(&self, slot: u16) -> Option<Arc<ConnectionPool>> {
        let state = self.state.read().await;
        let primary = state.topology.primary_for_slot(slot)?;
        state.pools.get(primary).cloned()
    }

    async fn shuffled_pools(&self) -> Vec<Arc<ConnectionPool>> {
        let mut pools: Vec<_> = self.state.read().await.pools.values().cloned().collect();
        pools.shuffle(&mut rand::rng());
        pools
    }

    /// Returns a connection to any node that answers `PING`.
    async fn random_connection(&self) -> Result<PooledConnection> {
        let mut first_error = None;
        for pool in self.shuffled_pools().await {
            let mut lease = match pool.get().await {
                Ok(lease) => lease,
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            match lease.send(ping().into_frame()).await {
                Ok(Frame::Error(msg)) => {
                    first_error.get_or_insert(parse_redis_error(&msg));
                }
                Ok(_) => return Ok(lease),
                Err(e) => {
                    lease.mark_broken();
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(Error::cluster_operation_caused_by(
            "No reachable node in cluster.",
            first_error,
        ))
    }

    async fn connection_from_slot(&self, slot: u16) -> Result<PooledConnection> {
        if let Some(pool) = self.slot_pool(slot).await {
            return pool.get().await;
        }
        debug!(slot, "no owner cached for slot, renewing");
        self.renew(None).await;
        match self.slot_pool(slot).await {
            Some(pool) => pool.get().await,
            None => self.random_connection().await,
        }
    }
}

#[async_trait]
impl ConnectionProvider for ClusterConnectionProvider {
    type Connection = PooledConnection;
    type Pool = ConnectionPool;

    async fn get_connection(&self, key: RoutingKey) -> Result<PooledConnection> {
        match key {
            RoutingKey::Slot(slot) => self.connection_from_slot(slot).await,
            RoutingKey::Keyless => self.random_connection().await,
        }
    }

    async fn get_replica_connection(&self, key: RoutingKey) -> Result<PooledConnection> {
        let Some(slot) = key.slot() else {
            return self.random_connection().await;
        };
        let replica = {
            let state = self.state.read().await;
            state
                .topology
                .replicas_for_slot(slot)
                .choose(&mut rand::rng())
                .cloned()
        };
        let Some(replica) = replica else {
            return self.connection_from_slot(slot).await;
        };

        let mut lease = self.pool_for(&replica).await.get().await?;
        match lease.send(readonly().into_frame()).await {
            Ok(Frame::Error(msg)) => Err(parse_redis_error(&msg)),
            Ok(_) => Ok(lease),
            Err(e) => {
                lease.mark_broken();
                Err(e)
            }
        }
    }

    async fn get_connection_to(&self, address: &NodeAddress) -> Result<PooledConnection> {
        self.pool_for(address).await.get().await
    }

    async fn primary_nodes_connection_map(&self) -> Result<NodeMap<ConnectionPool>> {
        let state = self.state.read().await;
        Ok(state
            .topology
            .primaries()
            .into_iter()
            .filter_map(|addr| state.pools.get(&addr).map(|p| (addr, p.clone())))
            .collect())
    }

    async fn connection_map(&self) -> Result<NodeMap<ConnectionPool>> {
        Ok(self.state.read().await.pools.clone())
    }

    async fn renew_slot_cache(&self, hint: Option<&PooledConnection>) {
        self.renew(hint.and_then(PooledConnection::inner)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeNode;

    fn slots_for(owner: &NodeAddress) -> Frame {
        Frame::Array(vec![Frame::Array(vec![
            Frame::Integer(0),
            Frame::Integer(16383),
            Frame::Array(vec![
                Frame::bulk(owner.host().to_string()),
                Frame::Integer(owner.port() as i64),
            ]),
        ])])
    }

    async fn single_node() -> FakeNode {
        FakeNode::spawn(|me, args| match args[0].as_ref() {
            b"CLUSTER" => slots_for(me),
            b"PING" => Frame::simple("PONG"),
            _ => Frame::simple("OK"),
        })
        .await
    }

    #[tokio::test]
    async fn test_connect_discovers_topology() {
        let node = single_node().await;
        let provider = ClusterConnectionProvider::connect(
            vec![node.address().clone()],
            PoolConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(provider.node_count().await, 1);
        assert!(provider.topology().await.is_fully_covered());

        let conn = provider
            .get_connection(RoutingKey::for_key("foo"))
            .await
            .unwrap();
        assert_eq!(conn.address(), Some(node.address()));

        let primaries = provider.primary_nodes_connection_map().await.unwrap();
        assert_eq!(primaries.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_without_seeds() {
        let err = ClusterConnectionProvider::connect(Vec::new(), PoolConfig::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cluster operation failed: No nodes to initialize cluster slots cache."
        );
    }

    #[tokio::test]
    async fn test_connect_unreachable_seeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = ClusterConnectionProvider::connect(
            vec![NodeAddress::new("127.0.0.1", port)],
            PoolConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ClusterOperation { source: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_keyless_connection_pings_node() {
        let node = single_node().await;
        let provider = ClusterConnectionProvider::connect(
            vec![node.address().clone()],
            PoolConfig::default(),
        )
        .await
        .unwrap();

        let conn = provider.get_connection(RoutingKey::Keyless).await.unwrap();
        assert_eq!(conn.address(), Some(node.address()));
    }

    #[tokio::test]
    async fn test_replica_falls_back_to_primary() {
        let node = single_node().await;
        let provider = ClusterConnectionProvider::connect(
            vec![node.address().clone()],
            PoolConfig::default(),
        )
        .await
        .unwrap();

        let conn = provider
            .get_replica_connection(RoutingKey::Slot(42))
            .await
            .unwrap();
        assert_eq!(conn.address(), Some(node.address()));
    }

    #[tokio::test]
    async fn test_refresh_task_rereads_slots_until_dropped() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let slot_reads = Arc::new(AtomicUsize::new(0));
        let counter = slot_reads.clone();
        let node = FakeNode::spawn(move |me, args| match args[0].as_ref() {
            b"CLUSTER" => {
                counter.fetch_add(1, Ordering::SeqCst);
                slots_for(me)
            }
            _ => Frame::simple("OK"),
        })
        .await;
        let provider = Arc::new(
            ClusterConnectionProvider::connect(vec![node.address().clone()], PoolConfig::default())
                .await
                .unwrap(),
        );
        let after_connect = slot_reads.load(Ordering::SeqCst);

        let task = provider.spawn_refresh_task(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(slot_reads.load(Ordering::SeqCst) > after_connect);
        assert_eq!(provider.node_count().await, 1);

        drop(provider);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_renew_is_idempotent() {
        let node = single_node().await;
        let provider = ClusterConnectionProvider::connect(
            vec![node.address().clone()],
            PoolConfig::default(),
        )
        .await
        .unwrap();

        let (a, b) = tokio::join!(provider.renew_slot_cache(None), provider.refresh(None));
        let () = a;
        assert!(b.is_ok());
        assert_eq!(provider.node_count().await, 1);
    }
}
