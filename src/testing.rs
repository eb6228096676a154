//! Test doubles for the executor and its collaborators.
//!
//! Everything here is in-memory except [`FakeNode`], which serves RESP on a
//! loopback socket. Enabled in unit tests and with the `test-utils` feature.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cluster::{Clock, ConnectionProvider, NodeAddress, NodeMap, NodePool, RoutingKey, Transport};
use crate::core::command::Cmd;
use crate::core::connection::{FrameReader, FrameWriter};
use crate::proto::frame::Frame;
use crate::{Error, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Something a double observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Slot-based lookup on the provider.
    GetConnection(RoutingKey),
    /// Replica lookup on the provider.
    GetReplicaConnection(RoutingKey),
    /// Lookup of an explicit node.
    GetConnectionTo(NodeAddress),
    /// Primary node map requested.
    PrimaryMap,
    /// Full node map requested.
    ConnectionMap,
    /// Cache renewal; carries the node of the hinting connection.
    Renew(Option<NodeAddress>),
    /// A connection was handed out.
    Leased {
        /// Node the connection points at.
        node: NodeAddress,
        /// Unique lease id.
        id: usize,
    },
    /// A connection was dropped.
    Released {
        /// Node the connection pointed at.
        node: NodeAddress,
        /// Lease id.
        id: usize,
    },
    /// A command reached the transport.
    Execute {
        /// Node the command was sent to.
        node: NodeAddress,
        /// Command name.
        command: String,
    },
}

/// Shared, ordered event log.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    next_id: Arc<AtomicUsize>,
}

impl Recorder {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn record(&self, event: Event) {
        lock(&self.events).push(event);
    }

    /// Returns a copy of all events so far.
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    /// Counts events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| pred(e)).count()
    }

    /// Nodes that received `command`, in order.
    pub fn executed(&self, command: &str) -> Vec<NodeAddress> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                Event::Execute { node, command: c } if c == command => Some(node.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forgets every recorded event.
    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    /// Returns true if every lease was released exactly once.
    pub fn all_released_once(&self) -> bool {
        let mut balance: BTreeMap<usize, i32> = BTreeMap::new();
        for event in lock(&self.events).iter() {
            match event {
                Event::Leased { id, .. } => *balance.entry(*id).or_default() += 1,
                Event::Released { id, .. } => *balance.entry(*id).or_default() -= 1,
                _ => {}
            }
        }
        balance.values().all(|&b| b == 0)
    }

    /// Hands out a connection to `node` and records the lease.
    pub fn lease(&self, node: &NodeAddress) -> MockConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.record(Event::Leased {
            node: node.clone(),
            id,
        });
        MockConnection {
            node: node.clone(),
            id,
            recorder: self.clone(),
        }
    }
}

/// In-memory connection that logs its release.
#[derive(Debug)]
pub struct MockConnection {
    node: NodeAddress,
    id: usize,
    recorder: Recorder,
}

impl MockConnection {
    /// Node this connection points at.
    pub fn node(&self) -> &NodeAddress {
        &self.node
    }

    /// Lease id.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.recorder.record(Event::Released {
            node: self.node.clone(),
            id: self.id,
        });
    }
}

/// Pool that leases [`MockConnection`]s to one node.
#[derive(Debug)]
pub struct MockPool {
    node: NodeAddress,
    recorder: Recorder,
}

impl MockPool {
    /// Creates a pool for `node`.
    pub fn new(node: NodeAddress, recorder: Recorder) -> Self {
        Self { node, recorder }
    }
}

#[async_trait]
impl NodePool for MockPool {
    type Connection = MockConnection;

    async fn get_resource(&self) -> Result<MockConnection> {
        Ok(self.recorder.lease(&self.node))
    }
}

type ErrorFactory = Box<dyn Fn() -> Error + Send + Sync>;

/// Scriptable provider.
///
/// Every slot resolves to one owner node. A general renewal can switch that
/// owner, which mimics a failover being discovered.
pub struct MockProvider {
    recorder: Recorder,
    owner: Mutex<NodeAddress>,
    owner_after_renew: Mutex<Option<NodeAddress>>,
    primaries: Mutex<Vec<NodeAddress>>,
    replicas: Mutex<Vec<NodeAddress>>,
    resolve_error: Mutex<Option<ErrorFactory>>,
}

impl MockProvider {
    /// Provider with primaries on ports 7000-7002, replicas on 7003-7005 and
    /// every slot owned by 7000.
    pub fn new(recorder: Recorder) -> Self {
        let node = |port| NodeAddress::new("127.0.0.1", port);
        Self {
            recorder,
            owner: Mutex::new(node(7000)),
            owner_after_renew: Mutex::new(None),
            primaries: Mutex::new((7000..7003).map(node).collect()),
            replicas: Mutex::new((7003..7006).map(node).collect()),
            resolve_error: Mutex::new(None),
        }
    }

    /// Replaces the primary set.
    pub fn with_primaries(self, primaries: Vec<NodeAddress>) -> Self {
        *lock(&self.primaries) = primaries;
        self
    }

    /// Replaces the replica set.
    pub fn with_replicas(self, replicas: Vec<NodeAddress>) -> Self {
        *lock(&self.replicas) = replicas;
        self
    }

    /// Routes every slot to `owner`.
    pub fn with_owner(self, owner: NodeAddress) -> Self {
        *lock(&self.owner) = owner;
        self
    }

    /// Makes the next general renewal move every slot to `owner`.
    pub fn reroute_on_renew(self, owner: NodeAddress) -> Self {
        *lock(&self.owner_after_renew) = Some(owner);
        self
    }

    /// Makes every slot or node lookup fail with the produced error.
    pub fn fail_resolution_with(self, make: impl Fn() -> Error + Send + Sync + 'static) -> Self {
        *lock(&self.resolve_error) = Some(Box::new(make));
        self
    }

    /// Current slot owner.
    pub fn owner(&self) -> NodeAddress {
        lock(&self.owner).clone()
    }

    fn check_resolution(&self) -> Result<()> {
        match lock(&self.resolve_error).as_ref() {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }

    fn map_of(&self, nodes: Vec<NodeAddress>) -> NodeMap<MockPool> {
        nodes
            .into_iter()
            .map(|n| {
                let pool = Arc::new(MockPool::new(n.clone(), self.recorder.clone()));
                (n, pool)
            })
            .collect()
    }
}

#[async_trait]
impl ConnectionProvider for MockProvider {
    type Connection = MockConnection;
    type Pool = MockPool;

    async fn get_connection(&self, key: RoutingKey) -> Result<MockConnection> {
        self.recorder.record(Event::GetConnection(key));
        self.check_resolution()?;
        Ok(self.recorder.lease(&self.owner()))
    }

    async fn get_replica_connection(&self, key: RoutingKey) -> Result<MockConnection> {
        self.recorder.record(Event::GetReplicaConnection(key));
        self.check_resolution()?;
        let replica = lock(&self.replicas).first().cloned();
        Ok(self.recorder.lease(&replica.unwrap_or_else(|| self.owner())))
    }

    async fn get_connection_to(&self, address: &NodeAddress) -> Result<MockConnection> {
        self.recorder.record(Event::GetConnectionTo(address.clone()));
        self.check_resolution()?;
        Ok(self.recorder.lease(address))
    }

    async fn primary_nodes_connection_map(&self) -> Result<NodeMap<MockPool>> {
        self.recorder.record(Event::PrimaryMap);
        let nodes = lock(&self.primaries).clone();
        Ok(self.map_of(nodes))
    }

    async fn connection_map(&self) -> Result<NodeMap<MockPool>> {
        self.recorder.record(Event::ConnectionMap);
        let mut nodes = lock(&self.primaries).clone();
        nodes.extend(lock(&self.replicas).iter().cloned());
        Ok(self.map_of(nodes))
    }

    async fn renew_slot_cache(&self, hint: Option<&MockConnection>) {
        self.recorder
            .record(Event::Renew(hint.map(|c| c.node().clone())));
        if hint.is_none() {
            if let Some(owner) = lock(&self.owner_after_renew).take() {
                *lock(&self.owner) = owner;
            }
        }
    }
}

type Handler = dyn Fn(&NodeAddress, &Cmd) -> Result<Frame> + Send + Sync;

/// Transport that answers with a closure and logs each command.
pub struct FnTransport {
    handler: Box<Handler>,
}

impl FnTransport {
    /// Wraps `handler`, which receives the target node and the command.
    pub fn new(handler: impl Fn(&NodeAddress, &Cmd) -> Result<Frame> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }

    /// Transport that answers `+OK` to everything.
    pub fn ok() -> Self {
        Self::new(|_, _| Ok(Frame::simple("OK")))
    }
}

#[async_trait]
impl Transport<MockConnection> for FnTransport {
    async fn execute(&self, connection: &mut MockConnection, cmd: &Cmd) -> Result<Frame> {
        connection.recorder.record(Event::Execute {
            node: connection.node.clone(),
            command: String::from_utf8_lossy(cmd.name()).into_owned(),
        });
        (self.handler)(&connection.node, cmd)
    }
}

/// Clock whose time only moves when told to, or when something sleeps.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    /// Starts at the current instant.
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Moves time forward.
    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *lock(&self.now)
    }

    async fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
        self.advance(duration);
    }
}

/// Builds a connection failure for scripted transports.
pub fn connection_refused() -> Error {
    Error::Io {
        source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
    }
}

type NodeHandler = dyn Fn(&NodeAddress, &[Bytes]) -> Frame + Send + Sync;

/// A RESP server on a loopback port, answering through a closure.
///
/// The closure receives the node's own address and the command arguments.
/// Dropping the node stops the listener and every open session.
pub struct FakeNode {
    address: NodeAddress,
    accept: JoinHandle<()>,
    sessions: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeNode {
    /// Binds `127.0.0.1:0` and starts serving.
    ///
    /// # Panics
    ///
    /// Panics if the loopback listener cannot be bound.
    pub async fn spawn(handler: impl Fn(&NodeAddress, &[Bytes]) -> Frame + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback listener");
        let port = listener
            .local_addr()
            .expect("listener has a local address")
            .port();
        let address = NodeAddress::new("127.0.0.1", port);

        let handler: Arc<NodeHandler> = Arc::new(handler);
        let sessions: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::default();

        let accept = {
            let address = address.clone();
            let sessions = sessions.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let session = tokio::spawn(serve(socket, address.clone(), handler.clone()));
                    lock(&sessions).push(session);
                }
            })
        };

        Self {
            address,
            accept,
            sessions,
        }
    }

    /// Address clients should connect to.
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Drops every open session; the listener keeps accepting.
    pub fn disconnect_all(&self) {
        for session in lock(&self.sessions).drain(..) {
            session.abort();
        }
    }
}

impl Drop for FakeNode {
    fn drop(&mut self) {
        self.accept.abort();
        self.disconnect_all();
    }
}

async fn serve(socket: tokio::net::TcpStream, me: NodeAddress, handler: Arc<NodeHandler>) {
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(write_half);

    while let Ok(frame) = reader.read_frame().await {
        let args: Vec<Bytes> = match frame {
            Frame::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Frame::BulkString(Some(b)) => Some(b),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        let reply = if args.is_empty() {
            Frame::Error(b"ERR empty command".to_vec())
        } else {
            handler(&me, &args)
        };
        if writer.write_frame(&reply).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_tracks_releases() {
        let recorder = Recorder::new();
        let node = NodeAddress::new("127.0.0.1", 7000);
        let conn = recorder.lease(&node);
        assert!(!recorder.all_released_once());
        drop(conn);
        assert!(recorder.all_released_once());
        assert_eq!(recorder.count(|e| matches!(e, Event::Released { .. })), 1);
    }

    #[test]
    fn test_recorder_leases_get_distinct_ids() {
        let recorder = Recorder::new();
        let node = NodeAddress::new("127.0.0.1", 7000);
        let first = recorder.lease(&node);
        let second = recorder.lease(&node);
        assert_ne!(first.id(), second.id());
        assert_eq!(second.node(), &node);

        let released = first.id();
        drop(first);
        assert!(recorder.events().contains(&Event::Released { node, id: released }));
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(30)).await;
        assert_eq!(clock.now() - start, Duration::from_millis(30));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(30)]);
    }

    #[tokio::test]
    async fn test_mock_provider_reroutes_on_general_renew() {
        let recorder = Recorder::new();
        let provider =
            MockProvider::new(recorder.clone()).reroute_on_renew(NodeAddress::new("127.0.0.1", 7001));
        provider.renew_slot_cache(None).await;
        assert_eq!(provider.owner(), NodeAddress::new("127.0.0.1", 7001));
        assert_eq!(recorder.events(), vec![Event::Renew(None)]);
    }

    #[tokio::test]
    async fn test_fake_node_answers() {
        let node = FakeNode::spawn(|_, args| Frame::bulk(args[0].clone())).await;
        let conn = crate::core::connection::connect(node.address(), Duration::from_secs(1))
            .await
            .unwrap();
        let reply = conn
            .send_command(Cmd::new("ECHO").into_frame())
            .await
            .unwrap();
        assert_eq!(reply, Frame::bulk("ECHO"));
    }
}
