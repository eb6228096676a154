//! # Cluster
//!
//! Redis Cluster routing with bounded retries, redirect handling and slot
//! cache renewal.
//!
//! ## Layout
//!
//! - [`ClusterExecutor`] runs the retry loop. It depends only on the
//!   [`ConnectionProvider`], [`Transport`], [`CommandClassifier`] and
//!   [`Clock`] traits.
//! - [`ClusterConnectionProvider`], [`ConnectionPool`] and [`RespTransport`]
//!   implement those traits over TCP.
//! - [`ClusterClient`] ties everything together behind typed helpers.
//!
//! ## Example
//!
//! ```no_run
//! # async fn example() -> slotwise::Result<()> {
//! use slotwise::ClusterClient;
//!
//! let client = ClusterClient::connect("127.0.0.1:7000,127.0.0.1:7001").await?;
//! client.set("{user1}:name", "ada").await?;
//! let name = client.get("{user1}:name").await?;
//! # let _ = name;
//! # Ok(())
//! # }
//! ```

mod address;
mod builder;
mod classifier;
mod client;
mod clock;
pub mod commands;
mod config;
mod connection_provider;
mod errors;
mod executor;
mod pool;
mod provider;
mod round_robin;
mod slot;
mod topology;
mod transport;

pub use address::NodeAddress;
pub use builder::ClusterClientBuilder;
pub use classifier::{CommandClassifier, StaticCommandClassifier};
pub use client::{parse_seeds, ClusterClient};
pub use clock::{backoff_delay, Clock, TokioClock};
pub use config::ClusterConfig;
pub use connection_provider::ClusterConnectionProvider;
pub use errors::parse_redis_error;
pub use executor::ClusterExecutor;
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use provider::{ConnectionProvider, NodeMap, NodePool, Transport};
pub use round_robin::RoundRobinCursor;
pub use slot::{key_slot, RoutingKey, SLOT_COUNT};
pub use topology::{ClusterTopology, SlotRange};
pub use transport::RespTransport;
