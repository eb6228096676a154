//! # Slotwise
//!
//! Redis Cluster command execution with slot routing, `MOVED`/`ASK`
//! redirects, bounded retries and slot cache renewal.
//!
//! The retry loop in [`ClusterExecutor`] is written against small traits
//! ([`ConnectionProvider`], [`Transport`], [`CommandClassifier`], [`Clock`])
//! so it can drive real nodes through [`ClusterClient`] or run against
//! in-memory doubles.
//!
//! ## Features
//!
//! - `test-utils` - Exposes the [`testing`] doubles outside this crate
//!
//! ## Example
//!
//! ```no_run
//! use slotwise::{key_slot, ClusterClient, Cmd};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     assert_eq!(key_slot("foo"), 12182);
//!
//!     let client = ClusterClient::connect("127.0.0.1:7000").await?;
//!     client.set("foo", "bar").await?;
//!     let reply = client.execute(&Cmd::new("GET").key("foo")).await?;
//!     println!("{:?}", reply);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod cluster;
pub mod core;
pub mod proto;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use crate::cluster::{
    key_slot, Clock, ClusterClient, ClusterClientBuilder, ClusterConfig, ClusterExecutor,
    CommandClassifier, ConnectionProvider, NodeAddress, RoutingKey, Transport,
};
pub use crate::core::{Cmd, Error, Result};
pub use crate::proto::frame::Frame;
