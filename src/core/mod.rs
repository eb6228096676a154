//! # Core
//!
//! Connection plumbing shared by every cluster node: command builders, the
//! framed read/write halves and the multiplexed connection handle.
//!
//! ## Modules
//!
//! - [`command`] - Command type and builders
//! - [`connection`] - Framed IO and TCP connect
//! - [`multiplexed`] - Multiplexed connection for concurrent requests

#![warn(missing_docs)]

pub use crate::proto::error::{Error, Result};

/// Command construction helpers.
pub mod command;
/// Low-level connection management.
pub mod connection;
/// Multiplexing logic.
pub mod multiplexed;

pub use command::Cmd;
pub use multiplexed::MultiplexedConnection;
