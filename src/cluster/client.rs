//! High-level cluster client.
//!
//! Wires the live provider, the RESP transport and the executor together
//! and exposes typed helpers for common commands.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use super::address::NodeAddress;
use super::builder::ClusterClientBuilder;
use super::config::ClusterConfig;
use super::connection_provider::ClusterConnectionProvider;
use super::executor::ClusterExecutor;
use super::transport::RespTransport;
use crate::core::command::{self, frame_to_bytes, frame_to_int, Cmd};
use crate::proto::frame::Frame;
use crate::{Error, Result};

type Engine = ClusterExecutor<ClusterConnectionProvider, RespTransport>;

/// Redis Cluster client.
///
/// Routes every command to the node owning its slot and follows `MOVED`
/// and `ASK` redirects. Cloning is cheap; clones share pools and the slot
/// table.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> slotwise::Result<()> {
/// use slotwise::ClusterClient;
///
/// let client = ClusterClient::connect("127.0.0.1:7000,127.0.0.1:7001").await?;
/// client.set("foo", "bar").await?;
/// assert_eq!(client.get("foo").await?.as_deref(), Some(&b"bar"[..]));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ClusterClient {
    executor: Arc<Engine>,
}

impl ClusterClient {
    /// Connects with default settings.
    ///
    /// `addresses` is a comma-separated seed list, e.g.
    /// `"redis://127.0.0.1:7000,127.0.0.1:7001"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty or malformed seed list
    /// and [`Error::ClusterOperation`] if no seed yields a slot table.
    pub async fn connect(addresses: &str) -> Result<Self> {
        Self::with_config(parse_seeds(addresses)?, ClusterConfig::default()).await
    }

    /// Returns a builder for custom settings.
    pub fn builder() -> ClusterClientBuilder {
        ClusterClientBuilder::new()
    }

    /// Connects to `seeds` using `config`.
    ///
    /// Starts the background topology refresh when
    /// `config.topology_refresh_period` is set. The refresh task stops once
    /// every clone of the client is gone.
    pub async fn with_config(seeds: Vec<NodeAddress>, config: ClusterConfig) -> Result<Self> {
        config.validate()?;

        let provider = Arc::new(ClusterConnectionProvider::connect(seeds, config.pool.clone()).await?);
        if let Some(period) = config.topology_refresh_period {
            debug!(?period, "starting periodic topology refresh");
            provider.spawn_refresh_task(period);
        }

        let executor = ClusterExecutor::new(
            provider,
            RespTransport,
            config.max_attempts,
            config.max_total_retries_duration,
        )?
        .with_renewal_threshold(config.renewal_threshold)?;

        Ok(Self {
            executor: Arc::new(executor),
        })
    }

    /// The underlying executor.
    pub fn executor(&self) -> &ClusterExecutor<ClusterConnectionProvider, RespTransport> {
        &self.executor
    }

    /// Runs an arbitrary command.
    ///
    /// Commands with keys go to the slot owner; commands without keys are
    /// spread round robin.
    pub async fn execute(&self, cmd: &Cmd) -> Result<Frame> {
        if cmd.keys().next().is_none() {
            self.executor.execute_keyless_command(cmd).await
        } else {
            self.executor.execute_command(cmd).await
        }
    }

    /// Runs `cmd` on every primary and returns the common reply.
    pub async fn broadcast(&self, cmd: &Cmd) -> Result<Frame> {
        self.executor.broadcast_command(cmd).await
    }

    /// Number of nodes with an open pool.
    pub async fn node_count(&self) -> usize {
        self.executor.provider().node_count().await
    }

    /// Checks if the slot table covers all 16384 slots.
    pub async fn is_fully_covered(&self) -> bool {
        self.executor.provider().topology().await.is_fully_covered()
    }

    /// Re-reads the slot table now.
    ///
    /// # Errors
    ///
    /// Returns the discovery error when no node produced a slot table.
    pub async fn refresh_topology(&self) -> Result<()> {
        self.executor.provider().refresh(None).await
    }

    /// Sends `PING` to the next node in round-robin order, replicas included.
    pub async fn ping(&self) -> Result<Bytes> {
        let frame = self.executor.execute_keyless_command(&command::ping()).await?;
        frame_to_bytes(frame)?.ok_or_else(|| Error::Protocol {
            message: "unexpected null reply to PING".to_string(),
        })
    }

    /// Gets a string value.
    ///
    /// Returns `None` if the key does not exist.
    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        let frame = self.executor.execute_command(&command::get(key)).await?;
        frame_to_bytes(frame)
    }

    /// Gets a string value from a replica of the key's slot.
    ///
    /// Falls back to the primary when the slot has no replica. The value may
    /// lag behind the primary.
    pub async fn get_from_replica(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        let frame = self
            .executor
            .execute_command_to_replica(&command::get(key))
            .await?;
        frame_to_bytes(frame)
    }

    /// Sets a string value.
    pub async fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<()> {
        self.executor
            .execute_command(&command::set(key, value))
            .await?;
        Ok(())
    }

    /// Sets a string value with a time to live.
    pub async fn set_with_expiry(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        expiry: Duration,
    ) -> Result<()> {
        self.executor
            .execute_command(&command::set_with_expiry(key, value, expiry))
            .await?;
        Ok(())
    }

    /// Deletes a key.
    ///
    /// Returns 1 if the key was deleted, 0 if it did not exist.
    pub async fn del(&self, key: impl Into<Bytes>) -> Result<i64> {
        let frame = self.executor.execute_command(&command::del(key)).await?;
        frame_to_int(frame)
    }

    /// Checks if a key exists.
    pub async fn exists(&self, key: impl Into<Bytes>) -> Result<bool> {
        let frame = self
            .executor
            .execute_command(&command::exists([key]))
            .await?;
        Ok(frame_to_int(frame)? > 0)
    }

    /// Increments an integer value by one.
    pub async fn incr(&self, key: impl Into<Bytes>) -> Result<i64> {
        self.incr_by(key, 1).await
    }

    /// Increments an integer value by `amount`.
    pub async fn incr_by(&self, key: impl Into<Bytes>, amount: i64) -> Result<i64> {
        let frame = self
            .executor
            .execute_command(&command::incr_by(key, amount))
            .await?;
        frame_to_int(frame)
    }

    /// Removes every key on every primary.
    pub async fn flushall(&self) -> Result<()> {
        self.executor.broadcast_command(&command::flushall()).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("max_attempts", &self.executor.max_attempts())
            .field(
                "max_total_retries_duration",
                &self.executor.max_total_retries_duration(),
            )
            .finish()
    }
}

/// Parses a comma-separated seed list.
///
/// Blank entries are skipped; each address may carry a `redis://` scheme.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if no address is given or one fails
/// to parse.
pub fn parse_seeds(addresses: &str) -> Result<Vec<NodeAddress>> {
    let seeds = addresses
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(NodeAddress::parse)
        .collect::<Result<Vec<_>>>()?;

    if seeds.is_empty() {
        return Err(Error::InvalidArgument {
            message: "no valid addresses provided".to_string(),
        });
    }
    Ok(seeds)
}
