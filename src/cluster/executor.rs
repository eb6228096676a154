//! The retry and redirect loop.
//!
//! One call runs until the command succeeds or a terminal error fires:
//! attempts are bounded by `max_attempts`, wall time by
//! `max_total_retries_duration`. Connection failures count toward a renewal
//! threshold; `MOVED` renews the slot cache and redirects, `ASK` only
//! redirects. Any other error is returned as is.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::address::NodeAddress;
use super::classifier::{CommandClassifier, StaticCommandClassifier};
use super::clock::{backoff_delay, Clock, TokioClock};
use super::commands::asking;
use super::provider::{ConnectionProvider, NodePool, Transport};
use super::round_robin::RoundRobinCursor;
use super::slot::RoutingKey;
use crate::core::command::Cmd;
use crate::proto::frame::Frame;
use crate::{Error, Result};

const NO_ATTEMPTS_LEFT: &str = "No more cluster attempts left.";
const DEADLINE_EXCEEDED: &str = "Cluster retry deadline exceeded.";
const NO_NODES: &str = "No cluster nodes available.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedirectMode {
    Moved,
    Ask,
}

#[derive(Debug, Clone)]
struct RedirectHint {
    target: NodeAddress,
    mode: RedirectMode,
}

impl RedirectHint {
    fn from_error(err: &Error) -> Option<Self> {
        match err {
            Error::Moved { address, .. } => Some(Self {
                target: address.clone(),
                mode: RedirectMode::Moved,
            }),
            Error::Ask { address, .. } => Some(Self {
                target: address.clone(),
                mode: RedirectMode::Ask,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Route {
    Primary,
    Replica,
}

/// Per-call bookkeeping.
struct RetryState {
    deadline: Instant,
    consecutive_failures: u32,
    last_error: Option<Error>,
}

impl RetryState {
    fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    fn record_connection_failure(&mut self, err: Error) {
        self.consecutive_failures += 1;
        self.last_error = Some(err);
    }

    /// A redirect never hides an earlier connection failure.
    fn record_redirect(&mut self, err: Error) {
        self.consecutive_failures = 0;
        if self.last_error.as_ref().map_or(true, Error::is_redirect) {
            self.last_error = Some(err);
        }
    }

    fn check_deadline(&mut self, now: Instant) -> Result<()> {
        if now >= self.deadline {
            return Err(self.deadline_exceeded());
        }
        Ok(())
    }

    fn deadline_exceeded(&mut self) -> Error {
        Error::cluster_operation_caused_by(DEADLINE_EXCEEDED, self.last_error.take())
    }

    fn exhausted(self) -> Error {
        Error::cluster_operation_caused_by(NO_ATTEMPTS_LEFT, self.last_error)
    }
}

/// Runs commands against a cluster with bounded retries.
///
/// The executor is generic over its collaborators: the connection provider
/// `P`, the wire transport `T`, the read-only classifier `C` and the clock
/// `K`. Only the round-robin cursor is shared between concurrent calls.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> slotwise::Result<()> {
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use slotwise::cluster::{ClusterConnectionProvider, PoolConfig, RespTransport};
/// use slotwise::{ClusterExecutor, Cmd, NodeAddress};
///
/// let seeds = vec![NodeAddress::parse("127.0.0.1:7000")?];
/// let provider = Arc::new(ClusterConnectionProvider::connect(seeds, PoolConfig::default()).await?);
/// let executor = ClusterExecutor::new(provider, RespTransport, 5, Duration::from_secs(10))?;
///
/// let reply = executor.execute_command(&Cmd::new("GET").key("foo")).await?;
/// # let _ = reply;
/// # Ok(())
/// # }
/// ```
pub struct ClusterExecutor<P, T, C = StaticCommandClassifier, K = TokioClock> {
    provider: Arc<P>,
    transport: T,
    classifier: C,
    clock: K,
    max_attempts: u32,
    max_total_retries_duration: Duration,
    renewal_threshold: u32,
    cursor: RoundRobinCursor,
}

impl<P, T> ClusterExecutor<P, T>
where
    P: ConnectionProvider,
    T: Transport<P::Connection>,
{
    /// Creates an executor with the static classifier, the tokio clock and a
    /// renewal threshold of 2.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `max_attempts` is zero.
    pub fn new(
        provider: Arc<P>,
        transport: T,
        max_attempts: u32,
        max_total_retries_duration: Duration,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::InvalidArgument {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        Ok(Self {
            provider,
            transport,
            classifier: StaticCommandClassifier,
            clock: TokioClock,
            max_attempts,
            max_total_retries_duration,
            renewal_threshold: 2,
            cursor: RoundRobinCursor::new(),
        })
    }
}

impl<P, T, C, K> ClusterExecutor<P, T, C, K> {
    /// Replaces the read-only classifier.
    pub fn with_classifier<C2: CommandClassifier>(self, classifier: C2) -> ClusterExecutor<P, T, C2, K> {
        ClusterExecutor {
            provider: self.provider,
            transport: self.transport,
            classifier,
            clock: self.clock,
            max_attempts: self.max_attempts,
            max_total_retries_duration: self.max_total_retries_duration,
            renewal_threshold: self.renewal_threshold,
            cursor: self.cursor,
        }
    }

    /// Replaces the clock.
    pub fn with_clock<K2: Clock>(self, clock: K2) -> ClusterExecutor<P, T, C, K2> {
        ClusterExecutor {
            provider: self.provider,
            transport: self.transport,
            classifier: self.classifier,
            clock,
            max_attempts: self.max_attempts,
            max_total_retries_duration: self.max_total_retries_duration,
            renewal_threshold: self.renewal_threshold,
            cursor: self.cursor,
        }
    }

    /// Sets how many consecutive connection failures trigger a renewal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `threshold` is zero.
    pub fn with_renewal_threshold(mut self, threshold: u32) -> Result<Self> {
        if threshold == 0 {
            return Err(Error::InvalidArgument {
                message: "renewal_threshold must be at least 1".to_string(),
            });
        }
        self.renewal_threshold = threshold;
        Ok(self)
    }

    /// The connection provider.
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Attempts allowed per call.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wall-clock budget per call.
    pub fn max_total_retries_duration(&self) -> Duration {
        self.max_total_retries_duration
    }
}

impl<P, T, C, K> ClusterExecutor<P, T, C, K>
where
    P: ConnectionProvider,
    T: Transport<P::Connection>,
    C: CommandClassifier,
    K: Clock,
{
    /// Runs a keyed command on the primary owning its slot.
    ///
    /// Commands without keys go to any reachable node the provider picks.
    ///
    /// # Errors
    ///
    /// - [`Error::CrossSlot`] if the keys span several slots.
    /// - [`Error::ClusterOperation`] when attempts or time run out, or when
    ///   the provider reports the cluster unusable.
    /// - Any non-retryable error from the transport, unchanged.
    pub async fn execute_command(&self, cmd: &Cmd) -> Result<Frame> {
        self.run_keyed(cmd, Route::Primary).await
    }

    /// Like [`execute_command`](Self::execute_command), but unredirected
    /// attempts go to a replica of the slot.
    pub async fn execute_command_to_replica(&self, cmd: &Cmd) -> Result<Frame> {
        self.run_keyed(cmd, Route::Replica).await
    }

    async fn run_keyed(&self, cmd: &Cmd, route: Route) -> Result<Frame> {
        let key = cmd.routing_key()?;
        let mut retry = RetryState::new(self.clock.now() + self.max_total_retries_duration);
        let mut redirect: Option<RedirectHint> = None;

        for attempts_left in (0..self.max_attempts).rev() {
            let (connection, result) = self.keyed_attempt(cmd, key, route, redirect.as_ref()).await;
            let err = match result {
                Ok(reply) => return Ok(reply),
                Err(err) => err,
            };

            if err.is_connection_failure() {
                drop(connection);
                debug!(error = %err, attempts_left, "connection failure");
                retry.record_connection_failure(err);
                if self.handle_connection_problem(&mut retry, attempts_left).await? {
                    redirect = None;
                }
            } else if let Some(hint) = RedirectHint::from_error(&err) {
                debug!(node = %hint.target, mode = ?hint.mode, attempts_left, "redirected");
                if hint.mode == RedirectMode::Moved {
                    self.provider.renew_slot_cache(connection.as_ref()).await;
                }
                drop(connection);
                retry.record_redirect(err);
                redirect = Some(hint);
            } else {
                return Err(err);
            }

            retry.check_deadline(self.clock.now())?;
        }

        Err(retry.exhausted())
    }

    /// Resolves a connection and runs one attempt on it.
    ///
    /// The connection is handed back so the caller can use it as a renewal
    /// hint before dropping it.
    async fn keyed_attempt(
        &self,
        cmd: &Cmd,
        key: RoutingKey,
        route: Route,
        redirect: Option<&RedirectHint>,
    ) -> (Option<P::Connection>, Result<Frame>) {
        let resolved = match (redirect, route) {
            (Some(hint), _) => self.provider.get_connection_to(&hint.target).await,
            (None, Route::Primary) => self.provider.get_connection(key).await,
            (None, Route::Replica) => self.provider.get_replica_connection(key).await,
        };
        let mut connection = match resolved {
            Ok(connection) => connection,
            Err(err) => return (None, Err(err)),
        };

        if let Some(RedirectHint {
            mode: RedirectMode::Ask,
            ..
        }) = redirect
        {
            if let Err(err) = self.transport.execute(&mut connection, &asking()).await {
                return (Some(connection), Err(err));
            }
        }

        let result = self.transport.execute(&mut connection, cmd).await;
        (Some(connection), result)
    }

    /// Runs a command without keys on nodes picked round robin.
    ///
    /// Read-only commands may land on any node, others only on primaries.
    /// Redirect replies are not followed; the next attempt simply moves on
    /// to the next node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClusterOperation`] with "No cluster nodes available."
    /// when the candidate node map is empty, and otherwise fails like
    /// [`execute_command`](Self::execute_command).
    pub async fn execute_keyless_command(&self, cmd: &Cmd) -> Result<Frame> {
        let read_only = self.classifier.is_read_only(cmd);
        let mut retry = RetryState::new(self.clock.now() + self.max_total_retries_duration);

        for attempts_left in (0..self.max_attempts).rev() {
            let (connection, result) = self.keyless_attempt(cmd, read_only).await;
            drop(connection);
            let err = match result {
                Ok(reply) => return Ok(reply),
                Err(err) => err,
            };

            if err.is_connection_failure() {
                debug!(error = %err, attempts_left, "connection failure on keyless command");
                retry.record_connection_failure(err);
                self.handle_connection_problem(&mut retry, attempts_left).await?;
            } else if err.is_redirect() {
                debug!(error = %err, "ignoring redirect for keyless command");
                retry.record_redirect(err);
            } else {
                return Err(err);
            }

            retry.check_deadline(self.clock.now())?;
        }

        Err(retry.exhausted())
    }

    async fn keyless_attempt(&self, cmd: &Cmd, read_only: bool) -> (Option<P::Connection>, Result<Frame>) {
        let nodes = if read_only {
            self.provider.connection_map().await
        } else {
            self.provider.primary_nodes_connection_map().await
        };
        let nodes = match nodes {
            Ok(nodes) if nodes.is_empty() => return (None, Err(Error::cluster_operation(NO_NODES))),
            Ok(nodes) => nodes,
            Err(err) => return (None, Err(err)),
        };

        let idx = self.cursor.next(nodes.len());
        let Some(pool) = nodes.values().nth(idx) else {
            return (None, Err(Error::cluster_operation(NO_NODES)));
        };

        let mut connection = match pool.get_resource().await {
            Ok(connection) => connection,
            Err(err) => return (None, Err(err)),
        };
        let result = self.transport.execute(&mut connection, cmd).await;
        (Some(connection), result)
    }

    /// Sends `cmd` once to every primary.
    ///
    /// Succeeds only if every primary answered and all replies are equal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Broadcast`] listing each node's outcome when a node
    /// failed or the replies differ.
    pub async fn broadcast_command(&self, cmd: &Cmd) -> Result<Frame> {
        let nodes = self.provider.primary_nodes_connection_map().await?;
        if nodes.is_empty() {
            return Err(Error::cluster_operation(NO_NODES));
        }

        let mut replies = Vec::with_capacity(nodes.len());
        let mut agreed: Option<Frame> = None;
        let mut failed = false;

        for (node, pool) in nodes {
            let outcome = match pool.get_resource().await {
                Ok(mut connection) => self.transport.execute(&mut connection, cmd).await,
                Err(err) => Err(err),
            };
            match &outcome {
                Ok(_) if failed => {}
                Ok(reply) => match &agreed {
                    None => agreed = Some(reply.clone()),
                    Some(prev) if prev == reply => {}
                    Some(_) => failed = true,
                },
                Err(err) => {
                    debug!(node = %node, error = %err, "broadcast failed on node");
                    failed = true;
                }
            }
            replies.push((node, outcome));
        }

        match agreed {
            Some(reply) if !failed => Ok(reply),
            _ => Err(Error::Broadcast { replies }),
        }
    }

    /// Decides whether a connection failure triggers a cache renewal.
    ///
    /// Returns true when the cache was renewed, in which case the failure
    /// counter is reset and the caller drops any pending redirect.
    async fn handle_connection_problem(&self, retry: &mut RetryState, attempts_left: u32) -> Result<bool> {
        if self.max_attempts <= self.renewal_threshold {
            // The threshold can never be reached with this budget, so renew
            // once the last attempt has failed.
            if attempts_left == 0 {
                self.renew(retry).await;
                return Ok(true);
            }
            return Ok(false);
        }

        if retry.consecutive_failures < self.renewal_threshold {
            return Ok(false);
        }

        let delay = backoff_delay(attempts_left, retry.deadline, self.clock.now())
            .ok_or_else(|| retry.deadline_exceeded())?;
        debug!(?delay, "backing off before slot cache renewal");
        self.clock.sleep(delay).await;
        self.renew(retry).await;
        Ok(true)
    }

    async fn renew(&self, retry: &mut RetryState) {
        self.provider.renew_slot_cache(None).await;
        retry.consecutive_failures = 0;
    }
}
