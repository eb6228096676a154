use std::time::Duration;

use super::address::NodeAddress;
use super::client::{parse_seeds, ClusterClient};
use super::config::ClusterConfig;
use crate::{Error, Result};

/// Builder for configuring and creating a [`ClusterClient`].
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use slotwise::ClusterClient;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClusterClient::builder()
///     .seeds("127.0.0.1:7000,127.0.0.1:7001")
///     .max_attempts(5)
///     .max_total_retries_duration(Duration::from_secs(2))
///     .topology_refresh_period(Duration::from_secs(30))
///     .build()
///     .await?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClusterClientBuilder {
    seeds: Vec<String>,
    config: ClusterConfig,
}

impl ClusterClientBuilder {
    /// Creates a builder with default settings and no seeds.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds seeds from a comma-separated address list.
    ///
    /// # Arguments
    ///
    /// * `addresses` - e.g. `redis://127.0.0.1:7000,127.0.0.1:7001`
    #[inline]
    pub fn seeds(mut self, addresses: &str) -> Self {
        self.seeds.push(addresses.to_string());
        self
    }

    /// Adds one seed node.
    #[inline]
    pub fn seed(mut self, address: &NodeAddress) -> Self {
        self.seeds.push(address.to_string());
        self
    }

    /// Sets the attempts per command, redirects included.
    #[inline]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Sets the wall-clock budget for all attempts of one command.
    #[inline]
    pub fn max_total_retries_duration(mut self, duration: Duration) -> Self {
        self.config.max_total_retries_duration = duration;
        self
    }

    /// Sets how many consecutive connection failures trigger a renewal.
    #[inline]
    pub fn renewal_threshold(mut self, threshold: u32) -> Self {
        self.config.renewal_threshold = threshold;
        self
    }

    /// Enables periodic topology refreshes.
    #[inline]
    pub fn topology_refresh_period(mut self, period: Duration) -> Self {
        self.config.topology_refresh_period = Some(period);
        self
    }

    /// Sets the idle connections kept per node.
    #[inline]
    pub fn max_idle_per_node(mut self, max: usize) -> Self {
        self.config.pool.max_idle_per_node = max;
        self
    }

    /// Sets the TCP connect timeout.
    #[inline]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool.connect_timeout = timeout;
        self
    }

    /// Replaces every setting at once.
    #[inline]
    pub fn config(mut self, config: ClusterConfig) -> Self {
        self.config = config;
        self
    }

    /// Connects and discovers the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no seed is set, a seed fails to
    /// parse, or a setting is out of range. Returns
    /// [`Error::ClusterOperation`] if discovery fails on every seed.
    pub async fn build(self) -> Result<ClusterClient> {
        if self.seeds.is_empty() {
            return Err(Error::InvalidArgument {
                message: "at least one seed is required".to_string(),
            });
        }
        let seeds = parse_seeds(&self.seeds.join(","))?;
        ClusterClient::with_config(seeds, self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = ClusterClientBuilder::new();
        assert!(builder.seeds.is_empty());
        assert_eq!(builder.config.max_attempts, 5);
        assert_eq!(builder.config.renewal_threshold, 2);
    }

    #[test]
    fn test_builder_sets_fields() {
        let builder = ClusterClientBuilder::new()
            .seeds("127.0.0.1:7000")
            .seed(&NodeAddress::new("127.0.0.1", 7001))
            .max_attempts(3)
            .max_total_retries_duration(Duration::from_millis(500))
            .renewal_threshold(4)
            .topology_refresh_period(Duration::from_secs(30))
            .max_idle_per_node(2)
            .connect_timeout(Duration::from_millis(100));

        assert_eq!(builder.seeds, vec!["127.0.0.1:7000", "127.0.0.1:7001"]);
        assert_eq!(builder.config.max_attempts, 3);
        assert_eq!(
            builder.config.max_total_retries_duration,
            Duration::from_millis(500)
        );
        assert_eq!(builder.config.renewal_threshold, 4);
        assert_eq!(
            builder.config.topology_refresh_period,
            Some(Duration::from_secs(30))
        );
        assert_eq!(builder.config.pool.max_idle_per_node, 2);
        assert_eq!(builder.config.pool.connect_timeout, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_build_without_seeds() {
        let err = ClusterClientBuilder::new().build().await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_build_rejects_zero_threshold() {
        let err = ClusterClientBuilder::new()
            .seeds("127.0.0.1:7000")
            .renewal_threshold(0)
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
