use std::time::Duration;

use super::pool::PoolConfig;
use crate::{Error, Result};

/// Settings for a cluster client.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClusterConfig {
    /// Attempts per command, redirects included. Must be at least 1.
    pub max_attempts: u32,
    /// Wall-clock budget for all attempts of one command.
    pub max_total_retries_duration: Duration,
    /// Consecutive connection failures that trigger a topology renewal.
    pub renewal_threshold: u32,
    /// Period of background topology refreshes; `None` disables them.
    pub topology_refresh_period: Option<Duration>,
    /// Per-node pool settings.
    pub pool: PoolConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_total_retries_duration: Duration::from_secs(10),
            renewal_threshold: 2,
            topology_refresh_period: None,
            pool: PoolConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Checks the settings for values the executor cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `max_attempts` or
    /// `renewal_threshold` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidArgument {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        if self.renewal_threshold == 0 {
            return Err(Error::InvalidArgument {
                message: "renewal_threshold must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
