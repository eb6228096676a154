use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;

/// Time source and sleeper used by the retry loop.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[async_trait]
impl<K: Clock + ?Sized> Clock for Arc<K> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await;
    }
}

/// Picks the pause before a topology renewal.
///
/// The delay is uniform in `[0, time_left / attempts_left²]`, so the
/// remaining attempts still fit before `deadline`. Returns zero when no
/// attempts are left and `None` when the deadline has already passed.
pub fn backoff_delay(attempts_left: u32, deadline: Instant, now: Instant) -> Option<Duration> {
    if attempts_left == 0 {
        return Some(Duration::ZERO);
    }
    let left = deadline.checked_duration_since(now)?;
    let attempts = u128::from(attempts_left);
    let max = u64::try_from(left.as_millis() / (attempts * attempts)).unwrap_or(u64::MAX);
    Some(Duration::from_millis(rand::rng().random_range(0..=max)))
}
