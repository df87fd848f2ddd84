//! Exponential backoff for reaching dependencies at startup

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::warn;

/// Retry schedule: the delay starts at `initial` and grows by `multiplier`
/// up to `max_interval`; no new attempt starts once `max_elapsed` would be
/// exceeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub max_elapsed: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Default schedule bounded by `max_elapsed`
    pub fn with_max_elapsed(max_elapsed: Duration) -> Self {
        Self {
            max_elapsed,
            ..Self::default()
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier.max(1.0)).min(self.max_interval)
    }

    /// Run `op` until it succeeds or the time budget is spent, returning the
    /// last error in the latter case
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        let mut delay = self.initial;
        let mut attempt = 1u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if start.elapsed() + delay > self.max_elapsed {
                        return Err(e);
                    }
                    warn!(
                        "{} failed (attempt {}): {}. Retrying in {:?}",
                        what, attempt, e, delay
                    );
                    sleep(delay).await;
                    delay = self.next_delay(delay);
                    attempt += 1;
                }
            }
        }
    }
}
