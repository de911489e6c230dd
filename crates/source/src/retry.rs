use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

/// Bounded retry with a multiplicative delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub attempts: u32,
    pub initial: Duration,
    pub factor: u32,
}

impl Default for Backoff {
    fn default() -> Self { Self::doubling(3, Duration::from_secs(1)) }
}

impl Backoff {
    pub const fn doubling(attempts: u32, initial: Duration) -> Self { Self { attempts, initial, factor: 2 } }

    /// Delay slept after failed attempt `n` (0-based).
    pub fn delay(&self, n: u32) -> Duration { self.initial.saturating_mul(self.factor.saturating_pow(n)) }

    /// Run `op` until it succeeds or the attempts run out; the last error is returned.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut n = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if n + 1 >= attempts => return Err(e.context(format!("{what}: gave up after {attempts} attempts"))),
                Err(e) => {
                    let wait = self.delay(n);
                    warn!(what, attempt = n + 1, wait_ms = wait.as_millis() as u64, error = %e, "retry: attempt failed");
                    tokio::time::sleep(wait).await;
                    n += 1;
                }
            }
        }
    }
}
