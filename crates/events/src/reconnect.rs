//! Exponential-backoff retry for broker connections and subscriptions.
//!
//! When a connection or consumer channel drops, callers use
//! [`retry_with_backoff`] to keep retrying with increasing delays until the
//! operation succeeds or the [`CancellationToken`] is triggered.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Backoff schedule for broker reconnects and consumer re-subscriptions.
///
/// Delays start at `initial_delay` and grow by `multiplier` per failed
/// attempt, never exceeding `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait after a failed attempt that followed `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier.max(1.0)).min(self.max_delay)
    }

    /// Iterator over the delays of successive failed attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::successors(Some(self.initial_delay.min(self.max_delay)), |d| {
            Some(self.next_delay(*d))
        })
    }
}

/// Run `attempt` until it succeeds, sleeping with exponential backoff in
/// between.
///
/// Returns `Some(value)` on success, or `None` if `cancel` is triggered
/// first. `what` names the operation in log lines.
pub async fn retry_with_backoff<T, E, F, Fut>(
    what: &str,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Option<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = config.initial_delay;
    let mut tries = 0u32;

    loop {
        tries += 1;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(what, "Retry cancelled");
                return None;
            }
            result = attempt() => {
                match result {
                    Ok(value) => {
                        if tries > 1 {
                            tracing::info!(what, attempt = tries, "Recovered after retry");
                        }
                        return Some(value);
                    }
                    Err(e) => {
                        tracing::warn!(
                            what,
                            attempt = tries,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Attempt failed, backing off",
                        );
                    }
                }
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = config.next_delay(delay);
    }
}
