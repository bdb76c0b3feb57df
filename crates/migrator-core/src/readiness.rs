//! What happens before the first real connection to the database.

use std::{future::Future, time::Duration};

use crate::error::DependencyTimeout;

pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupGate {
    /// Connect straight away.
    None,

    /// Sleep for a fixed time. Not a readiness check: nothing verifies the database is up.
    FixedDelay(Duration),

    /// Ping the database until it answers, with exponential backoff.
    Probe(ProbePolicy),
}

impl Default for StartupGate {
    fn default() -> Self {
        StartupGate::FixedDelay(DEFAULT_STARTUP_DELAY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl ProbePolicy {
    /// Sleep after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

/// Sleep for `delay`.
///
/// No signal handler is installed, so SIGINT keeps its default action and ends the process
/// during the wait as at any other point of the run.
pub async fn fixed_delay(delay: Duration) {
    tokio::time::sleep(delay).await;
}

/// Call `probe` until it succeeds or `policy.max_attempts` is used up.
///
/// Returns the number of attempts it took.
pub async fn wait_until_ready<F, Fut>(
    policy: &ProbePolicy,
    mut probe: F,
) -> Result<u32, DependencyTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), sqlx::Error>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match probe().await {
            Ok(()) => return Ok(attempt),
            Err(err) if attempt >= max_attempts => {
                return Err(DependencyTimeout {
                    attempts: attempt,
                    last_error: err,
                });
            }
            Err(err) => {
                let backoff = policy.backoff_for(attempt);
                tracing::debug!(
                    attempt,
                    max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "database not ready"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
