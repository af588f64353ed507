//! Bounded poll-until-condition
//!
//! Cluster state converges asynchronously, so every observation in the
//! harness is a poll. A condition error counts as "not ready yet": transient
//! CLI or API failures must not end a wait early.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::common::Result;

/// Outcome of a poll that never saw its condition hold
#[derive(Debug, Clone)]
pub struct WaitTimeout {
    pub elapsed: Duration,
    pub attempts: u32,
    /// Message of the most recent condition error, if the last attempts failed
    pub last_error: Option<String>,
}

impl std::fmt::Display for WaitTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "timed out after {:.1}s ({} attempts)",
            self.elapsed.as_secs_f64(),
            self.attempts
        )?;
        if let Some(err) = &self.last_error {
            write!(f, ", last error: {}", err)?;
        }
        Ok(())
    }
}

/// Stand-in deadline for timeouts too large to add to the current instant
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Evaluate `condition` until it returns `Ok(true)` or `timeout` elapses
///
/// The first evaluation runs immediately, later ones every `interval`. No
/// evaluation starts after the deadline, and none runs after success. Each
/// evaluation is itself bounded by the time left, so a hung CLI call counts
/// as a failed attempt rather than blocking past the deadline.
pub async fn poll<F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> std::result::Result<(), WaitTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let deadline = start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE);
    let mut attempts = 0u32;
    let mut last_error: Option<String>;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, condition()).await {
            Ok(Ok(true)) => {
                tracing::trace!(attempts, "poll condition met");
                return Ok(());
            }
            Ok(Ok(false)) => last_error = None,
            Ok(Err(e)) => {
                tracing::trace!(attempts, error = %e, "poll condition errored, retrying");
                last_error = Some(e.to_string());
            }
            Err(_) => {
                tracing::debug!(attempts, "poll condition did not finish before the deadline");
                last_error = Some(format!(
                    "evaluation did not finish within {:.1}s",
                    remaining.as_secs_f64()
                ));
            }
        }

        let now = Instant::now();
        let next = now.checked_add(interval);
        if next.map_or(true, |next| next > deadline) {
            return Err(WaitTimeout {
                elapsed: now - start,
                attempts,
                last_error,
            });
        }
        tokio::time::sleep(interval).await;
    }
}
