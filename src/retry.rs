use std::{fmt::Display, future::Future};

use tokio::time;
use tracing::warn;

use crate::config::RetryPolicy;

/// Runs `attempt` once plus up to `policy.attempts` retries, sleeping
/// `policy.delay` between tries. Returns `None` when every try failed so the
/// caller can switch to its degraded path.
pub async fn with_bounded_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut attempt: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut remaining = policy.attempts;
    loop {
        match attempt().await {
            Ok(value) => return Some(value),
            Err(err) if remaining > 0 => {
                warn!(%what, error = %err, remaining, "not ready, retrying");
                remaining -= 1;
                time::sleep(policy.delay).await;
            }
            Err(err) => {
                warn!(%what, error = %err, "still unavailable after retries, falling back");
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, time::Duration};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let tries = Cell::new(0);
        let start = time::Instant::now();
        let result = with_bounded_retry(policy(), "speech", || {
            tries.set(tries.get() + 1);
            let n = tries.get();
            async move {
                if n < 3 {
                    Err("warming up")
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Some(3));
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_configured_retries() {
        let tries = Cell::new(0);
        let result: Option<()> = with_bounded_retry(policy(), "speech", || {
            tries.set(tries.get() + 1);
            async { Err("unavailable") }
        })
        .await;
        assert_eq!(result, None);
        assert_eq!(tries.get(), 4);
    }
}
