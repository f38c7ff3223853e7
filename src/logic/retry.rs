use log::{debug, warn};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on the whole retry loop, delays included
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("timed out after {attempts} attempts")]
    TimedOut { attempts: u32 },

    #[error("cancelled")]
    Cancelled,
}

/// Run `op` until it succeeds, the policy is exhausted, the timeout hits or
/// `cancel` is raised. `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &AtomicBool,
    what: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let run = async {
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(RetryError::Cancelled);
            }
            attempts += 1;
            match op(attempts).await {
                Ok(value) => return Ok(value),
                Err(e) if attempts >= policy.max_attempts => {
                    warn!("{} failed after {} attempts: {}", what, attempts, e);
                    return Err(RetryError::Exhausted { attempts, last: e });
                }
                Err(e) => {
                    let delay = policy.delay_after(attempts);
                    debug!("{} attempt {} failed ({}), retrying in {:?}", what, attempts, e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    };
    let outcome = tokio::time::timeout(policy.timeout, run).await;
    match outcome {
        Ok(res) => res,
        Err(_) => {
            warn!("{} timed out after {:?}", what, policy.timeout);
            Err(RetryError::TimedOut { attempts })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let cancel = AtomicBool::new(false);
        let res: Result<u32, RetryError<String>> = retry(fast(5), &cancel, "probe", |attempt| async move {
            if attempt < 3 {
                Err(format!("not yet ({})", attempt))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(res, Ok(3));
    }

    #[tokio::test]
    async fn test_gives_up() {
        let cancel = AtomicBool::new(false);
        let res: Result<(), RetryError<String>> =
            retry(fast(3), &cancel, "probe", |_| async { Err("down".to_string()) }).await;
        assert_eq!(
            res,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: "down".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = AtomicBool::new(true);
        let res: Result<(), RetryError<String>> =
            retry(fast(3), &cancel, "probe", |_| async { Ok(()) }).await;
        assert_eq!(res, Err(RetryError::Cancelled));
    }

    #[tokio::test]
    async fn test_timeout() {
        let cancel = AtomicBool::new(false);
        let policy = RetryPolicy {
            max_attempts: 1000,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(20),
            timeout: Duration::from_millis(50),
        };
        let res: Result<(), RetryError<String>> =
            retry(policy, &cancel, "probe", |_| async { Err("down".to_string()) }).await;
        assert!(matches!(res, Err(RetryError::TimedOut { .. })));
    }
}
