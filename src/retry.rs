//! Bounded retry for transient meter errors

use crate::config::ControlsConfig;
use crate::error::Result;
use crate::logging::StructuredLogger;
use std::future::Future;
use tokio::time::{Duration, sleep};

/// Fixed attempt count with a constant delay between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(controls: &ControlsConfig) -> Self {
        Self {
            attempts: controls.meter_retry_attempts.max(1),
            delay: Duration::from_millis(controls.meter_retry_delay_ms),
        }
    }

    /// Run `operation` until it succeeds or attempts are exhausted; the last
    /// error is returned.
    pub async fn run<F, Fut, T>(&self, logger: &StructuredLogger, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.attempts {
                        return Err(e);
                    }
                    logger.debug(&format!("Attempt {} failed: {}", attempts, e));
                    if !self.delay.is_zero() {
                        sleep(self.delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeliosError;
    use crate::logging::get_logger;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::ZERO,
        };
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let res = policy
            .run(&get_logger("test"), move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(HeliosError::meter("timeout"))
                } else {
                    Ok(1500.0)
                }
            })
            .await;
        assert_eq!(res.unwrap(), 1500.0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn returns_last_error_when_exhausted() {
        let policy = RetryPolicy {
            attempts: 2,
            delay: Duration::ZERO,
        };
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let res: Result<f64> = policy
            .run(&get_logger("test"), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(HeliosError::meter("offline"))
            })
            .await;
        assert!(matches!(res, Err(HeliosError::Meter { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
