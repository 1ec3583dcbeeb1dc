//! One retry loop for both classifier paths.
//!
//! A policy is (max attempts, schedule). The schedule maps an error to the
//! backoff to apply before the next attempt; `None` marks the error terminal.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tokio_util::sync::CancellationToken;

use crate::error::ClassifyError;

/// `offset + unit * 2^attempt`, with `attempt` counted from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub unit: Duration,
    pub offset: Duration,
}

impl Backoff {
    pub const fn exponential(unit: Duration) -> Self {
        Self {
            unit,
            offset: Duration::ZERO,
        }
    }

    pub const fn with_offset(unit: Duration, offset: Duration) -> Self {
        Self { unit, offset }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.offset + self.unit.saturating_mul(factor)
    }
}

type Schedule = Box<dyn Fn(&ClassifyError) -> Option<Backoff> + Send + Sync>;

pub struct RetryPolicy {
    label: &'static str,
    max_attempts: u32,
    schedule: Schedule,
}

/// Why the loop stopped without a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    pub error: ClassifyError,
    pub attempts: u32,
    /// True when the error was retryable but attempts ran out.
    pub exhausted: bool,
}

impl RetryPolicy {
    pub fn new<F>(label: &'static str, max_attempts: u32, schedule: F) -> Self
    where
        F: Fn(&ClassifyError) -> Option<Backoff> + Send + Sync + 'static,
    {
        Self {
            label,
            max_attempts: max_attempts.max(1),
            schedule: Box::new(schedule),
        }
    }

    /// Single-report path: 429 and timeouts back off `unit * 2^attempt`;
    /// anything else is terminal.
    pub fn single_item(max_attempts: u32, unit: Duration) -> Self {
        Self::new("single", max_attempts, move |err| match err {
            ClassifyError::RateLimited | ClassifyError::Timeout => Some(Backoff::exponential(unit)),
            _ => None,
        })
    }

    /// Batch path: unparseable bodies back off `unit * 2^attempt`, 429 backs
    /// off `5 * unit + unit * 2^attempt`. Other HTTP errors, transport errors
    /// and timeouts are terminal so the chunk falls back to single calls.
    pub fn batch(max_attempts: u32, unit: Duration) -> Self {
        Self::new("batch", max_attempts, move |err| match err {
            ClassifyError::Unparseable(_) => Some(Backoff::exponential(unit)),
            ClassifyError::RateLimited => Some(Backoff::with_offset(unit, unit.saturating_mul(5))),
            _ => None,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before attempt `attempt + 1`, or `None` when the loop must stop.
    pub fn delay_after(&self, err: &ClassifyError, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        (self.schedule)(err).map(|b| b.delay(attempt))
    }

    /// Drive `op` until it succeeds, hits a terminal error, runs out of
    /// attempts, or the token is cancelled. `op` receives the 0-based attempt.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClassifyError>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryFailure {
                    error: ClassifyError::Cancelled,
                    attempts: attempt,
                    exhausted: false,
                });
            }

            let err = match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };

            let retryable = err != ClassifyError::Cancelled && (self.schedule)(&err).is_some();
            let Some(delay) = self.delay_after(&err, attempt).filter(|_| retryable) else {
                return Err(RetryFailure {
                    exhausted: retryable,
                    attempts: attempt + 1,
                    error: err,
                });
            };

            tracing::warn!(
                target: "classify",
                mode = self.label,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying classifier request"
            );
            counter!("classify_retries_total", "mode" => self.label).increment(1);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(RetryFailure {
                        error: ClassifyError::Cancelled,
                        attempts: attempt + 1,
                        exhausted: false,
                    });
                }
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    const UNIT: Duration = Duration::from_secs(1);

    #[test]
    fn backoff_schedules() {
        let exp = Backoff::exponential(UNIT);
        assert_eq!(exp.delay(0), Duration::from_secs(1));
        assert_eq!(exp.delay(1), Duration::from_secs(2));
        assert_eq!(exp.delay(2), Duration::from_secs(4));

        let rl = Backoff::with_offset(UNIT, UNIT * 5);
        assert_eq!(rl.delay(0), Duration::from_secs(6));
        assert_eq!(rl.delay(1), Duration::from_secs(7));
    }

    #[test]
    fn batch_policy_is_terminal_on_plain_http_errors() {
        let p = RetryPolicy::batch(3, UNIT);
        let http = ClassifyError::Http {
            status: 500,
            excerpt: String::new(),
        };
        assert_eq!(p.delay_after(&http, 0), None);
        assert_eq!(p.delay_after(&ClassifyError::Timeout, 0), None);
        assert_eq!(
            p.delay_after(&ClassifyError::RateLimited, 1),
            Some(Duration::from_secs(7))
        );
        assert_eq!(p.delay_after(&ClassifyError::RateLimited, 2), None);
    }

    #[tokio::test(start_paused = true)]
    async fn single_policy_retries_timeouts_then_gives_up() {
        let p = RetryPolicy::single_item(3, UNIT);
        let calls = AtomicU32::new(0);
        let t0 = Instant::now();
        let out: Result<(), _> = p
            .run(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClassifyError::Timeout) }
            })
            .await;
        let failure = out.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.attempts, 3);
        assert!(failure.exhausted);
        // 1s + 2s between the three attempts.
        assert_eq!(t0.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_stops_immediately() {
        let p = RetryPolicy::single_item(3, UNIT);
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = p
            .run(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ClassifyError::Http {
                        status: 400,
                        excerpt: "bad".into(),
                    })
                }
            })
            .await;
        let failure = out.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!failure.exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_a_rate_limit() {
        let p = RetryPolicy::single_item(3, UNIT);
        let out = p
            .run(&CancellationToken::new(), |attempt| async move {
                if attempt == 0 {
                    Err(ClassifyError::RateLimited)
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(out.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_short_circuits() {
        let p = RetryPolicy::single_item(3, UNIT);
        let token = CancellationToken::new();
        token.cancel();
        let out: Result<(), _> = p.run(&token, |_| async { Ok(()) }).await;
        assert_eq!(out.unwrap_err().error, ClassifyError::Cancelled);
    }
}
