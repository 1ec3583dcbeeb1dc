use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Minimum gap between outbound classifier requests.
///
/// One cursor, one owner. The mutex only lets `wait` take `&self`; it is
/// never held across an await.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_call: Mutex::new(None),
        }
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Returns once `min_delay` has passed since the previous `wait` returned.
    pub async fn wait(&self) {
        let last = *self.last_call.lock().unwrap_or_else(|e| e.into_inner());
        let ready_at = last.map(|t| t + self.min_delay);

        if let Some(at) = ready_at {
            tokio::time::sleep_until(at).await;
        }

        *self.last_call.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }
}
