//! Serialises outbound control frames (SUBSCRIBE, UNSUBSCRIBE, PING) at least 250 ms apart
//! through one mutex, per the venue stream manager's rate limit.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;

pub struct ControlRateLimiter {
    min_interval: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl ControlRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_sent: Mutex::new(None) }
    }

    /// Blocks until the next allowed send slot, or returns a cancellation error if `ctx` fires
    /// first. Stamps the slot as taken before returning so a concurrent caller serialises
    /// behind this one.
    pub async fn wait_for_slot(&self, ctx: &CancellationToken) -> Result<(), StreamError> {
        loop {
            let mut guard = self.last_sent.lock().await;
            let now = Instant::now();
            match *guard {
                Some(last) if now < last + self.min_interval => {
                    let wait = last + self.min_interval - now;
                    drop(guard);
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(StreamError::Cancelled),
                        _ = tokio::time::sleep(wait) => continue,
                    }
                }
                _ => {
                    *guard = Some(now);
                    return Ok(());
                }
            }
        }
    }

    /// Clears the last-sent timestamp; called on reconnect so the fresh session isn't rate
    /// limited by a slot reserved for the dead one.
    pub async fn reset(&self) {
        *self.last_sent.lock().await = None;
    }
}
