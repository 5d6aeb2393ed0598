//! Bounded dispatch-error channel: oldest entry dropped on overflow, same non-blocking
//! backpressure policy as the bus's subscriber buffers.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;

pub struct ErrorChannel {
    capacity: usize,
    buffer: Mutex<VecDeque<DispatchError>>,
    notify: Notify,
    dropped: std::sync::atomic::AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for ErrorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorChannel").field("capacity", &self.capacity).field("queued", &self.buffer.lock().len()).finish()
    }
}

impl ErrorChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: std::sync::atomic::AtomicU64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Signals that no further errors will be pushed. Queued errors still drain normally;
    /// `recv` only starts returning `None` once the buffer is empty.
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Enqueues `error`, dropping the oldest queued error if the channel is already full.
    pub fn push(&self, error: DispatchError) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        buffer.push_back(error);
        drop(buffer);
        self.notify.notify_one();
    }

    /// Waits for the next queued error, or returns `None` once `ctx` is cancelled and the
    /// buffer has drained.
    pub async fn recv(&self, ctx: &CancellationToken) -> Option<DispatchError> {
        loop {
            if let Some(error) = self.buffer.lock().pop_front() {
                return Some(error);
            }
            if ctx.is_cancelled() || self.closed.load(std::sync::atomic::Ordering::Relaxed) {
                return None;
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = ctx.cancelled() => {
                    if let Some(error) = self.buffer.lock().pop_front() {
                        return Some(error);
                    }
                    return None;
                }
            }
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}
