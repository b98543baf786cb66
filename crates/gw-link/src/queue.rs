//! Per-request async queue. Effectively SPSC: the link is the sole
//! producer, the coordinator's response driver is the sole consumer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::frame::QueueFrame;

/// Default dequeue timeout when a call site doesn't override it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum DequeueError {
    #[error("queue closed")]
    Closed,
    #[error("browser agent link lost")]
    LinkLost,
    #[error("dequeue timed out")]
    Timeout,
}

#[derive(Debug)]
pub struct MessageQueue {
    buffer: Mutex<VecDeque<QueueFrame>>,
    notify: Notify,
    closed: AtomicBool,
    link_lost: AtomicBool,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            link_lost: AtomicBool::new(false),
        }
    }

    /// Hand the frame to a waiting `dequeue` if one exists, else buffer it.
    /// A no-op once the queue is closed.
    pub fn enqueue(&self, frame: QueueFrame) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.buffer.lock().unwrap().push_back(frame);
        self.notify.notify_one();
    }

    pub async fn dequeue(&self, timeout: Duration) -> Result<QueueFrame, DequeueError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut buffer = self.buffer.lock().unwrap();
                if let Some(frame) = buffer.pop_front() {
                    return Ok(frame);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(if self.link_lost.load(Ordering::Acquire) {
                    DequeueError::LinkLost
                } else {
                    DequeueError::Closed
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DequeueError::Timeout);
            }

            if tokio::time::timeout(remaining, self.notify.notified())
                .await
                .is_err()
            {
                return Err(DequeueError::Timeout);
            }
        }
    }

    /// Fail every pending waiter with `Closed` and drop buffered frames.
    /// Used for ordinary teardown and genuine client/agent-initiated
    /// cancellation.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.buffer.lock().unwrap().clear();
        self.notify.notify_waiters();
    }

    /// Like `close`, but fails waiters with `LinkLost` instead of
    /// `Closed` — the control channel itself dropped out from under this
    /// request rather than anyone asking for it to stop.
    pub fn close_link_lost(&self) {
        self.link_lost.store(true, Ordering::Release);
        self.close();
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn dequeue_returns_buffered_frame_immediately() {
        let queue = MessageQueue::new();
        queue.enqueue(QueueFrame::StreamEnd);
        let frame = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert!(matches!(frame, QueueFrame::StreamEnd));
    }

    #[tokio::test]
    async fn dequeue_wakes_on_enqueue() {
        let queue = Arc::new(MessageQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(QueueFrame::StreamEnd);
        let frame = waiter.await.unwrap().unwrap();
        assert!(matches!(frame, QueueFrame::StreamEnd));
    }

    #[tokio::test]
    async fn dequeue_times_out_when_empty() {
        let queue = MessageQueue::new();
        let result = queue.dequeue(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(DequeueError::Timeout)));
    }

    #[tokio::test]
    async fn close_fails_pending_waiter_with_closed() {
        let queue = Arc::new(MessageQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(DequeueError::Closed)));
    }

    #[tokio::test]
    async fn close_drops_buffered_frames() {
        let queue = MessageQueue::new();
        queue.enqueue(QueueFrame::StreamEnd);
        queue.close();
        let result = queue.dequeue(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(DequeueError::Closed)));
    }

    #[tokio::test]
    async fn close_link_lost_fails_pending_waiter_with_link_lost() {
        let queue = Arc::new(MessageQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close_link_lost();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(DequeueError::LinkLost)));
    }
}
