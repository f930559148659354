use crate::session::TransportClosed;
use events::Message;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Outcome of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// The queue was full and its oldest message was discarded to make room.
    DroppedOldest,
}

/// Bounded single-consumer queue of live messages for one session.
///
/// Producers never wait: when the queue is full the oldest message is
/// dropped and counted. The session's own task is the only consumer.
#[derive(Debug)]
pub struct SessionQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

#[derive(Debug)]
struct QueueState {
    messages: VecDeque<Message>,
    closed: bool,
}

impl SessionQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                messages: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, message: Message) -> Result<Enqueued, TransportClosed> {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return Err(TransportClosed);
            }
            state.messages.push_back(message);
            if state.messages.len() > self.capacity {
                state.messages.pop_front();
                Enqueued::DroppedOldest
            } else {
                Enqueued::Queued
            }
        };

        if outcome == Enqueued::DroppedOldest {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        Ok(outcome)
    }

    /// Waits for the next message. Returns `None` as soon as the queue is
    /// closed, discarding anything still queued.
    pub async fn recv(&self) -> Option<Message> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(message) = state.messages.pop_front() {
                    return Some(message);
                }
            }
            // A push or close between the check above and this await leaves
            // a permit behind, so the wakeup is not lost.
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.messages.clear();
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages discarded because this session fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // The critical sections never panic midway, so the data is consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::Channel;
    use std::sync::Arc;
    use std::time::Duration;

    fn message(payload: &str) -> Message {
        Message::new(Channel::new("alerts").unwrap(), payload)
    }

    #[tokio::test]
    async fn test_messages_come_out_in_push_order() {
        let queue = SessionQueue::new(4);
        for payload in ["a", "b", "c"] {
            assert_eq!(queue.push(message(payload)), Ok(Enqueued::Queued));
        }

        assert_eq!(queue.recv().await.unwrap().payload(), "a");
        assert_eq!(queue.recv().await.unwrap().payload(), "b");
        assert_eq!(queue.recv().await.unwrap().payload(), "c");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest_and_counts() {
        let queue = SessionQueue::new(2);
        queue.push(message("a")).unwrap();
        queue.push(message("b")).unwrap();

        assert_eq!(queue.push(message("c")), Ok(Enqueued::DroppedOldest));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);

        assert_eq!(queue.recv().await.unwrap().payload(), "b");
        assert_eq!(queue.recv().await.unwrap().payload(), "c");
    }

    #[tokio::test]
    async fn test_push_after_close_reports_transport_closed() {
        let queue = SessionQueue::new(2);
        queue.close();

        assert_eq!(queue.push(message("late")), Err(TransportClosed));
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push_from_another_task() {
        let queue = Arc::new(SessionQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(message("wake")).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake")
            .unwrap();
        assert_eq!(received.unwrap().payload(), "wake");
    }

    #[tokio::test]
    async fn test_recv_wakes_on_close() {
        let queue = Arc::new(SessionQueue::new(2));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let received = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should wake")
            .unwrap();
        assert!(received.is_none());
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let queue = SessionQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(message("a")).unwrap();
        assert_eq!(queue.push(message("b")), Ok(Enqueued::DroppedOldest));
    }
}
