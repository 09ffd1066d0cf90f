//! Durable queue abstraction and an in-process implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::errors::{PipelineError, PipelineResult};

/// A message handed out by [`DurableQueue::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Receipt handle used to delete the message.
    pub handle: String,
    /// Raw message body.
    pub body: String,
    /// How many times the message has been received, this time included.
    pub receive_count: u32,
}

/// A queue with at-least-once delivery.
///
/// Received messages stay on the queue, hidden for a visibility timeout,
/// until they are deleted. Undeleted messages are redelivered.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Enqueues a message body.
    async fn send(&self, body: String) -> PipelineResult<()>;

    /// Receives up to `max_messages`, waiting at most `wait_time` for the
    /// first one to arrive.
    async fn receive(
        &self,
        max_messages: u32,
        wait_time: Duration,
    ) -> PipelineResult<Vec<ReceivedMessage>>;

    /// Deletes a received message.
    async fn delete(&self, handle: &str) -> PipelineResult<()>;
}

#[derive(Debug)]
struct Entry {
    id: u64,
    body: String,
    visible_at: Instant,
    receive_count: u32,
}

impl Entry {
    fn handle(&self) -> String {
        format!("{}-{}", self.id, self.receive_count)
    }
}

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<Entry>,
    next_id: u64,
}

/// In-process queue with visibility timeout semantics.
///
/// A receipt handle is only valid until the message is received again.
pub struct InMemoryQueue {
    state: Mutex<State>,
    visibility_timeout: Duration,
    notify: Notify,
}

impl InMemoryQueue {
    /// Creates an empty queue.
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            visibility_timeout,
            notify: Notify::new(),
        }
    }

    /// Number of messages on the queue, in flight or not.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true when the queue holds no messages.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Bodies of all stored messages in enqueue order.
    pub fn bodies(&self) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|e| e.body.clone())
            .collect()
    }

    /// Takes visible messages, or returns the instant the next one becomes visible.
    fn take_visible(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, Option<Instant>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut received = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for entry in state.entries.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if entry.visible_at <= now {
                entry.receive_count += 1;
                entry.visible_at = now + self.visibility_timeout;
                received.push(ReceivedMessage {
                    handle: entry.handle(),
                    body: entry.body.clone(),
                    receive_count: entry.receive_count,
                });
            } else {
                next_visible = Some(match next_visible {
                    Some(at) => at.min(entry.visible_at),
                    None => entry.visible_at,
                });
            }
        }

        if received.is_empty() {
            Err(next_visible)
        } else {
            Ok(received)
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn send(&self, body: String) -> PipelineResult<()> {
        {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.entries.push_back(Entry {
                id,
                body,
                visible_at: Instant::now(),
                receive_count: 0,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: u32,
        wait_time: Duration,
    ) -> PipelineResult<Vec<ReceivedMessage>> {
        let max_messages = usize::try_from(max_messages.max(1)).unwrap_or(usize::MAX);
        let deadline = Instant::now() + wait_time;

        loop {
            let notified = self.notify.notified();
            let wake_at = match self.take_visible(max_messages) {
                Ok(received) => return Ok(received),
                Err(Some(next_visible)) => next_visible.min(deadline),
                Err(None) => deadline,
            };
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn delete(&self, handle: &str) -> PipelineResult<()> {
        let mut state = self.state.lock();
        let position = state
            .entries
            .iter()
            .position(|e| e.handle() == handle)
            .ok_or_else(|| PipelineError::Queue {
                message: format!("Unknown receipt handle: {}", handle),
            })?;
        state.entries.remove(position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_receive_delete() {
        let queue = InMemoryQueue::default();
        queue.send("a".to_string()).await.unwrap();
        queue.send("b".to_string()).await.unwrap();

        let received = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].body, "a");
        assert_eq!(received[0].receive_count, 1);

        queue.delete(&received[0].handle).await.unwrap();
        assert_eq!(queue.bodies(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_receive_respects_max_messages() {
        let queue = InMemoryQueue::default();
        for i in 0..5 {
            queue.send(i.to_string()).await.unwrap();
        }
        let received = queue.receive(3, Duration::ZERO).await.unwrap();
        assert_eq!(received.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undeleted_message_is_redelivered_after_visibility_timeout() {
        let queue = InMemoryQueue::new(Duration::from_secs(30));
        queue.send("a".to_string()).await.unwrap();

        let first = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let second = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);

        // The first receipt handle went stale on redelivery.
        assert!(queue.delete(&first[0].handle).await.is_err());
        queue.delete(&second[0].handle).await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_waits_for_new_message() {
        let queue = std::sync::Arc::new(InMemoryQueue::default());
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            producer.send("late".to_string()).await.unwrap();
        });

        let received = queue.receive(10, Duration::from_secs(10)).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_receive_returns_after_wait() {
        let queue = InMemoryQueue::default();
        let started = Instant::now();
        let received = queue.receive(10, Duration::from_secs(10)).await.unwrap();
        assert!(received.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
