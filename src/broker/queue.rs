//! Thread-safe FIFO of decoded messages.
//!
//! Every operation takes the internal lock for its whole duration, so a
//! `push` from the dispatch loop and a `pop` from the fetch server never
//! interleave on the same queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::broker::message::Message;

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: Message,
    pub enqueued_at: Instant,
}

#[derive(Debug, Default)]
pub struct MessageQueue {
    entries: Mutex<VecDeque<QueuedMessage>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail. Never blocks on anything but the lock.
    pub fn push(&self, message: Message) {
        self.lock().push_back(QueuedMessage {
            message,
            enqueued_at: Instant::now(),
        });
    }

    /// Remove and return the head, or `None` when the queue is empty.
    pub fn pop(&self) -> Option<Message> {
        self.lock().pop_front().map(|entry| entry.message)
    }

    pub fn peek(&self) -> Option<Message> {
        self.lock().front().map(|entry| entry.message.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop every message that has waited at least `ttl` as of `now`.
    /// Returns how many were dropped.
    pub fn purge_older_than(&self, ttl: Duration, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|entry| now.saturating_duration_since(entry.enqueued_at) < ttl);
        before - entries.len()
    }

    // No operation leaves the deque half-updated, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedMessage>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
