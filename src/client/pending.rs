//! Outbound publishes captured while disconnected.
//!
//! A FIFO queue drained in enqueue order after the next connect. The queue
//! is bounded: once `capacity` messages are waiting, the oldest one is
//! dropped to make room.

use std::collections::VecDeque;

use crate::broker::message::Message;

#[derive(Debug)]
pub struct PendingQueue {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl PendingQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends a message and returns the one evicted to make room, if any.
    pub fn push(&mut self, message: Message) -> Option<Message> {
        let evicted = if self.messages.len() >= self.capacity {
            self.messages.pop_front()
        } else {
            None
        };
        self.messages.push_back(message);
        evicted
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    /// Puts a message that failed to send back at the head of the queue.
    pub fn requeue(&mut self, message: Message) {
        self.messages.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
