use std::collections::VecDeque;
use std::sync::Mutex;

use parley_types::models::Message;

/// How many recent messages the relay keeps in memory.
pub const RECENT_MESSAGE_CAPACITY: usize = 100;

/// Bounded FIFO of the most recently sent messages. A mirror of the tail of
/// the store, never the source of truth.
#[derive(Debug)]
pub struct MessageCache {
    messages: Mutex<VecDeque<Message>>,
    capacity: usize,
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::with_capacity(RECENT_MESSAGE_CAPACITY)
    }
}

impl MessageCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a message, evicting the oldest once over capacity.
    pub fn push(&self, message: Message) {
        let mut messages = self.messages.lock().expect("message cache lock poisoned");
        messages.push_back(message);
        while messages.len() > self.capacity {
            messages.pop_front();
        }
    }

    /// Cached messages, oldest first.
    pub fn recent(&self) -> Vec<Message> {
        self.messages
            .lock()
            .expect("message cache lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().expect("message cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
