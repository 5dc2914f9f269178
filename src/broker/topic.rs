//! Topic entries
//!
//! A `Topic` holds the set of session ids currently subscribed to one topic
//! name. Duplicate subscriptions are a no-op. Entries are owned by the
//! `TopicDirectory`, which drops them as soon as they become empty.

use std::collections::BTreeSet;

use crate::broker::session::SessionId;

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: BTreeSet<SessionId>,
}

impl Topic {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: BTreeSet::new(),
        }
    }

    /// Add a subscriber. Returns `false` if it was already present.
    pub fn subscribe(&mut self, id: SessionId) -> bool {
        self.subscribers.insert(id)
    }

    /// Remove a subscriber. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.subscribers.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
