//! Topic directory
//!
//! The authoritative mapping from topic name to the sessions subscribed to
//! it. The raw map is never exposed: callers go through `subscribe`,
//! `unsubscribe` and `remove_session`, each of which leaves the directory
//! without empty entries. The directory itself does no I/O; the broker
//! turns each mutation into a catalogue broadcast while it still holds the
//! lock, so a broadcast always reflects the state that produced it.

use std::collections::BTreeMap;

use crate::broker::session::SessionId;
use crate::broker::topic::Topic;

#[derive(Debug, Default)]
pub struct TopicDirectory {
    topics: BTreeMap<String, Topic>,
}

impl TopicDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `session` to `topic`, creating the entry if needed.
    /// Returns `false` if the session was already subscribed.
    pub fn subscribe(&mut self, topic: &str, session: &str) -> bool {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(session.to_string())
    }

    /// Removes `session` from `topic`, pruning the entry once it is empty.
    /// Returns `false` if the session was not subscribed.
    pub fn unsubscribe(&mut self, topic: &str, session: &str) -> bool {
        let Some(entry) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = entry.unsubscribe(session);
        if entry.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    /// Removes `session` from every topic and returns the topics it left.
    pub fn remove_session(&mut self, session: &str) -> Vec<String> {
        let mut left = Vec::new();
        self.topics.retain(|name, entry| {
            if entry.unsubscribe(session) {
                left.push(name.clone());
            }
            !entry.is_empty()
        });
        left
    }

    /// Names of all topics with at least one subscriber.
    pub fn catalogue(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn subscribers_of(&self, topic: &str) -> Vec<SessionId> {
        self.topics
            .get(topic)
            .map(|entry| entry.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Whether `session` is subscribed to anything.
    pub fn contains_session(&self, session: &str) -> bool {
        self.topics
            .values()
            .any(|entry| entry.subscribers.contains(session))
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
