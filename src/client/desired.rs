//! The desired subscription set
//!
//! Topics the client wants to be subscribed to, in the order they were first
//! requested. Re-subscribing a topic replaces its QoS in place, so the set
//! never holds the same topic twice. The whole set is re-applied after every
//! successful connect.

use crate::broker::message::QoS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredSubscription {
    pub topic: String,
    pub qos: QoS,
}

#[derive(Debug, Default, Clone)]
pub struct DesiredSubscriptions {
    entries: Vec<DesiredSubscription>,
}

impl DesiredSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `topic`, or updates its QoS if already present.
    pub fn insert(&mut self, topic: &str, qos: QoS) {
        match self.entries.iter_mut().find(|entry| entry.topic == topic) {
            Some(entry) => entry.qos = qos,
            None => self.entries.push(DesiredSubscription {
                topic: topic.to_string(),
                qos,
            }),
        }
    }

    pub fn remove(&mut self, topic: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.topic != topic);
        self.entries.len() != before
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.iter().any(|entry| entry.topic == topic)
    }

    pub fn snapshot(&self) -> Vec<DesiredSubscription> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
