//! Message definitions shared by the broker and the client session
//!
//! `Message` is the canonical routed representation. Payloads are plain
//! strings; the only metadata the directory protocol relies on is the
//! `Username` sender attribute, because receivers never see the transport's
//! own notion of who published a message.
//!
//! Control topics:
//! - `Base`: the broker publishes the comma-joined topic catalogue here
//! - `response_subscribers`: clients ask for the subscriber list of one topic
//!   and the broker answers on the same topic, addressed by sender attribute

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Topic carrying the full topic catalogue.
pub const BASE_TOPIC: &str = "Base";

/// Topic carrying subscriber-list requests and responses.
pub const SUBSCRIBERS_TOPIC: &str = "response_subscribers";

/// Attribute naming the publishing session.
pub const SENDER_ATTRIBUTE: &str = "Username";

/// Sender attribute value used on catalogue broadcasts.
pub const BASE_SENDER: &str = "Base";

pub type Attributes = BTreeMap<String, String>;

/// Returns `true` for the two reserved directory topics.
pub fn is_control_topic(topic: &str) -> bool {
    topic == BASE_TOPIC || topic == SUBSCRIBERS_TOPIC
}

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub qos: QoS,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub message_id: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            attributes: Attributes::new(),
            timestamp: 0,
            message_id: String::new(),
        }
    }

    /// Sets the `Username` attribute.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.attributes
            .insert(SENDER_ATTRIBUTE.to_string(), sender.into());
        self
    }

    pub fn sender(&self) -> Option<&str> {
        self.attributes.get(SENDER_ATTRIBUTE).map(String::as_str)
    }
}

/// Splits a comma-joined list payload, dropping blanks.
pub fn split_list(payload: &str) -> Vec<String> {
    payload
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
