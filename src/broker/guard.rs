//! Publish guard
//!
//! Only the broker may write directory data to the control topics. A client
//! publish to `Base` or `response_subscribers` is accepted only when its
//! payload names something the directory currently knows: a topic, or a
//! session subscribed to at least one topic. Everything else is rejected
//! before delivery. Ordinary topics are never inspected.

use tracing::warn;

use crate::broker::directory::TopicDirectory;
use crate::broker::message::is_control_topic;
use crate::utils::error::BrokerError;

#[derive(Debug, Default)]
pub struct PublishGuard {
    rejected: u64,
}

impl PublishGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &mut self,
        directory: &TopicDirectory,
        session: &str,
        topic: &str,
        payload: &str,
    ) -> Result<(), BrokerError> {
        if !is_control_topic(topic) {
            return Ok(());
        }
        if directory.contains_topic(payload) || directory.contains_session(payload) {
            return Ok(());
        }

        self.rejected += 1;
        warn!("Session {session} attempted to publish to control topic {topic}; rejected");
        Err(BrokerError::ForgedControlWrite {
            topic: topic.to_string(),
            payload: payload.to_string(),
        })
    }

    /// Number of publishes rejected so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}
