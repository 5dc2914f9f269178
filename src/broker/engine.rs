//! Broker engine
//!
//! This module contains the in-memory broker implementation responsible for:
//! - tracking live sessions and routing publishes to topic subscribers
//! - keeping the `TopicDirectory` current and broadcasting the topic
//!   catalogue on `Base` after every mutation
//! - answering subscriber-list requests on `response_subscribers`
//! - running every client publish through the `PublishGuard`
//!
//! Concurrency and usage notes:
//! - The public API here is synchronous and designed to be held behind a
//!   lock (for example `Arc<Mutex<Broker>>`) by the transport layer. Sends
//!   go into unbounded per-session channels, so no network I/O happens while
//!   the lock is held.
//! - A failed send to one session is logged and never rolls back the
//!   directory mutation that caused it.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::directory::TopicDirectory;
use crate::broker::guard::PublishGuard;
use crate::broker::message::{BASE_SENDER, BASE_TOPIC, Message, QoS, SUBSCRIBERS_TOPIC};
use crate::broker::session::{Session, SessionId};
use crate::transport::message::{DisconnectReason, ServerMessage};
use crate::utils::error::BrokerError;

#[derive(Debug, Default)]
pub struct Broker {
    pub sessions: HashMap<SessionId, Session>,
    directory: TopicDirectory,
    guard: PublishGuard,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session. A live session with the same id is taken over:
    /// it is told `client_id_in_use`, dropped from every topic and returned
    /// so the caller can close it.
    pub fn register_session(&mut self, session: Session) -> Option<Session> {
        let displaced = self.sessions.remove(&session.id);
        if let Some(old) = &displaced {
            warn!("Session {} taken over by a new connection", old.id);
            let frame = ServerMessage::Disconnect {
                reason: DisconnectReason::ClientIdInUse,
            };
            if let Err(e) = old.send(&frame) {
                debug!("Failed to notify {} of takeover: {e}", old.id);
            }
            self.disconnect_session(&old.id);
        }
        info!("Session {} connected", session.id);
        self.sessions.insert(session.id.clone(), session);
        displaced
    }

    /// Disconnects `session_id` only while it still belongs to `connection`.
    /// A connection that was taken over leaves its successor alone.
    pub fn release_session(&mut self, session_id: &str, connection: Uuid) {
        match self.sessions.get(session_id) {
            Some(session) if session.connection == connection => {
                self.disconnect_session(session_id)
            }
            Some(_) => debug!("Session {session_id} belongs to a newer connection"),
            None => debug!("Session {session_id} already removed"),
        }
    }

    pub fn is_registered(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn directory(&self) -> &TopicDirectory {
        &self.directory
    }

    pub fn guard(&self) -> &PublishGuard {
        &self.guard
    }

    /// Subscribes a session to a topic and broadcasts the catalogue.
    pub fn subscribe(&mut self, topic: &str, session_id: &str) {
        if self.directory.subscribe(topic, session_id) {
            debug!("{session_id} subscribed to {topic}");
        }
        self.broadcast_catalogue();

        // A session joining the bootstrap topic gets the catalogue pushed
        // explicitly as well.
        if topic == BASE_TOPIC {
            self.broadcast_catalogue();
        }
    }

    pub fn unsubscribe(&mut self, topic: &str, session_id: &str) {
        if self.directory.unsubscribe(topic, session_id) {
            debug!("{session_id} unsubscribed from {topic}");
        }
        self.broadcast_catalogue();
    }

    /// Removes a session from the registry and from every topic, then
    /// broadcasts the catalogue once.
    pub fn disconnect_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        let left = self.directory.remove_session(session_id);
        for topic in &left {
            debug!("Unsubscribed {session_id} from topic {topic}");
        }
        self.broadcast_catalogue();
        info!("Cleaned up session {session_id}");
    }

    /// Handles a publish from a connected client.
    pub fn publish_from(&mut self, session_id: &str, mut msg: Message) -> Result<(), BrokerError> {
        if !self.sessions.contains_key(session_id) {
            return Err(BrokerError::UnknownSession(session_id.to_string()));
        }
        self.guard
            .check(&self.directory, session_id, &msg.topic, &msg.payload)?;

        msg.timestamp = chrono::Utc::now().timestamp_millis();
        if msg.message_id.is_empty() {
            msg.message_id = Uuid::new_v4().to_string();
        }

        let is_request = msg.topic == SUBSCRIBERS_TOPIC && msg.sender() == Some(session_id);
        let requested = msg.payload.clone();
        self.route(&msg);

        if is_request {
            info!("Session {session_id} requested the subscriber list of {requested}");
            self.broadcast_subscribers_of(&requested, session_id);
        }
        Ok(())
    }

    /// Publishes the subscriber list of `topic` on `response_subscribers`,
    /// addressed to `requester` through the sender attribute.
    pub fn broadcast_subscribers_of(&self, topic: &str, requester: &str) {
        let subscribers = self.directory.subscribers_of(topic).join(",");
        let msg = self
            .broker_message(SUBSCRIBERS_TOPIC, subscribers)
            .with_sender(requester);
        self.route(&msg);
    }

    /// Tells every session the broker is going away.
    pub fn shutdown(&mut self) {
        let frame = ServerMessage::Disconnect {
            reason: DisconnectReason::ServerShuttingDown,
        };
        for (id, session) in &self.sessions {
            if let Err(e) = session.send(&frame) {
                warn!("Failed to notify {id} of shutdown: {e}");
            }
        }
        info!("Notified {} sessions of shutdown", self.sessions.len());
    }

    fn broadcast_catalogue(&self) {
        let catalogue = self.directory.catalogue().join(",");
        let msg = self
            .broker_message(BASE_TOPIC, catalogue.clone())
            .with_sender(BASE_SENDER);
        let delivered = self.route(&msg);
        debug!("Broadcast topic catalogue [{catalogue}] to {delivered} sessions");
    }

    fn broker_message(&self, topic: &str, payload: String) -> Message {
        let mut msg = Message::new(topic, payload, QoS::ExactlyOnce);
        msg.timestamp = chrono::Utc::now().timestamp_millis();
        msg.message_id = Uuid::new_v4().to_string();
        msg
    }

    /// Delivers a message to every subscriber of its topic and returns how
    /// many sessions it reached.
    fn route(&self, msg: &Message) -> usize {
        let subscribers = self.directory.subscribers_of(&msg.topic);
        if subscribers.is_empty() {
            debug!("Topic '{}' has no subscribers", msg.topic);
            return 0;
        }

        let frame = ServerMessage::Message(msg.clone());
        let mut delivered = 0;
        for sub_id in &subscribers {
            match self.sessions.get(sub_id) {
                Some(session) => match session.send(&frame) {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!("Failed to send to {sub_id}: {e}"),
                },
                None => warn!("No session registered with id: {sub_id}"),
            }
        }
        delivered
    }
}
