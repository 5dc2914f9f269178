//! Broker-side session representation
//!
//! `Session` models one connected client and holds the sending side of a
//! per-connection channel used by the broker to push frames. The id is the
//! client id presented at connect time, or a generated one when the client
//! left it empty. Each connection also gets its own `connection` token so a
//! connection that was taken over cannot remove its successor.

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::transport::message::ServerMessage;

pub type SessionId = String;

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub sender: UnboundedSender<WsMessage>,
    pub connection: Uuid,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: id.into(),
            sender,
            connection: Uuid::new_v4(),
        }
    }

    /// Generate an id for a client that did not present one.
    pub fn generate_id() -> SessionId {
        format!("client-{}", Uuid::new_v4())
    }

    /// Serialize and queue a frame for this session.
    pub fn send(&self, frame: &ServerMessage) -> Result<(), String> {
        let json = serde_json::to_string(frame).map_err(|e| e.to_string())?;
        self.sender
            .send(WsMessage::text(json))
            .map_err(|e| e.to_string())
    }
}
