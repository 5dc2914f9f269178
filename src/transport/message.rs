use serde::{Deserialize, Serialize};

use crate::broker::message::{Attributes, Message, QoS};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "connect")]
    Connect {
        #[serde(default)]
        client_id: String,
        username: String,
        password: String,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        topic: String,
        #[serde(default)]
        qos: QoS,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },
    #[serde(rename = "publish")]
    Publish {
        topic: String,
        payload: String,
        #[serde(default)]
        qos: QoS,
        #[serde(default)]
        attributes: Attributes,
    },
    #[serde(rename = "disconnect")]
    Disconnect {},
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "conn_ack")]
    ConnAck { session_id: String },
    #[serde(rename = "connect_rejected")]
    ConnectRejected { reason: DisconnectReason },
    #[serde(rename = "message")]
    Message(Message),
    #[serde(rename = "disconnect")]
    Disconnect { reason: DisconnectReason },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The local client asked to disconnect.
    NormalDisconnection,
    UnspecifiedError,
    ServerShuttingDown,
    BadCredentials,
    ClientIdInUse,
    ProtocolError,
}

impl DisconnectReason {
    /// Transient reasons are eligible for one automatic reconnect attempt.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            DisconnectReason::UnspecifiedError | DisconnectReason::ServerShuttingDown
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DisconnectReason::NormalDisconnection => "normal disconnection",
            DisconnectReason::UnspecifiedError => "unspecified error",
            DisconnectReason::ServerShuttingDown => "server shutting down",
            DisconnectReason::BadCredentials => "bad username or password",
            DisconnectReason::ClientIdInUse => "client id taken over by a newer connection",
            DisconnectReason::ProtocolError => "protocol error",
        };
        f.write_str(text)
    }
}
