//! WebSocket transport (broker side)
//!
//! This file implements the WebSocket server that translates protocol JSON
//! frames into broker operations. Responsibilities:
//! - Accept TCP/WebSocket connections
//! - Enforce a connect-first order: the first frame must be `connect` with
//!   the configured static credentials
//! - Register a `Session` per connection and forward subscribe, unsubscribe
//!   and publish frames to the `Broker`. A connect reusing a live client id
//!   takes that session over.
//! - Drop a session that stays silent past the idle timeout
//! - Remove the session from the directory when the connection ends

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::broker::message::Message;
use crate::broker::session::Session;
use crate::config::ServerSettings;
use crate::transport::message::{ClientMessage, DisconnectReason, ServerMessage};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn start_websocket_server(
    addr: String,
    broker: Arc<Mutex<Broker>>,
    settings: ServerSettings,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("WebSocket server listening on ws://{addr}");
    serve(listener, broker, settings).await
}

/// Accepts connections on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<Mutex<Broker>>,
    settings: ServerSettings,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("Accepted TCP connection from {peer}");
        tokio::spawn(handle_connection(stream, broker.clone(), settings.clone()));
    }
}

pub(crate) fn lock(broker: &Mutex<Broker>) -> MutexGuard<'_, Broker> {
    broker.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn handle_connection(stream: TcpStream, broker: Arc<Mutex<Broker>>, settings: ServerSettings) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake error: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let client_id = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_connect(&mut ws_receiver)).await {
        Ok(Some(hello)) => match check_credentials(&hello, &settings) {
            Ok(client_id) => client_id,
            Err(reason) => {
                warn!("Rejected connection: {reason}");
                let _ = ws_sender
                    .send(frame(&ServerMessage::ConnectRejected { reason }))
                    .await;
                let _ = ws_sender.close().await;
                return;
            }
        },
        Ok(None) => {
            let _ = ws_sender
                .send(frame(&ServerMessage::Error {
                    message: "must connect first".to_string(),
                }))
                .await;
            let _ = ws_sender.close().await;
            return;
        }
        Err(_) => {
            warn!("Connection did not send connect within {HANDSHAKE_TIMEOUT:?}");
            let _ = ws_sender.close().await;
            return;
        }
    };

    let session_id = if client_id.is_empty() {
        Session::generate_id()
    } else {
        client_id
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let session = Session::new(session_id.clone(), tx);
    let connection = session.connection;
    if let Some(displaced) = lock(&broker).register_session(session) {
        // Dropping the old sender ends its writer once the takeover notice is flushed.
        drop(displaced);
        info!("{session_id} reconnected; previous connection closed");
    }

    if let Err(e) = ws_sender
        .send(frame(&ServerMessage::ConnAck {
            session_id: session_id.clone(),
        }))
        .await
    {
        error!("Failed to acknowledge {session_id}: {e}");
        lock(&broker).release_session(&session_id, connection);
        return;
    }

    // Forward broker -> client. Ends when the session is dropped from the
    // broker or the socket fails.
    {
        let session_id = session_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!("Failed to send message to {session_id}: {e}");
                    break;
                }
            }
            let _ = ws_sender.close().await;
            debug!("Send loop closed for {session_id}");
        });
    }

    let idle_timeout = settings.idle_timeout();
    loop {
        let msg = match tokio::time::timeout(idle_timeout, ws_receiver.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                debug!("Receive error for {session_id}: {e}");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!("{session_id} silent for {idle_timeout:?}; dropping session");
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };
        if !msg.is_text() {
            continue;
        }

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(client_msg) => {
                if dispatch(&broker, &session_id, client_msg).is_break() {
                    break;
                }
            }
            Err(err) => {
                warn!(
                    "Invalid client message from {session_id}: {err} | {}",
                    text.chars().take(100).collect::<String>()
                );
            }
        }
    }

    info!("{session_id} disconnected");
    lock(&broker).release_session(&session_id, connection);
}

/// Applies one client frame to the broker. Breaks when the client asked to
/// disconnect.
pub(crate) fn dispatch(broker: &Mutex<Broker>, session_id: &str, msg: ClientMessage) -> ControlFlow<()> {
    let mut broker = lock(broker);
    match msg {
        ClientMessage::Connect { .. } => {
            warn!("{session_id} sent connect on an established session; ignored");
        }
        ClientMessage::Subscribe { topic, qos } => {
            broker.subscribe(&topic, session_id);
            info!("{session_id} subscribed to {topic} ({qos:?})");
        }
        ClientMessage::Unsubscribe { topic } => {
            broker.unsubscribe(&topic, session_id);
            info!("{session_id} unsubscribed from {topic}");
        }
        ClientMessage::Publish {
            topic,
            payload,
            qos,
            attributes,
        } => {
            let mut msg = Message::new(topic, payload, qos);
            msg.attributes = attributes;
            let sender = msg.sender().unwrap_or("unknown").to_string();
            let topic = msg.topic.clone();
            match broker.publish_from(session_id, msg) {
                Ok(()) => debug!("{session_id} ({sender}) published to {topic}"),
                Err(e) => {
                    if let Some(session) = broker.sessions.get(session_id) {
                        let _ = session.send(&ServerMessage::Error {
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        ClientMessage::Disconnect {} => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}

async fn read_connect<S>(stream: &mut S) -> Option<ClientMessage>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(Ok(msg)) = stream.next().await {
        if msg.is_ping() || msg.is_pong() {
            continue;
        }
        let hello = msg
            .to_text()
            .ok()
            .and_then(|text| serde_json::from_str::<ClientMessage>(text).ok());
        return match hello {
            Some(hello @ ClientMessage::Connect { .. }) => Some(hello),
            _ => None,
        };
    }
    None
}

/// Checks the static credentials and returns the requested client id.
fn check_credentials(hello: &ClientMessage, settings: &ServerSettings) -> Result<String, DisconnectReason> {
    match hello {
        ClientMessage::Connect {
            client_id,
            username,
            password,
        } if *username == settings.username && *password == settings.password => {
            Ok(client_id.clone())
        }
        ClientMessage::Connect { .. } => Err(DisconnectReason::BadCredentials),
        _ => Err(DisconnectReason::ProtocolError),
    }
}

fn frame(msg: &ServerMessage) -> WsMessage {
    match serde_json::to_string(msg) {
        Ok(json) => WsMessage::text(json),
        Err(e) => {
            error!("Failed to serialize frame: {e}");
            WsMessage::Close(None)
        }
    }
}
