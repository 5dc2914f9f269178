//! Client side of the WebSocket transport
//!
//! `Transport` is the seam between the session manager and the wire. Calls
//! are async and inbound traffic arrives as `TransportEvent`s on the channel
//! handed to the transport at construction, so the session manager sees
//! network callbacks through one queue.
//!
//! `WsTransport` speaks the JSON frame protocol in `transport::message`:
//! it sends `connect`, waits for `conn_ack`, then splits the socket into a
//! writer task (fed by an unbounded channel, with keep-alive pings) and a
//! reader task that forwards messages and reports the disconnect reason.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::{Message, QoS};
use crate::config::ClientSettings;
use crate::transport::message::{ClientMessage, DisconnectReason, ServerMessage};
use crate::utils::error::{ConnectError, TransportError};

/// Parameters for one connection attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub timeout: Duration,
}

impl ConnectOptions {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            username: settings.username.clone(),
            password: settings.password.clone(),
            client_id: settings.client_id.clone(),
            keep_alive: Duration::from_secs(settings.keep_alive_secs),
            timeout: Duration::from_secs(settings.connect_timeout_secs),
        }
    }

    /// Rejects parameters that cannot describe a connection.
    pub fn validate(&self) -> Result<(), ConnectError> {
        let invalid = |reason: &str| Err(ConnectError::InvalidConfiguration(reason.to_string()));

        if self.host.trim().is_empty() {
            return invalid("server address must not be empty");
        }
        if self.host.chars().any(char::is_whitespace) {
            return invalid("server address must not contain whitespace");
        }
        if self.port == 0 {
            return invalid("port must be between 1 and 65535");
        }
        if self.username.is_empty() {
            return invalid("username must not be empty");
        }
        if self.client_id.chars().any(char::is_whitespace) {
            return invalid("client id must not contain whitespace");
        }
        Ok(())
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(Message),
    Disconnected(DisconnectReason),
}

pub trait Transport: Send + Sync + 'static {
    /// Connects and returns the session id assigned by the broker.
    fn connect(
        &self,
        options: &ConnectOptions,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn publish(&self, message: Message) -> impl Future<Output = Result<(), TransportError>> + Send;
}

struct Link {
    outbound: UnboundedSender<WsMessage>,
    closing: Arc<AtomicBool>,
}

pub struct WsTransport {
    events: UnboundedSender<TransportEvent>,
    link: Mutex<Option<Link>>,
}

impl WsTransport {
    /// Creates a transport and the receiver its inbound events arrive on.
    pub fn new() -> (Self, UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            events,
            link: Mutex::new(None),
        };
        (transport, rx)
    }

    fn send_frame(&self, frame: &ClientMessage) -> Result<(), TransportError> {
        let json = serde_json::to_string(frame)?;
        let link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        let link = link.as_ref().ok_or(TransportError::NotConnected)?;
        link.outbound
            .send(WsMessage::text(json))
            .map_err(|_| TransportError::NotConnected)
    }
}

impl Transport for WsTransport {
    async fn connect(&self, options: &ConnectOptions) -> Result<String, TransportError> {
        let url = options.url();
        let (ws_stream, _response) = timeout(options.timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)??;
        let (mut sink, mut stream) = ws_stream.split();

        let hello = ClientMessage::Connect {
            client_id: options.client_id.clone(),
            username: options.username.clone(),
            password: options.password.clone(),
        };
        sink.send(WsMessage::text(serde_json::to_string(&hello)?))
            .await?;

        let session_id = timeout(options.timeout, read_conn_ack(&mut stream))
            .await
            .map_err(|_| TransportError::Timeout)??;
        debug!("Connected to {url} as {session_id}");

        let (outbound, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let closing = Arc::new(AtomicBool::new(false));
        let keep_alive = options.keep_alive.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ping = tokio::time::interval(keep_alive);
            ping.tick().await;
            loop {
                let frame = tokio::select! {
                    next = rx.recv() => match next {
                        Some(frame) => frame,
                        None => break,
                    },
                    _ = ping.tick() => WsMessage::Ping(Default::default()),
                };
                if let Err(e) = sink.send(frame).await {
                    debug!("Send loop stopped: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(read_loop(stream, self.events.clone(), closing.clone()));

        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        *link = Some(Link { outbound, closing });
        Ok(session_id)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let link = self
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let link = link.ok_or(TransportError::NotConnected)?;
        link.closing.store(true, Ordering::SeqCst);

        let json = serde_json::to_string(&ClientMessage::Disconnect {})?;
        let _ = link.outbound.send(WsMessage::text(json));
        let _ = link.outbound.send(WsMessage::Close(None));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.send_frame(&ClientMessage::Subscribe {
            topic: topic.to_string(),
            qos,
        })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.send_frame(&ClientMessage::Unsubscribe {
            topic: topic.to_string(),
        })
    }

    async fn publish(&self, message: Message) -> Result<(), TransportError> {
        self.send_frame(&ClientMessage::Publish {
            topic: message.topic,
            payload: message.payload,
            qos: message.qos,
            attributes: message.attributes,
        })
    }
}

async fn read_conn_ack<S>(stream: &mut S) -> Result<String, TransportError>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let frame = frame?;
        if !frame.is_text() {
            continue;
        }
        return match serde_json::from_str::<ServerMessage>(frame.to_text()?)? {
            ServerMessage::ConnAck { session_id } => Ok(session_id),
            ServerMessage::ConnectRejected { reason } => Err(TransportError::Rejected(reason)),
            ServerMessage::Error { message } => Err(TransportError::Protocol(message)),
            other => Err(TransportError::Protocol(format!(
                "unexpected frame before conn_ack: {other:?}"
            ))),
        };
    }
    Err(TransportError::Protocol(
        "connection closed during handshake".to_string(),
    ))
}

async fn read_loop<S>(mut stream: S, events: UnboundedSender<TransportEvent>, closing: Arc<AtomicBool>)
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    let mut server_reason = None;

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Receive loop stopped: {e}");
                break;
            }
        };
        if frame.is_close() {
            break;
        }
        if !frame.is_text() {
            continue;
        }
        let Ok(text) = frame.to_text() else {
            continue;
        };
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(ServerMessage::Message(message)) => {
                let _ = events.send(TransportEvent::Message(message));
            }
            Ok(ServerMessage::Disconnect { reason }) => server_reason = Some(reason),
            Ok(ServerMessage::Error { message }) => warn!("Broker reported an error: {message}"),
            Ok(other) => debug!("Ignoring unexpected frame: {other:?}"),
            Err(e) => warn!(
                "Invalid server frame: {e} | {}",
                text.chars().take(100).collect::<String>()
            ),
        }
    }

    let reason = if closing.load(Ordering::SeqCst) {
        DisconnectReason::NormalDisconnection
    } else {
        server_reason.unwrap_or(DisconnectReason::UnspecifiedError)
    };
    let _ = events.send(TransportEvent::Disconnected(reason));
}
