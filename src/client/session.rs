//! Client session manager
//!
//! `SessionManager` owns one client's view of the broker: connection state,
//! the desired subscription set, the queue of publishes made while offline
//! and the stroke reassembler for the real-time channel.
//!
//! Inbound transport traffic enters through `handle_event` only, which makes
//! every state transition in one place. User intents (`connect`, `publish`,
//! `subscribe`, drawing) are async methods that may run concurrently with
//! the event loop; all shared state sits behind one mutex and the guard is
//! never held across an await.
//!
//! Reconnection policy: a transient disconnect moves to `Reconnecting`,
//! waits `reconnect_delay`, and tries once with the last connect options.
//! A failed attempt is reported and left to the user.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::broker::message::{
    Attributes, BASE_SENDER, BASE_TOPIC, Message, QoS, SENDER_ATTRIBUTE, SUBSCRIBERS_TOPIC,
    is_control_topic, split_list,
};
use crate::client::desired::{DesiredSubscription, DesiredSubscriptions};
use crate::client::draw::{DrawCommand, DrawThrottle, Point, is_draw_payload};
use crate::client::observer::{ConnectionState, Severity, SessionObserver, log_line, report};
use crate::client::pending::PendingQueue;
use crate::client::reassembler::StreamReassembler;
use crate::config::ClientSettings;
use crate::transport::{ConnectOptions, DisconnectReason, Transport, TransportEvent};
use crate::utils::error::{ConnectError, SessionError, TransportError};

/// Tunables of a session that are not per-connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub reconnect_delay: Duration,
    pub draw_throttle: Duration,
    pub realtime_topic: String,
    pub max_pending: usize,
}

impl SessionConfig {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            reconnect_delay: Duration::from_secs(settings.reconnect_delay_secs),
            draw_throttle: Duration::from_millis(settings.draw_throttle_ms),
            realtime_topic: settings.realtime_topic.clone(),
            max_pending: settings.max_pending_messages,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(20),
            draw_throttle: Duration::from_millis(50),
            realtime_topic: "DaG".to_string(),
            max_pending: 1000,
        }
    }
}

struct Inner {
    state: ConnectionState,
    session_id: Option<String>,
    last_options: Option<ConnectOptions>,
    desired: DesiredSubscriptions,
    pending: PendingQueue,
    // Set while the pending queue is being flushed. New publishes queue
    // behind it to keep FIFO order.
    draining: bool,
    reassembler: StreamReassembler,
    throttle: DrawThrottle,
    requested_topic: Option<String>,
}

impl Inner {
    /// A publish may skip the queue only when nothing older is waiting.
    fn can_send_directly(&self) -> bool {
        self.state == ConnectionState::Connected && !self.draining && self.pending.is_empty()
    }

    /// Queues a message. While connected with nobody flushing, the caller
    /// becomes the one to flush.
    fn queue(&mut self, message: Message) -> Queued {
        let topic = message.topic.clone();
        let evicted = self.pending.push(message);
        let drain = self.state == ConnectionState::Connected && !self.draining;
        if drain {
            self.draining = true;
        }
        Queued {
            topic,
            evicted,
            waiting: self.pending.len(),
            drain,
        }
    }
}

struct Queued {
    topic: String,
    evicted: Option<Message>,
    waiting: usize,
    drain: bool,
}

pub struct SessionManager<T: Transport> {
    transport: Arc<T>,
    observer: Arc<dyn SessionObserver>,
    config: Arc<SessionConfig>,
    inner: Arc<Mutex<Inner>>,
}

impl<T: Transport> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            observer: self.observer.clone(),
            config: self.config.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T, observer: Arc<dyn SessionObserver>, config: SessionConfig) -> Self {
        let inner = Inner {
            state: ConnectionState::Disconnected,
            session_id: None,
            last_options: None,
            desired: DesiredSubscriptions::new(),
            pending: PendingQueue::with_capacity(config.max_pending),
            draining: false,
            reassembler: StreamReassembler::new(),
            throttle: DrawThrottle::new(config.draw_throttle),
            requested_topic: None,
        };
        Self {
            transport: Arc::new(transport),
            observer,
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// The id the broker assigned on the current connection.
    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn desired_subscriptions(&self) -> Vec<DesiredSubscription> {
        self.lock().desired.snapshot()
    }

    /// Points of `sender`'s in-progress stroke.
    pub fn stroke(&self, sender: &str) -> Option<Vec<Point>> {
        self.lock()
            .reassembler
            .stroke(sender)
            .map(|stroke| stroke.points.clone())
    }

    /// Processes transport events until the transport is dropped.
    pub async fn run(self, mut events: UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            if catch_unwind(AssertUnwindSafe(|| self.handle_event(event))).is_err() {
                error!("Session event handler panicked; continuing");
            }
        }
        debug!("Transport event channel closed");
    }

    /// Single entry point for inbound transport events.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.on_message(message),
            TransportEvent::Disconnected(reason) => self.on_disconnected(reason),
        }
    }

    /// Validates `options` and makes one connection attempt.
    pub async fn connect(&self, options: ConnectOptions) -> Result<(), ConnectError> {
        if let Err(err) = options.validate() {
            report(self.observer.as_ref(), Severity::Error, err.to_string());
            return Err(err);
        }
        {
            let mut inner = self.lock();
            if matches!(
                inner.state,
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                return Err(ConnectError::Other(format!("session is {}", inner.state)));
            }
            inner.last_options = Some(options.clone());
        }
        self.establish(&options).await
    }

    /// Client-initiated disconnect. Never followed by a reconnect.
    pub async fn disconnect(&self) {
        let previous = {
            let mut inner = self.lock();
            let previous = inner.state;
            inner.state = ConnectionState::Disconnected;
            inner.session_id = None;
            previous
        };
        if previous != ConnectionState::Disconnected {
            self.observer
                .on_connection_state_changed(ConnectionState::Disconnected);
        }
        match self.transport.disconnect().await {
            Ok(()) => log_line(self.observer.as_ref(), Severity::Info, "Disconnected"),
            Err(TransportError::NotConnected) => debug!("Disconnect requested while not connected"),
            Err(e) => report(
                self.observer.as_ref(),
                Severity::Warning,
                format!("Disconnect failed: {e}"),
            ),
        }
    }

    /// Publishes now when connected with nothing older queued. Otherwise the
    /// message goes to the back of the queue, which is flushed right away if
    /// connected or on the next connect. Queueing counts as success.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: QoS,
        attributes: Attributes,
    ) -> Result<(), SessionError> {
        if topic.is_empty() {
            return Err(SessionError::InvalidArgument("topic must not be empty".to_string()));
        }
        if payload.is_empty() {
            return Err(SessionError::InvalidArgument("payload must not be empty".to_string()));
        }
        let mut message = Message::new(topic, payload, qos);
        message.attributes = attributes;

        let queued = {
            let mut inner = self.lock();
            if inner.can_send_directly() {
                None
            } else {
                Some(inner.queue(message.clone()))
            }
        };
        let queued = match queued {
            Some(queued) => queued,
            None => match self.send(message.clone()).await {
                Ok(()) => return Ok(()),
                Err(TransportError::NotConnected) => {
                    let mut inner = self.lock();
                    inner.queue(message)
                }
                Err(e) => return Err(e.into()),
            },
        };
        let drain = queued.drain;
        self.report_queued(queued);
        if drain {
            self.drain_pending().await;
        }
        Ok(())
    }

    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SessionError> {
        if topic.is_empty() {
            return Err(SessionError::InvalidArgument("topic must not be empty".to_string()));
        }
        let connected = {
            let mut inner = self.lock();
            inner.desired.insert(topic, qos);
            inner.state == ConnectionState::Connected
        };
        if connected {
            self.transport.subscribe(topic, qos).await?;
            log_line(
                self.observer.as_ref(),
                Severity::Info,
                format!("Subscribed to {topic}"),
            );
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
        if is_control_topic(topic) {
            report(
                self.observer.as_ref(),
                Severity::Warning,
                format!("{topic} is a control topic and stays subscribed"),
            );
            return Err(SessionError::ControlTopic(topic.to_string()));
        }
        let connected = {
            let mut inner = self.lock();
            inner.desired.remove(topic);
            inner.state == ConnectionState::Connected
        };
        if connected {
            self.transport.unsubscribe(topic).await?;
            log_line(
                self.observer.as_ref(),
                Severity::Info,
                format!("Unsubscribed from {topic}"),
            );
        }
        Ok(())
    }

    /// Asks the broker for the subscribers of `topic`. The answer arrives as
    /// `on_subscribers_changed`.
    pub async fn request_subscribers(&self, topic: &str) -> Result<(), SessionError> {
        self.lock().requested_topic = Some(topic.to_string());
        self.publish(SUBSCRIBERS_TOPIC, topic, QoS::ExactlyOnce, Attributes::new())
            .await
    }

    /// Emits one point of the local stroke, at most once per throttle
    /// interval. Returns whether a message was sent.
    pub async fn draw_point(&self, point: Point) -> bool {
        let admitted = {
            let mut inner = self.lock();
            inner.state == ConnectionState::Connected && inner.throttle.admit(Instant::now())
        };
        admitted && self.send_draw(DrawCommand::Point(point)).await
    }

    /// Ends the local stroke. Never throttled.
    pub async fn draw_end(&self) -> bool {
        self.send_draw(DrawCommand::End).await
    }

    /// Sends a complete stroke as one message.
    pub async fn send_stroke(&self, points: &[Point]) -> bool {
        if points.is_empty() {
            return false;
        }
        self.send_draw(DrawCommand::BatchStroke(points.to_vec()))
            .await
    }

    /// Drops every remote stroke in progress.
    pub fn clear_strokes(&self) {
        self.lock().reassembler.clear();
        self.observer.on_strokes_cleared();
    }

    fn set_state(&self, state: ConnectionState) {
        self.lock().state = state;
        self.observer.on_connection_state_changed(state);
    }

    async fn establish(&self, options: &ConnectOptions) -> Result<(), ConnectError> {
        self.set_state(ConnectionState::Connecting);
        log_line(
            self.observer.as_ref(),
            Severity::Info,
            format!("Connecting to {} as {}", options.url(), options.client_id),
        );
        match self.transport.connect(options).await {
            Ok(session_id) => {
                self.on_connected(session_id).await;
                Ok(())
            }
            Err(e) => {
                let err = ConnectError::from(e);
                self.set_state(ConnectionState::Disconnected);
                report(
                    self.observer.as_ref(),
                    Severity::Error,
                    format!("Connection failed: {err}"),
                );
                Err(err)
            }
        }
    }

    async fn on_connected(&self, session_id: String) {
        {
            let mut inner = self.lock();
            inner.state = ConnectionState::Connected;
            inner.session_id = Some(session_id.clone());
            inner.draining = true;
        }
        self.observer
            .on_connection_state_changed(ConnectionState::Connected);

        self.drain_pending().await;

        let desired = self.lock().desired.snapshot();
        for entry in &desired {
            if let Err(e) = self.transport.subscribe(&entry.topic, entry.qos).await {
                report(
                    self.observer.as_ref(),
                    Severity::Warning,
                    format!("Resubscribe to {} failed: {e}", entry.topic),
                );
            }
        }

        let defaults = [
            (BASE_TOPIC, QoS::ExactlyOnce),
            (SUBSCRIBERS_TOPIC, QoS::ExactlyOnce),
            (self.config.realtime_topic.as_str(), QoS::AtMostOnce),
        ];
        for (topic, qos) in defaults {
            let wanted = {
                let mut inner = self.lock();
                let wanted = !inner.desired.contains(topic);
                if wanted {
                    inner.desired.insert(topic, qos);
                }
                wanted
            };
            if !wanted {
                continue;
            }
            if let Err(e) = self.transport.subscribe(topic, qos).await {
                report(
                    self.observer.as_ref(),
                    Severity::Warning,
                    format!("Subscribe to {topic} failed: {e}"),
                );
            }
        }

        report(
            self.observer.as_ref(),
            Severity::Info,
            format!("Connected as {session_id}"),
        );
    }

    /// Publishes queued messages in order. Stops at the first failure and
    /// puts that message back at the head of the queue; the next publish or
    /// connect flushes again.
    async fn drain_pending(&self) {
        let mut sent = 0usize;
        loop {
            let next = {
                let mut inner = self.lock();
                let next = inner.pending.pop();
                if next.is_none() {
                    inner.draining = false;
                }
                next
            };
            let Some(message) = next else {
                break;
            };
            if let Err(e) = self.send(message.clone()).await {
                {
                    let mut inner = self.lock();
                    inner.pending.requeue(message);
                    inner.draining = false;
                }
                report(
                    self.observer.as_ref(),
                    Severity::Warning,
                    format!("Flushing queued messages stopped: {e}"),
                );
                break;
            }
            sent += 1;
        }
        if sent > 0 {
            log_line(
                self.observer.as_ref(),
                Severity::Info,
                format!("Sent {sent} queued message(s)"),
            );
        }
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        let (previous, retry) = {
            let mut inner = self.lock();
            let previous = inner.state;
            let retry = previous != ConnectionState::Disconnected
                && reason.is_transient()
                && inner.last_options.is_some();
            inner.state = if retry {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Disconnected
            };
            inner.session_id = None;
            inner.draining = false;
            (previous, retry)
        };
        if previous == ConnectionState::Disconnected {
            debug!("Disconnect event ({reason}) while already disconnected");
            return;
        }

        self.observer
            .on_connection_state_changed(ConnectionState::Disconnected);
        let severity = if reason == DisconnectReason::NormalDisconnection {
            Severity::Info
        } else {
            Severity::Warning
        };
        report(
            self.observer.as_ref(),
            severity,
            format!("Disconnected: {reason}"),
        );

        if retry {
            self.observer
                .on_connection_state_changed(ConnectionState::Reconnecting);
            let delay = self.config.reconnect_delay;
            log_line(
                self.observer.as_ref(),
                Severity::Info,
                format!("Reconnecting in {}s", delay.as_secs()),
            );
            let session = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                session.reconnect_once().await;
            });
        }
    }

    async fn reconnect_once(&self) {
        let options = {
            let inner = self.lock();
            if inner.state != ConnectionState::Reconnecting {
                debug!("Reconnect abandoned; session is {}", inner.state);
                return;
            }
            inner.last_options.clone()
        };
        let Some(options) = options else {
            return;
        };
        if self.establish(&options).await.is_err() {
            report(
                self.observer.as_ref(),
                Severity::Error,
                "Automatic reconnect failed; connect manually",
            );
        }
    }

    fn on_message(&self, message: Message) {
        let session_id = self.session_id();
        let sender = message.sender().map(str::to_string);

        if message.topic == SUBSCRIBERS_TOPIC {
            if sender.is_none() || sender != session_id {
                return;
            }
            let requested = self.lock().requested_topic.clone();
            if requested.as_deref() == Some(message.payload.as_str()) {
                // Our own request coming back.
                return;
            }
            let subscribers = split_list(&message.payload);
            self.observer
                .on_subscribers_changed(requested.as_deref(), &subscribers);
            return;
        }

        if message.topic == BASE_TOPIC {
            if sender.as_deref() == Some(BASE_SENDER) {
                self.observer
                    .on_directory_changed(&split_list(&message.payload));
            } else {
                debug!("Ignoring Base message not sent by the broker");
            }
            return;
        }

        if message.topic == self.config.realtime_topic {
            if sender.is_some() && sender == session_id {
                return;
            }
            let sender = sender.unwrap_or_else(|| "unknown".to_string());
            match DrawCommand::parse(&message.payload) {
                DrawCommand::Unrecognized if is_draw_payload(&message.payload) => {
                    debug!("Dropping malformed drawing payload from {sender}");
                }
                DrawCommand::Unrecognized => self.deliver(&message),
                command => {
                    let update = self.lock().reassembler.apply(&sender, command);
                    if let Some(update) = update {
                        self.observer.on_stroke_updated(&update);
                    }
                }
            }
            return;
        }

        self.deliver(&message);
    }

    fn deliver(&self, message: &Message) {
        log_line(
            self.observer.as_ref(),
            Severity::Info,
            format!(
                "Received on {} from {}: {}",
                message.topic,
                message.sender().unwrap_or("unknown"),
                message.payload
            ),
        );
        self.observer.on_message(message);
    }

    fn report_queued(&self, queued: Queued) {
        if let Some(evicted) = queued.evicted {
            report(
                self.observer.as_ref(),
                Severity::Warning,
                format!("Pending queue full; dropped oldest message to {}", evicted.topic),
            );
        }
        let text = if queued.drain {
            format!("Flushing {} queued message(s)", queued.waiting)
        } else {
            format!(
                "Queued message to {} ({} waiting)",
                queued.topic, queued.waiting
            )
        };
        log_line(self.observer.as_ref(), Severity::Info, text);
    }

    /// Hands a message to the transport, stamping the sender attribute with
    /// the current session id when the caller left it unset.
    async fn send(&self, mut message: Message) -> Result<(), TransportError> {
        if !message.attributes.contains_key(SENDER_ATTRIBUTE) {
            if let Some(session_id) = self.session_id() {
                message = message.with_sender(session_id);
            }
        }
        self.transport.publish(message).await
    }

    async fn send_draw(&self, command: DrawCommand) -> bool {
        if self.state() != ConnectionState::Connected {
            debug!("Not connected; dropping drawing event");
            return false;
        }
        let message = Message::new(
            self.config.realtime_topic.as_str(),
            command.encode(),
            QoS::AtMostOnce,
        );
        match self.send(message).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Drawing event not sent: {e}");
                false
            }
        }
    }
}
