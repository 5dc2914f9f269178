//! The boundary between a session and whatever presents it
//!
//! The session manager never touches UI state. Everything a front end needs
//! to show arrives through `SessionObserver`, called from the task that owns
//! the session's event loop; implementations marshal onto their own context.

use std::fmt;

use chrono::{DateTime, Local};

use crate::broker::message::Message;
use crate::client::reassembler::StrokeUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the delay before the single automatic reconnect attempt.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A persistent, timestamped line for the session log.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub severity: Severity,
    pub text: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

/// A transient message, shown briefly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub severity: Severity,
    pub text: String,
}

#[allow(unused_variables)]
pub trait SessionObserver: Send + Sync {
    fn on_connection_state_changed(&self, state: ConnectionState) {}

    /// The full topic catalogue, as last broadcast on `Base`.
    fn on_directory_changed(&self, topics: &[String]) {}

    /// Subscribers of the topic last requested with `request_subscribers`.
    fn on_subscribers_changed(&self, topic: Option<&str>, subscribers: &[String]) {}

    fn on_message(&self, message: &Message) {}

    fn on_stroke_updated(&self, update: &StrokeUpdate) {}

    fn on_strokes_cleared(&self) {}

    fn on_log_line(&self, line: &LogLine) {}

    fn on_notification(&self, notification: &Notification) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Emits a tracing event and forwards the same text to the observer's log.
pub(crate) fn log_line(observer: &dyn SessionObserver, severity: Severity, text: impl Into<String>) {
    let text = text.into();
    match severity {
        Severity::Info => tracing::info!("{text}"),
        Severity::Warning => tracing::warn!("{text}"),
        Severity::Error => tracing::error!("{text}"),
    }
    observer.on_log_line(&LogLine {
        timestamp: Local::now(),
        severity,
        text,
    });
}

/// Surfaces a failure both as a notification and as a log line.
pub(crate) fn report(observer: &dyn SessionObserver, severity: Severity, text: impl Into<String>) {
    let text = text.into();
    observer.on_notification(&Notification {
        severity,
        text: text.clone(),
    });
    log_line(observer, severity, text);
}
