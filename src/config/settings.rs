use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the broker server, the client session and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub client: ClientSettings,
    pub log_level: String,
}

/// Configuration settings for the broker server.
///
/// Defines the bind address, the single static credential pair and the
/// keep-alive interval clients are expected to honour.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u64,
}

impl ServerSettings {
    /// How long a session may stay silent before it is dropped: one and a
    /// half keep-alive intervals.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_secs.max(1) * 1500)
    }
}

/// Configuration settings for the client session.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub reconnect_delay_secs: u64,
    pub connect_timeout_secs: u64,
    pub keep_alive_secs: u64,
    pub draw_throttle_ms: u64,
    pub realtime_topic: String,
    pub max_pending_messages: usize,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub client: Option<PartialClientSettings>,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub reconnect_delay_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub keep_alive_secs: Option<u64>,
    pub draw_throttle_ms: Option<u64>,
    pub realtime_topic: Option<String>,
    pub max_pending_messages: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 1883,
                username: "admin".to_string(),
                password: "1234".to_string(),
                keep_alive_secs: 15,
            },
            client: ClientSettings {
                host: "127.0.0.1".to_string(),
                port: 1883,
                username: "admin".to_string(),
                password: "1234".to_string(),
                client_id: "client01".to_string(),
                reconnect_delay_secs: 20,
                connect_timeout_secs: 10,
                keep_alive_secs: 15,
                draw_throttle_ms: 50,
                realtime_topic: "DaG".to_string(),
                max_pending_messages: 1000,
            },
            log_level: "info".to_string(),
        }
    }
}
