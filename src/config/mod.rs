mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{ClientSettings, ServerSettings, Settings};

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Environment keys look like `INKRELAY__CLIENT__CLIENT_ID`
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("INKRELAY")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let server = partial.server;
    let client = partial.client;

    Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            username: server
                .as_ref()
                .and_then(|s| s.username.clone())
                .unwrap_or(default.server.username),
            password: server
                .as_ref()
                .and_then(|s| s.password.clone())
                .unwrap_or(default.server.password),
            keep_alive_secs: server
                .as_ref()
                .and_then(|s| s.keep_alive_secs)
                .unwrap_or(default.server.keep_alive_secs),
        },
        client: ClientSettings {
            host: client
                .as_ref()
                .and_then(|c| c.host.clone())
                .unwrap_or(default.client.host),
            port: client
                .as_ref()
                .and_then(|c| c.port)
                .unwrap_or(default.client.port),
            username: client
                .as_ref()
                .and_then(|c| c.username.clone())
                .unwrap_or(default.client.username),
            password: client
                .as_ref()
                .and_then(|c| c.password.clone())
                .unwrap_or(default.client.password),
            client_id: client
                .as_ref()
                .and_then(|c| c.client_id.clone())
                .unwrap_or(default.client.client_id),
            reconnect_delay_secs: client
                .as_ref()
                .and_then(|c| c.reconnect_delay_secs)
                .unwrap_or(default.client.reconnect_delay_secs),
            connect_timeout_secs: client
                .as_ref()
                .and_then(|c| c.connect_timeout_secs)
                .unwrap_or(default.client.connect_timeout_secs),
            keep_alive_secs: client
                .as_ref()
                .and_then(|c| c.keep_alive_secs)
                .unwrap_or(default.client.keep_alive_secs),
            draw_throttle_ms: client
                .as_ref()
                .and_then(|c| c.draw_throttle_ms)
                .unwrap_or(default.client.draw_throttle_ms),
            realtime_topic: client
                .as_ref()
                .and_then(|c| c.realtime_topic.clone())
                .unwrap_or(default.client.realtime_topic),
            max_pending_messages: client
                .as_ref()
                .and_then(|c| c.max_pending_messages)
                .unwrap_or(default.client.max_pending_messages),
        },
        log_level: partial.log_level.unwrap_or(default.log_level),
    }
}
