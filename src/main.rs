//! CLI for InkRelay
//!
//! Subcommands:
//! - `server`: run the broker
//! - `client`: run an interactive session against a broker

use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use inkrelay::broker::Broker;
use inkrelay::broker::message::{Attributes, Message, QoS};
use inkrelay::client::{
    ConnectionState, Notification, Point, SessionConfig, SessionManager, SessionObserver,
    StrokeKind, StrokeUpdate,
};
use inkrelay::config::{Settings, load_config};
use inkrelay::transport::{ConnectOptions, WsTransport, start_websocket_server};
use inkrelay::utils::logging;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "inkrelay")]
enum Command {
    /// Start the broker
    Server,
    /// Run an interactive client session
    Client {
        /// Broker host (defaults to the configured client host)
        #[arg(long)]
        host: Option<String>,
        /// Broker port (defaults to the configured client port)
        #[arg(long)]
        port: Option<u16>,
        /// Client id to request from the broker
        #[arg(long)]
        client_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return;
        }
    };
    logging::init(&config.log_level);

    match cmd {
        Command::Server => {
            if let Err(e) = run_server(config).await {
                error!("Server failed: {e}");
            }
        }
        Command::Client {
            host,
            port,
            client_id,
        } => {
            let mut options = ConnectOptions::from_settings(&config.client);
            if let Some(host) = host {
                options.host = host;
            }
            if let Some(port) = port {
                options.port = port;
            }
            if let Some(client_id) = client_id {
                options.client_id = client_id;
            }
            if let Err(e) = run_client(config, options).await {
                error!("Client failed: {e}");
            }
        }
    }
}

async fn run_server(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let broker = Arc::new(Mutex::new(Broker::new()));

    tokio::select! {
        result = start_websocket_server(addr, broker.clone(), config.server.clone()) => {
            result?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Notifying sessions.");
            broker
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .shutdown();
            // Let the writers flush the shutdown frames.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    Ok(())
}

/// Prints session events to stdout.
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_connection_state_changed(&self, state: ConnectionState) {
        println!("[state] {state}");
    }

    fn on_directory_changed(&self, topics: &[String]) {
        println!("[topics] {}", topics.join(", "));
    }

    fn on_subscribers_changed(&self, topic: Option<&str>, subscribers: &[String]) {
        println!(
            "[subscribers of {}] {}",
            topic.unwrap_or("?"),
            subscribers.join(", ")
        );
    }

    fn on_message(&self, message: &Message) {
        println!(
            "[{}] {}: {}",
            message.topic,
            message.sender().unwrap_or("unknown"),
            message.payload
        );
    }

    fn on_stroke_updated(&self, update: &StrokeUpdate) {
        let last = update.points.last();
        match (update.kind, last) {
            (StrokeKind::InProgress, Some(point)) => {
                println!("[draw] {} at ({:.2}, {:.2})", update.sender, point.x, point.y)
            }
            (StrokeKind::Ended, _) => println!(
                "[draw] {} finished a stroke of {} points",
                update.sender,
                update.points.len()
            ),
            (StrokeKind::Batch, _) => println!(
                "[draw] {} sent a stroke of {} points",
                update.sender,
                update.points.len()
            ),
            (StrokeKind::InProgress, None) => {}
        }
    }

    fn on_strokes_cleared(&self) {
        println!("[draw] cleared");
    }

    fn on_notification(&self, notification: &Notification) {
        println!("[{:?}] {}", notification.severity, notification.text);
    }
}

const HELP: &str = "commands: sub <topic> [0|1|2], unsub <topic>, pub <topic> <text>, \
who <topic>, point <x> <y>, end, stroke <x,y;x,y;...>, clear, disconnect, connect, quit";

async fn run_client(
    config: Settings,
    options: ConnectOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let (transport, events) = WsTransport::new();
    let session = SessionManager::new(
        transport,
        Arc::new(ConsoleObserver),
        SessionConfig::from_settings(&config.client),
    );
    tokio::spawn(session.clone().run(events));

    if let Err(e) = session.connect(options.clone()).await {
        warn!("Initial connect failed: {e}");
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        let outcome = match command {
            "" => Ok(()),
            "sub" => {
                let mut parts = rest.split_whitespace();
                let topic = parts.next().unwrap_or_default();
                let qos = match parts.next() {
                    Some("1") => QoS::AtLeastOnce,
                    Some("2") => QoS::ExactlyOnce,
                    _ => QoS::AtMostOnce,
                };
                session.subscribe(topic, qos).await.map_err(|e| e.to_string())
            }
            "unsub" => session.unsubscribe(rest).await.map_err(|e| e.to_string()),
            "pub" => {
                let (topic, payload) = rest.split_once(' ').unwrap_or((rest, ""));
                session
                    .publish(topic, payload, QoS::AtLeastOnce, Attributes::new())
                    .await
                    .map_err(|e| e.to_string())
            }
            "who" => session
                .request_subscribers(rest)
                .await
                .map_err(|e| e.to_string()),
            "point" => {
                let text = if rest.contains(',') {
                    rest.to_string()
                } else {
                    rest.replacen(' ', ",", 1)
                };
                match Point::parse(&text) {
                    Some(point) => {
                        session.draw_point(point).await;
                        Ok(())
                    }
                    None => Err("usage: point <x> <y>".to_string()),
                }
            }
            "end" => {
                session.draw_end().await;
                Ok(())
            }
            "stroke" => {
                let points: Vec<Point> = rest.split(';').filter_map(Point::parse).collect();
                session.send_stroke(&points).await;
                Ok(())
            }
            "clear" => {
                session.clear_strokes();
                Ok(())
            }
            "disconnect" => {
                session.disconnect().await;
                Ok(())
            }
            "connect" => session
                .connect(options.clone())
                .await
                .map_err(|e| e.to_string()),
            "quit" => break,
            _ => Err(HELP.to_string()),
        };
        if let Err(e) = outcome {
            println!("{e}");
        }
    }

    session.disconnect().await;
    Ok(())
}
