//! The `transport` module carries the pub/sub protocol over WebSockets.
//!
//! It defines the JSON frames exchanged between clients and the broker,
//! the broker-side WebSocket server, and the client-side `Transport` seam
//! with its WebSocket implementation.

pub mod client;
pub mod message;
pub mod websocket;

pub use client::{ConnectOptions, Transport, TransportEvent, WsTransport};
pub use message::{ClientMessage, DisconnectReason, ServerMessage};
pub use websocket::start_websocket_server;
