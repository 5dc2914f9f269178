//! # InkRelay
//!
//! `inkrelay` is a presence-aware pub/sub relay for shared drawing sessions.
//! A small in-memory broker keeps a directory of topics and their
//! subscribers and publishes it on reserved control topics; clients keep a
//! resilient session over WebSockets and reassemble the strokes other
//! participants draw in real time.
//!
//! ## Core Modules
//!
//! - `broker`: The topic directory, the control-topic write guard, and message routing.
//! - `client`: The session manager, offline queue, and stroke reassembly.
//! - `config`: Loading settings from `config/default` and the environment.
//! - `transport`: The JSON frame protocol, the WebSocket server, and the client transport.
//! - `utils`: Error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;
