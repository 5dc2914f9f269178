//! The `client` module holds the client-side session.
//!
//! `SessionManager` drives one connection through a `Transport`, keeps the
//! desired subscriptions and offline queue, and turns real-time drawing
//! traffic into strokes. Front ends plug in through `SessionObserver`.

pub mod desired;
pub mod draw;
pub mod observer;
pub mod pending;
pub mod reassembler;
pub mod session;

pub use draw::{DrawCommand, Point};
pub use observer::{ConnectionState, LogLine, Notification, NoopObserver, SessionObserver, Severity};
pub use reassembler::{StreamReassembler, StrokeKind, StrokeUpdate};
pub use session::{SessionConfig, SessionManager};
