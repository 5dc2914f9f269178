//! The broker side of the topic directory protocol.
//!
//! - `Broker`: session registry, routing, and catalogue broadcasts.
//! - `TopicDirectory`: topic to subscriber-set mapping.
//! - `PublishGuard`: write protection for the control topics.

pub mod directory;
pub mod engine;
pub mod guard;
pub mod message;
pub mod session;
pub mod topic;

pub use directory::TopicDirectory;
pub use engine::Broker;
pub use guard::PublishGuard;

#[cfg(test)]
mod tests;
