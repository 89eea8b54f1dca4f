//! Presence components driven by the coordinator
//!
//! - [`publisher`] - Debounced and immediate presence publishing, last-will construction
//! - [`heartbeat`] - Periodic online re-assertion while connected
//! - [`reconnect`] - Single pending reconnect timer with coalescing

pub mod heartbeat;
pub mod publisher;
pub mod reconnect;

pub use heartbeat::HeartbeatDriver;
pub use publisher::PresencePublisher;
pub use reconnect::ReconnectScheduler;
