//! Presence protocol types
//!
//! Message envelopes, client identity and topic rules shared by the
//! coordinator, the presence components and the transport adapters.

pub mod identity;
pub mod messages;
pub mod topics;

pub use identity::*;
pub use messages::*;
pub use topics::*;
