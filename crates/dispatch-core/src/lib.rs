//! Real-time driver presence and trip-dispatch coordination.
//!
//! Sits between driver mobile connections, dashboard observers and the
//! authoritative backend services (driver profile store and trip service).
//! The coordinator tracks which drivers are reachable, runs the presence
//! state machine, ingests location samples, arbitrates broadcast trip
//! offers and fans events out to whoever needs them.
//!
//! Transport is out of scope here: the gateway crate feeds the
//! [`Coordinator`] parsed [`dispatch_proto::ClientMessage`]s and owns the
//! sockets behind the per-connection event channels.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod arbiter;
pub mod coordinator;
pub mod error;
pub mod fanout;
pub mod geo;
mod keyed_lock;
pub mod location;
pub mod presence;
pub mod registry;
pub mod services;

pub use coordinator::Coordinator;
pub use error::{CoordinatorError, PresenceError};
pub use fanout::EventSender;
