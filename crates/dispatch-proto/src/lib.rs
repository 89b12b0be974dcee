//! Wire message schema for the dispatch coordinator.
//!
//! Defines the shared data model (trips, coordinates, id aliases) and the
//! tagged client/server event enums exchanged over a duplex connection. The
//! wire format is JSON with an internally tagged `type` field; payload field
//! names are camelCase.
//!
//! This crate is transport-agnostic: the gateway decides how messages move,
//! the core decides what they mean.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod messages;

pub use messages::{ClientMessage, ServerMessage};
use serde::{Deserialize, Serialize};

/// Driver identifier, issued by the external auth verifier.
pub type DriverId = String;

/// Trip identifier, issued by the external dispatcher.
pub type TripId = String;

/// Connection identifier, assigned by the gateway at accept time.
pub type ConnectionId = u64;

/// A WGS84 coordinate pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, positive north.
    pub lat: f64,
    /// Longitude in degrees, positive east.
    pub lng: f64,
}

impl GeoPoint {
    /// Create a point from latitude/longitude degrees.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Lifecycle status of a trip, owned by the external trip service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    /// Broadcast to candidate drivers, nobody has accepted yet.
    Pending,
    /// Exactly one driver won the accept race.
    Accepted,
    /// Trip finished normally.
    Completed,
    /// Trip cancelled by dispatcher or rider.
    Cancelled,
}

/// A dispatcher-issued trip as seen by the coordinator.
///
/// The coordinator never mutates trips directly; it consumes them from the
/// trip service and relays them to connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    /// Trip identifier.
    pub id: TripId,
    /// Current lifecycle status.
    pub status: TripStatus,
    /// Pickup coordinate, when the dispatcher provided one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup: Option<GeoPoint>,
    /// Driver that won the accept race, once the trip is accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_by: Option<DriverId>,
    /// Drivers the offer was broadcast to, in dispatcher order.
    pub candidate_driver_ids: Vec<DriverId>,
}

impl Trip {
    /// True if `driver_id` is among the offer's candidates.
    pub fn is_candidate(&self, driver_id: &str) -> bool {
        self.candidate_driver_ids.iter().any(|d| d == driver_id)
    }
}
