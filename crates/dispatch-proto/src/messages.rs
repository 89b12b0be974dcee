//! Client and server event payloads.
//!
//! One tagged variant per message type; the schema is validated at the
//! boundary by serde before any handler logic runs. Unknown `type` tags and
//! malformed shapes fail deserialization and surface as validation errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DriverId, GeoPoint, Trip, TripId, TripStatus};

/// Messages a driver connection may send to the coordinator.
///
/// Dashboard observers are read-only and have no client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Driver toggles their availability (and optionally their online flag).
    ///
    /// The effective state may differ from the request: availability is
    /// coerced against the online flag and any active trip.
    #[serde(rename = "driver:set_availability", rename_all = "camelCase")]
    SetAvailability {
        /// Requested availability.
        available: bool,
        /// Requested online flag; current value kept when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        online: Option<bool>,
        /// Optional position attached to the request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<GeoPoint>,
    },

    /// Periodic position sample from the driver's device.
    #[serde(rename = "driver:location_update", rename_all = "camelCase")]
    LocationUpdate {
        /// Latitude in degrees.
        lat: f64,
        /// Longitude in degrees.
        lng: f64,
        /// Reported GPS accuracy in meters, when available.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accuracy: Option<f64>,
    },

    /// Driver attempts to accept a broadcast trip offer.
    #[serde(rename = "trip_support_accept", rename_all = "camelCase")]
    TripSupportAccept {
        /// Trip being accepted.
        trip_id: TripId,
    },

    /// Driver declines a broadcast trip offer.
    #[serde(rename = "trip_support_decline", rename_all = "camelCase")]
    TripSupportDecline {
        /// Trip being declined.
        trip_id: TripId,
        /// Optional free-form reason relayed to the trip service.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Messages the coordinator sends to driver and observer connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Handshake acknowledgment for an authenticated driver connection.
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected {
        /// Authenticated subject id.
        user_id: DriverId,
    },

    /// Handshake acknowledgment for a dashboard observer connection.
    #[serde(rename = "dashboard:connected", rename_all = "camelCase")]
    DashboardConnected {
        /// Server time at attach.
        timestamp: DateTime<Utc>,
    },

    /// Effective availability after coercion; echoes the state the server
    /// actually persisted, never the raw request.
    #[serde(rename = "driver:availability_updated", rename_all = "camelCase")]
    AvailabilityUpdated {
        /// Effective availability.
        available: bool,
        /// Effective online flag.
        online: bool,
        /// Human-readable summary of the effective state.
        message: String,
    },

    /// Acknowledgment of a location sample. Distance/bearing are present
    /// only when the driver has an accepted trip with a known pickup.
    #[serde(rename = "driver:location_acknowledged", rename_all = "camelCase")]
    LocationAcknowledged {
        /// Server time the sample was recorded.
        timestamp: DateTime<Utc>,
        /// Echo of the reported accuracy.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accuracy: Option<f64>,
        /// Great-circle distance to the pickup point, meters.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distance_to_pickup: Option<f64>,
        /// Initial bearing towards the pickup point, degrees from north.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bearing: Option<f64>,
    },

    /// Driver's live position entered the pickup arrival radius.
    #[serde(rename = "driver:arrived", rename_all = "camelCase")]
    Arrived {
        /// Trip whose pickup was reached.
        trip_id: TripId,
        /// Distance to the pickup at the triggering sample, meters.
        distance_to_pickup: f64,
    },

    /// The accepting driver won the race.
    #[serde(rename = "trip_support_accepted", rename_all = "camelCase")]
    TripSupportAccepted {
        /// Accepted trip id.
        trip_id: TripId,
        /// The accepted trip as returned by the trip service.
        trip: Trip,
    },

    /// The accept was rejected (already taken, not found, ineligible).
    #[serde(rename = "trip_support_accept_failed", rename_all = "camelCase")]
    TripSupportAcceptFailed {
        /// Trip the accept targeted.
        trip_id: TripId,
        /// Downstream error, relayed untouched.
        error: String,
    },

    /// Another candidate won the race for a trip this driver was offered.
    #[serde(rename = "trip_support_accepted_by_other", rename_all = "camelCase")]
    TripSupportAcceptedByOther {
        /// Trip that was taken.
        trip_id: TripId,
    },

    /// Acknowledgment of a decline, sent regardless of downstream outcome.
    #[serde(rename = "trip_support_declined", rename_all = "camelCase")]
    TripSupportDeclined {
        /// Declined trip id.
        trip_id: TripId,
    },

    /// Recoverable error; the connection stays open.
    #[serde(rename = "error")]
    Error {
        /// What went wrong.
        message: String,
    },

    /// Observer event: a driver connection attached or detached.
    #[serde(rename = "driver:status_changed", rename_all = "camelCase")]
    DriverStatusChanged {
        /// Affected driver.
        driver_id: DriverId,
        /// Whether the driver is currently reachable.
        connected: bool,
        /// Driver's online flag after the change.
        online: bool,
        /// Server time of the change.
        timestamp: DateTime<Utc>,
    },

    /// Observer event: a driver's effective availability changed.
    #[serde(rename = "driver:availability_changed", rename_all = "camelCase")]
    DriverAvailabilityChanged {
        /// Affected driver.
        driver_id: DriverId,
        /// Effective availability.
        available: bool,
        /// Effective online flag.
        online: bool,
        /// Server time of the change.
        timestamp: DateTime<Utc>,
    },

    /// Observer event: a driver reported a new position.
    #[serde(rename = "driver:location_changed", rename_all = "camelCase")]
    DriverLocationChanged {
        /// Affected driver.
        driver_id: DriverId,
        /// Latitude in degrees.
        lat: f64,
        /// Longitude in degrees.
        lng: f64,
        /// Distance to the active trip's pickup, when one exists.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distance_to_pickup: Option<f64>,
        /// Bearing towards the active trip's pickup, when one exists.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bearing: Option<f64>,
        /// Server time the sample was recorded.
        timestamp: DateTime<Utc>,
    },

    /// Observer event: a trip changed status.
    #[serde(rename = "trip:status_changed", rename_all = "camelCase")]
    TripStatusChanged {
        /// Affected trip.
        trip_id: TripId,
        /// New status.
        status: TripStatus,
        /// Driver involved in the change, when attributable.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        driver_id: Option<DriverId>,
        /// Server time of the change.
        timestamp: DateTime<Utc>,
    },
}
