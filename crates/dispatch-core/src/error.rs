//! Coordinator error taxonomy.
//!
//! Classifies failures by how the gateway must react:
//! - connection-fatal errors close the socket (bad credential, unknown
//!   driver),
//! - everything else is surfaced as an `error` event while the connection
//!   stays open.
//!
//! Downstream service failures are relayed as generic failures; the
//! coordinator never retries writes itself.

use dispatch_proto::{DriverId, TripId};
use thiserror::Error;

use crate::services::{AuthError, StoreError, TripServiceError};

/// Errors produced by the presence state machine.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// No stored profile for this driver.
    #[error("unknown driver: {0}")]
    NotFound(DriverId),

    /// Driver is already on a different trip.
    #[error("driver {driver_id} is already on trip {current_trip_id}")]
    TripConflict {
        /// Driver whose assignment was rejected.
        driver_id: DriverId,
        /// Trip the driver is currently on.
        current_trip_id: TripId,
    },

    /// The profile store failed.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PresenceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

/// Top-level error for coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Missing or invalid credential. Refuse the connection.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Unknown driver or profile. Close the connection.
    #[error("unknown driver: {0}")]
    NotFound(DriverId),

    /// Malformed or out-of-place message. Connection stays open.
    #[error("invalid message: {0}")]
    Validation(String),

    /// Conflicting state transition (double trip assignment, trip taken).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The external profile store failed.
    #[error("profile store error: {0}")]
    Store(StoreError),

    /// The external trip service failed.
    #[error("trip service error: {0}")]
    Trip(#[from] TripServiceError),
}

impl CoordinatorError {
    /// True when the gateway must close the connection rather than emit an
    /// `error` event.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::NotFound(_))
    }
}

impl From<PresenceError> for CoordinatorError {
    fn from(err: PresenceError) -> Self {
        match err {
            PresenceError::NotFound(id) => Self::NotFound(id),
            PresenceError::TripConflict { .. } => Self::Conflict(err.to_string()),
            PresenceError::Store(e) => Self::Store(e),
        }
    }
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_not_found_are_fatal() {
        assert!(CoordinatorError::Auth(AuthError::MissingToken).is_connection_fatal());
        assert!(CoordinatorError::NotFound("d1".to_string()).is_connection_fatal());
    }

    #[test]
    fn validation_and_conflict_are_recoverable() {
        assert!(!CoordinatorError::Validation("bad".to_string()).is_connection_fatal());
        assert!(!CoordinatorError::Conflict("taken".to_string()).is_connection_fatal());
    }

    #[test]
    fn store_not_found_maps_to_coordinator_not_found() {
        let err: CoordinatorError = StoreError::NotFound("d9".to_string()).into();
        assert!(matches!(err, CoordinatorError::NotFound(id) if id == "d9"));
    }
}
