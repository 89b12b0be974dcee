//! Trip offer arbiter.
//!
//! Resolves accept/decline races when a dispatcher broadcasts one trip to
//! several candidate drivers. The authoritative decision is the trip
//! service's atomic compare-and-swap; the arbiter deliberately performs no
//! local check-then-act ahead of it, so it cannot introduce a second,
//! non-atomic point of decision. Its job is relaying the outcome.

use std::sync::Arc;

use dispatch_proto::Trip;
use tracing::{debug, warn};

use crate::services::{TripService, TripServiceError};

/// First-accept-wins arbitration over dispatcher trip offers.
pub struct TripOfferArbiter {
    trips: Arc<dyn TripService>,
}

impl TripOfferArbiter {
    /// Create an arbiter delegating to `trips`.
    pub fn new(trips: Arc<dyn TripService>) -> Self {
        Self { trips }
    }

    /// Attempt to accept `trip_id` for `driver_id`.
    ///
    /// On failure the service error is returned untouched and no state has
    /// been mutated anywhere.
    pub async fn accept(&self, trip_id: &str, driver_id: &str) -> Result<Trip, TripServiceError> {
        let result = self.trips.accept_support_trip(trip_id, driver_id).await;

        match &result {
            Ok(_) => debug!(trip_id, driver_id, "trip accept won"),
            Err(err) if err.is_conflict() => {
                debug!(trip_id, driver_id, %err, "trip accept lost");
            },
            Err(err) => warn!(trip_id, driver_id, %err, "trip accept failed downstream"),
        }

        result
    }

    /// Decline `trip_id` for `driver_id`.
    ///
    /// Downstream failures are logged and swallowed: the caller acknowledges
    /// the declining driver regardless of the outcome, and decline is
    /// idempotent with respect to repeated calls.
    pub async fn decline(&self, trip_id: &str, driver_id: &str, reason: Option<&str>) {
        match self.trips.decline_support_trip(trip_id, driver_id, reason).await {
            Ok(()) => debug!(trip_id, driver_id, reason = ?reason, "trip declined"),
            Err(err) => warn!(trip_id, driver_id, %err, "trip decline failed downstream"),
        }
    }
}
