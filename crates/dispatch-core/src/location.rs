//! Location tracker.
//!
//! Ingests periodic position samples, keeps only the most recent sample per
//! driver (not an append-only log), and computes proximity to the pickup
//! point of the driver's active trip. Samples are process-local and dropped
//! when the connection goes away.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use chrono::{DateTime, Utc};
use dispatch_proto::{DriverId, GeoPoint, TripId, TripStatus};
use tracing::warn;

use crate::{
    geo::{haversine_m, initial_bearing_deg},
    services::TripService,
};

/// Radius around the pickup point that counts as arrival, in meters.
pub const ARRIVAL_RADIUS_M: f64 = 200.0;

/// The most recent position sample for a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSample {
    /// Reported position.
    pub point: GeoPoint,
    /// Reported GPS accuracy in meters.
    pub accuracy: Option<f64>,
    /// Server time the sample was recorded.
    pub observed_at: DateTime<Utc>,
}

/// Proximity of a sample to an active trip's pickup point.
#[derive(Debug, Clone, PartialEq)]
pub struct PickupProximity {
    /// The active trip.
    pub trip_id: TripId,
    /// Great-circle distance to the pickup, meters.
    pub distance_to_pickup: f64,
    /// Initial bearing towards the pickup, degrees from north.
    pub bearing: f64,
    /// Whether the sample is inside the arrival radius. Not deduplicated:
    /// every in-radius sample reports arrival again.
    pub arrived: bool,
}

/// Result of ingesting one location sample.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationResult {
    /// When the sample was recorded.
    pub observed_at: DateTime<Utc>,
    /// Echo of the reported accuracy.
    pub accuracy: Option<f64>,
    /// Pickup proximity, present only when the driver has an accepted trip
    /// with a known pickup coordinate.
    pub proximity: Option<PickupProximity>,
}

/// Tracks the latest location sample per driver.
pub struct LocationTracker {
    trips: Arc<dyn TripService>,
    samples: StdMutex<HashMap<DriverId, LocationSample>>,
}

impl LocationTracker {
    /// Create a tracker that resolves active trips through `trips`.
    pub fn new(trips: Arc<dyn TripService>) -> Self {
        Self { trips, samples: StdMutex::new(HashMap::new()) }
    }

    /// Record a sample and compute pickup proximity for the active trip.
    ///
    /// When the driver has no active trip, the trip has no pickup, or the
    /// trip is not in the accepted state, only the plain acknowledgment is
    /// produced. Trip-service failures degrade to the plain acknowledgment
    /// with a warning; the coordinator does not retry.
    pub async fn on_location_update(
        &self,
        driver_id: &str,
        point: GeoPoint,
        accuracy: Option<f64>,
        current_trip_id: Option<&TripId>,
    ) -> LocationResult {
        let observed_at = Utc::now();
        let sample = LocationSample { point, accuracy, observed_at };

        {
            let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
            samples.insert(driver_id.to_string(), sample);
        }

        let proximity = match current_trip_id {
            Some(trip_id) => self.pickup_proximity(driver_id, point, trip_id).await,
            None => None,
        };

        LocationResult { observed_at, accuracy, proximity }
    }

    async fn pickup_proximity(
        &self,
        driver_id: &str,
        point: GeoPoint,
        trip_id: &str,
    ) -> Option<PickupProximity> {
        let trip = match self.trips.find_trip(trip_id).await {
            Ok(Some(trip)) => trip,
            Ok(None) => return None,
            Err(err) => {
                warn!(driver_id, trip_id, %err, "trip lookup failed, acknowledging without proximity");
                return None;
            },
        };

        if trip.status != TripStatus::Accepted {
            return None;
        }
        let pickup = trip.pickup?;

        let distance_to_pickup = haversine_m(point, pickup);
        Some(PickupProximity {
            trip_id: trip.id,
            distance_to_pickup,
            bearing: initial_bearing_deg(point, pickup),
            arrived: distance_to_pickup < ARRIVAL_RADIUS_M,
        })
    }

    /// The driver's latest sample, if one was recorded.
    pub fn latest(&self, driver_id: &str) -> Option<LocationSample> {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.get(driver_id).cloned()
    }

    /// Drop the driver's sample (called on disconnect).
    pub fn forget(&self, driver_id: &str) {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.remove(driver_id);
    }
}
