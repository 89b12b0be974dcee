//! External collaborator interfaces.
//!
//! The coordinator caches only ephemeral copies of state; these traits are
//! the authoritative sources. All are async because production
//! implementations sit behind a network, and object-safe so the coordinator
//! can hold them as `Arc<dyn ...>`.

mod memory;

use async_trait::async_trait;
use dispatch_proto::{ConnectionId, DriverId, Trip, TripId};
pub use memory::{MemoryProfileStore, MemoryTripService, StaticTokenVerifier};
use thiserror::Error;

/// A driver's persisted profile, as far as the coordinator cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverProfile {
    /// Driver identifier.
    pub driver_id: DriverId,
    /// Whether the driver has declared themselves online.
    pub online: bool,
    /// Whether the driver is available for new trips.
    pub available: bool,
    /// The trip the driver is currently serving, if any.
    pub current_trip_id: Option<TripId>,
    /// Connection currently attached to this driver, if any.
    pub socket_id: Option<ConnectionId>,
}

impl DriverProfile {
    /// A fresh offline profile for `driver_id`.
    pub fn offline(driver_id: impl Into<DriverId>) -> Self {
        Self {
            driver_id: driver_id.into(),
            online: false,
            available: false,
            current_trip_id: None,
            socket_id: None,
        }
    }
}

/// Partial update applied to a stored profile.
///
/// `None` leaves a field untouched; the nested options distinguish "clear"
/// from "keep" for nullable fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    /// New online flag.
    pub online: Option<bool>,
    /// New availability flag.
    pub available: Option<bool>,
    /// New current trip (`Some(None)` clears it).
    pub current_trip_id: Option<Option<TripId>>,
    /// New socket attachment (`Some(None)` clears it).
    pub socket_id: Option<Option<ConnectionId>>,
}

/// Errors from the driver profile store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No profile exists for this driver.
    #[error("driver profile not found: {0}")]
    NotFound(DriverId),

    /// The store could not be reached or failed internally.
    #[error("profile store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence for driver presence, outliving any single connection.
#[async_trait]
pub trait DriverProfileStore: Send + Sync + 'static {
    /// Look up a driver's profile.
    async fn find_by_user_id(&self, driver_id: &str) -> Result<DriverProfile, StoreError>;

    /// Apply a partial update and return the resulting profile.
    async fn update(&self, driver_id: &str, patch: ProfilePatch)
        -> Result<DriverProfile, StoreError>;
}

/// Errors from the trip service.
#[derive(Debug, Clone, Error)]
pub enum TripServiceError {
    /// No such trip.
    #[error("trip not found: {0}")]
    NotFound(TripId),

    /// The accept race was already won.
    #[error("trip {trip_id} already accepted by {accepted_by}")]
    AlreadyAccepted {
        /// The contested trip.
        trip_id: TripId,
        /// The winner.
        accepted_by: DriverId,
    },

    /// The driver was never offered this trip.
    #[error("driver {driver_id} is not a candidate for trip {trip_id}")]
    NotACandidate {
        /// The offered trip.
        trip_id: TripId,
        /// The ineligible driver.
        driver_id: DriverId,
    },

    /// The trip is no longer open for acceptance.
    #[error("trip {trip_id} is not open (status: {status})")]
    NotOpen {
        /// The trip.
        trip_id: TripId,
        /// Its current status.
        status: String,
    },

    /// The service could not be reached or failed internally.
    #[error("trip service unavailable: {0}")]
    Unavailable(String),
}

impl TripServiceError {
    /// True for errors caused by racing or ineligible accepts, as opposed to
    /// infrastructure failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyAccepted { .. } | Self::NotACandidate { .. } | Self::NotOpen { .. }
        )
    }
}

/// The authoritative trip owner.
///
/// `accept_support_trip` performs the atomic compare-and-swap of trip
/// ownership; for any trip, concurrent accepts see exactly one success. The
/// coordinator must not add its own check-then-act in front of it.
#[async_trait]
pub trait TripService: Send + Sync + 'static {
    /// Attempt to accept a trip on behalf of a driver.
    async fn accept_support_trip(
        &self,
        trip_id: &str,
        driver_id: &str,
    ) -> Result<Trip, TripServiceError>;

    /// Remove a driver from a trip's candidacy. Idempotent; declining a trip
    /// one was never offered is not an error.
    async fn decline_support_trip(
        &self,
        trip_id: &str,
        driver_id: &str,
        reason: Option<&str>,
    ) -> Result<(), TripServiceError>;

    /// Look up a trip (pickup coordinates, status, candidates).
    async fn find_trip(&self, trip_id: &str) -> Result<Option<Trip>, TripServiceError>;
}

/// Errors from credential verification.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("missing credential")]
    MissingToken,

    /// The credential did not verify.
    #[error("invalid credential")]
    InvalidToken,
}

/// Bearer-credential verification for driver connections.
#[async_trait]
pub trait AuthVerifier: Send + Sync + 'static {
    /// Verify a bearer token and return the subject id it belongs to.
    async fn verify(&self, token: &str) -> Result<DriverId, AuthError>;
}
