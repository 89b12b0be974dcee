//! Presence state machine.
//!
//! Owns the online/available/on-trip state of every driver and is the only
//! code allowed to mutate it. State is persisted through the external
//! profile store so it outlives any single connection: presence describes
//! the driver, not the socket.
//!
//! Invariant: `available ⇒ online ∧ current_trip_id = None`. Violating
//! requests are coerced (available forced false), never rejected.
//!
//! All transitions for one driver are serialized behind a per-driver mutex,
//! covering the await on the profile store; transitions for different
//! drivers never block one another.

use std::sync::Arc;

use dispatch_proto::{ConnectionId, DriverId, TripId};
use tracing::debug;

use crate::{
    error::PresenceError,
    keyed_lock::KeyedLocks,
    services::{DriverProfileStore, ProfilePatch},
};

/// A driver's presence after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    /// Whether the driver has declared themselves online.
    pub online: bool,
    /// Whether the driver is available for new trips.
    pub available: bool,
    /// Trip the driver is currently serving, if any.
    pub current_trip_id: Option<TripId>,
}

impl Presence {
    /// The invariant every reachable presence value must satisfy.
    pub fn is_consistent(&self) -> bool {
        !self.available || (self.online && self.current_trip_id.is_none())
    }
}

/// The presence state machine.
pub struct PresenceMachine {
    store: Arc<dyn DriverProfileStore>,
    locks: KeyedLocks,
}

impl PresenceMachine {
    /// Create a machine persisting through `store`.
    pub fn new(store: Arc<dyn DriverProfileStore>) -> Self {
        Self { store, locks: KeyedLocks::new() }
    }

    /// Attach a connection to the driver's stored record.
    ///
    /// Does not force `online`: a driver's online/available status is
    /// controlled by explicit driver action, not mere network attachment.
    pub async fn on_connect(
        &self,
        driver_id: &str,
        connection_id: ConnectionId,
    ) -> Result<Presence, PresenceError> {
        let _guard = self.locks.acquire(driver_id).await;

        let profile = self
            .store
            .update(
                driver_id,
                ProfilePatch { socket_id: Some(Some(connection_id)), ..Default::default() },
            )
            .await?;

        debug!(driver_id, connection_id, online = profile.online, "driver connected");
        Ok(presence_of(&profile))
    }

    /// Apply an availability request and return the *effective* state.
    ///
    /// `online' = requested_online ?? current online`;
    /// `available' = requested_available ∧ online' ∧ no active trip`.
    /// Callers must branch on the returned value, not the request.
    pub async fn set_availability(
        &self,
        driver_id: &str,
        requested_available: bool,
        requested_online: Option<bool>,
    ) -> Result<Presence, PresenceError> {
        let _guard = self.locks.acquire(driver_id).await;

        let current = self.store.find_by_user_id(driver_id).await?;
        let online = requested_online.unwrap_or(current.online);
        let available = requested_available && online && current.current_trip_id.is_none();

        let profile = self
            .store
            .update(
                driver_id,
                ProfilePatch {
                    online: Some(online),
                    available: Some(available),
                    ..Default::default()
                },
            )
            .await?;

        debug!(
            driver_id,
            requested_available,
            requested_online = ?requested_online,
            online = profile.online,
            available = profile.available,
            coerced = available != requested_available,
            "availability transition"
        );
        Ok(presence_of(&profile))
    }

    /// Force the driver offline and unavailable, detaching the socket.
    ///
    /// `current_trip_id` is preserved: an in-progress trip must survive a
    /// transient network drop.
    pub async fn on_disconnect(&self, driver_id: &str) -> Result<Presence, PresenceError> {
        let _guard = self.locks.acquire(driver_id).await;

        let profile = self
            .store
            .update(
                driver_id,
                ProfilePatch {
                    online: Some(false),
                    available: Some(false),
                    socket_id: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        debug!(driver_id, trip = ?profile.current_trip_id, "driver disconnected");
        Ok(presence_of(&profile))
    }

    /// Put the driver on a trip. Fails with a conflict when the driver is
    /// already on one; forces `available = false` to keep the invariant.
    pub async fn assign_trip(
        &self,
        driver_id: &str,
        trip_id: &str,
    ) -> Result<Presence, PresenceError> {
        let _guard = self.locks.acquire(driver_id).await;

        let current = self.store.find_by_user_id(driver_id).await?;
        if let Some(existing) = current.current_trip_id {
            return Err(PresenceError::TripConflict {
                driver_id: driver_id.to_string(),
                current_trip_id: existing,
            });
        }

        let profile = self
            .store
            .update(
                driver_id,
                ProfilePatch {
                    available: Some(false),
                    current_trip_id: Some(Some(trip_id.to_string())),
                    ..Default::default()
                },
            )
            .await?;

        debug!(driver_id, trip_id, "trip assigned");
        Ok(presence_of(&profile))
    }

    /// Take the driver off their current trip. Clearing when no trip is
    /// active is a no-op.
    pub async fn clear_trip(&self, driver_id: &str) -> Result<Presence, PresenceError> {
        let _guard = self.locks.acquire(driver_id).await;

        let profile = self
            .store
            .update(
                driver_id,
                ProfilePatch { current_trip_id: Some(None), ..Default::default() },
            )
            .await?;

        debug!(driver_id, "trip cleared");
        Ok(presence_of(&profile))
    }

    /// The driver's current presence, read through the store.
    pub async fn current(&self, driver_id: &str) -> Result<Presence, PresenceError> {
        let profile = self.store.find_by_user_id(driver_id).await?;
        Ok(presence_of(&profile))
    }
}

fn presence_of(profile: &crate::services::DriverProfile) -> Presence {
    Presence {
        online: profile.online,
        available: profile.available,
        current_trip_id: profile.current_trip_id.clone(),
    }
}
