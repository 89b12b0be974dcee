//! In-memory collaborator implementations.
//!
//! Used by tests and the reference deployment. State lives behind
//! `Arc<Mutex<_>>` so clones share it; the accept compare-and-swap happens
//! under a single lock, which gives the exactly-one-winner guarantee the
//! trait demands.
//!
//! # Panics
//!
//! These implementations panic if a mutex is poisoned (a thread panicked
//! while holding the lock). Acceptable for test and reference code.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use dispatch_proto::{DriverId, Trip, TripId, TripStatus};

use super::{
    AuthError, AuthVerifier, DriverProfile, DriverProfileStore, ProfilePatch, StoreError,
    TripService, TripServiceError,
};

/// In-memory driver profile store.
#[derive(Clone, Default)]
pub struct MemoryProfileStore {
    inner: Arc<Mutex<HashMap<DriverId, DriverProfile>>>,
}

impl MemoryProfileStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile.
    #[allow(clippy::expect_used)]
    pub fn insert(&self, profile: DriverProfile) {
        self.inner
            .lock()
            .expect("mutex poisoned")
            .insert(profile.driver_id.clone(), profile);
    }

    /// Convenience: seed a fresh offline profile for `driver_id`.
    pub fn seed_driver(&self, driver_id: impl Into<DriverId>) {
        self.insert(DriverProfile::offline(driver_id));
    }
}

#[async_trait]
impl DriverProfileStore for MemoryProfileStore {
    #[allow(clippy::expect_used)]
    async fn find_by_user_id(&self, driver_id: &str) -> Result<DriverProfile, StoreError> {
        self.inner
            .lock()
            .expect("mutex poisoned")
            .get(driver_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(driver_id.to_string()))
    }

    #[allow(clippy::expect_used)]
    async fn update(
        &self,
        driver_id: &str,
        patch: ProfilePatch,
    ) -> Result<DriverProfile, StoreError> {
        let mut map = self.inner.lock().expect("mutex poisoned");
        let profile = map
            .get_mut(driver_id)
            .ok_or_else(|| StoreError::NotFound(driver_id.to_string()))?;

        if let Some(online) = patch.online {
            profile.online = online;
        }
        if let Some(available) = patch.available {
            profile.available = available;
        }
        if let Some(trip) = patch.current_trip_id {
            profile.current_trip_id = trip;
        }
        if let Some(socket) = patch.socket_id {
            profile.socket_id = socket;
        }

        Ok(profile.clone())
    }
}

/// In-memory trip service with an atomic accept.
#[derive(Clone, Default)]
pub struct MemoryTripService {
    inner: Arc<Mutex<HashMap<TripId, Trip>>>,
}

impl MemoryTripService {
    /// Create an empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a trip.
    #[allow(clippy::expect_used)]
    pub fn insert_trip(&self, trip: Trip) {
        self.inner.lock().expect("mutex poisoned").insert(trip.id.clone(), trip);
    }

    /// Convenience: create a pending offer for `candidates`.
    pub fn offer(
        &self,
        trip_id: impl Into<TripId>,
        pickup: Option<dispatch_proto::GeoPoint>,
        candidates: &[&str],
    ) -> Trip {
        let trip = Trip {
            id: trip_id.into(),
            status: TripStatus::Pending,
            pickup,
            accepted_by: None,
            candidate_driver_ids: candidates.iter().map(|c| (*c).to_string()).collect(),
        };
        self.insert_trip(trip.clone());
        trip
    }
}

#[async_trait]
impl TripService for MemoryTripService {
    #[allow(clippy::expect_used)]
    async fn accept_support_trip(
        &self,
        trip_id: &str,
        driver_id: &str,
    ) -> Result<Trip, TripServiceError> {
        // Whole decision under one lock: this is the compare-and-swap.
        let mut map = self.inner.lock().expect("mutex poisoned");
        let trip = map
            .get_mut(trip_id)
            .ok_or_else(|| TripServiceError::NotFound(trip_id.to_string()))?;

        if let Some(winner) = &trip.accepted_by {
            return Err(TripServiceError::AlreadyAccepted {
                trip_id: trip_id.to_string(),
                accepted_by: winner.clone(),
            });
        }

        if trip.status != TripStatus::Pending {
            return Err(TripServiceError::NotOpen {
                trip_id: trip_id.to_string(),
                status: format!("{:?}", trip.status).to_lowercase(),
            });
        }

        if !trip.is_candidate(driver_id) {
            return Err(TripServiceError::NotACandidate {
                trip_id: trip_id.to_string(),
                driver_id: driver_id.to_string(),
            });
        }

        trip.status = TripStatus::Accepted;
        trip.accepted_by = Some(driver_id.to_string());

        Ok(trip.clone())
    }

    #[allow(clippy::expect_used)]
    async fn decline_support_trip(
        &self,
        trip_id: &str,
        driver_id: &str,
        _reason: Option<&str>,
    ) -> Result<(), TripServiceError> {
        let mut map = self.inner.lock().expect("mutex poisoned");
        let trip = map
            .get_mut(trip_id)
            .ok_or_else(|| TripServiceError::NotFound(trip_id.to_string()))?;

        // Idempotent: removing a driver who already declined (or was never
        // a candidate) is a no-op.
        trip.candidate_driver_ids.retain(|d| d != driver_id);

        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn find_trip(&self, trip_id: &str) -> Result<Option<Trip>, TripServiceError> {
        Ok(self.inner.lock().expect("mutex poisoned").get(trip_id).cloned())
    }
}

/// Static token → subject verifier.
#[derive(Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: Arc<HashMap<String, DriverId>>,
}

impl StaticTokenVerifier {
    /// Build from (token, driver id) pairs.
    pub fn new<I, S, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<String>,
        D: Into<DriverId>,
    {
        let tokens = pairs.into_iter().map(|(t, d)| (t.into(), d.into())).collect();
        Self { tokens: Arc::new(tokens) }
    }
}

#[async_trait]
impl AuthVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<DriverId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}
