//! The dispatch coordinator.
//!
//! Front door for the gateway: owns the connection registry, drives the
//! presence machine, location tracker and trip offer arbiter, and fans
//! results out to the affected driver, dashboard observers and trip rooms.
//!
//! The coordinator holds the registry behind a synchronous `RwLock` that is
//! never held across an await; all awaits on external services happen with
//! per-driver serialization inside the presence machine.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use dispatch_proto::{ClientMessage, ConnectionId, DriverId, GeoPoint, ServerMessage, Trip};
use tracing::{debug, info, warn};

use crate::{
    arbiter::TripOfferArbiter,
    error::{CoordinatorError, PresenceError},
    fanout::{EventSender, Fanout},
    location::LocationTracker,
    presence::{Presence, PresenceMachine},
    registry::{ConnectionRegistry, Unregistered},
    services::{AuthVerifier, DriverProfileStore, TripService},
};

/// Real-time driver presence and trip-dispatch coordinator.
pub struct Coordinator {
    registry: Arc<RwLock<ConnectionRegistry>>,
    presence: PresenceMachine,
    locations: LocationTracker,
    arbiter: TripOfferArbiter,
    fanout: Fanout,
    auth: Arc<dyn AuthVerifier>,
}

impl Coordinator {
    /// Create a coordinator over the given external services.
    pub fn new(
        store: Arc<dyn DriverProfileStore>,
        trips: Arc<dyn TripService>,
        auth: Arc<dyn AuthVerifier>,
    ) -> Self {
        let registry = Arc::new(RwLock::new(ConnectionRegistry::new()));
        Self {
            fanout: Fanout::new(Arc::clone(&registry)),
            registry,
            presence: PresenceMachine::new(store),
            locations: LocationTracker::new(Arc::clone(&trips)),
            arbiter: TripOfferArbiter::new(trips),
            auth,
        }
    }

    /// Authenticate and attach a driver connection.
    ///
    /// Verifies the bearer token, attaches the socket to the stored profile,
    /// registers the connection (superseding any previous one for the same
    /// driver) and acknowledges with `connected`. Errors here are
    /// connection-fatal: the gateway must close the socket.
    pub async fn connect_driver(
        &self,
        token: &str,
        connection_id: ConnectionId,
        sender: EventSender,
    ) -> Result<DriverId, CoordinatorError> {
        let driver_id = self.auth.verify(token).await?;
        let presence = self.presence.on_connect(&driver_id, connection_id).await?;

        let superseded = {
            let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
            registry.register(driver_id.clone(), connection_id)
        };
        if let Some(old) = superseded {
            debug!(driver_id, old, new = connection_id, "connection superseded");
            self.fanout.detach(old);
        }

        self.fanout.attach(connection_id, sender);
        self.fanout
            .to_connection(connection_id, ServerMessage::Connected { user_id: driver_id.clone() });
        self.fanout.to_observers(ServerMessage::DriverStatusChanged {
            driver_id: driver_id.clone(),
            connected: true,
            online: presence.online,
            timestamp: Utc::now(),
        });

        info!(driver_id, connection_id, "driver connected");
        Ok(driver_id)
    }

    /// Attach a read-only dashboard observer connection.
    pub fn connect_observer(&self, connection_id: ConnectionId, sender: EventSender) {
        {
            let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
            registry.register_observer(connection_id);
        }
        self.fanout.attach(connection_id, sender);
        self.fanout
            .to_connection(connection_id, ServerMessage::DashboardConnected { timestamp: Utc::now() });
        info!(connection_id, "observer connected");
    }

    /// Tear down a connection.
    ///
    /// For the driver's *current* connection this forces the driver offline
    /// and unavailable and drops their location sample; a superseded
    /// connection's late disconnect leaves the newer one untouched. Any
    /// in-progress trip survives the drop.
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        self.fanout.detach(connection_id);

        let removed = {
            let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
            registry.unregister(connection_id)
        };

        match removed {
            Some(Unregistered::Driver { driver_id, was_current: true }) => {
                self.locations.forget(&driver_id);
                match self.presence.on_disconnect(&driver_id).await {
                    Ok(_) => info!(driver_id, connection_id, "driver disconnected"),
                    Err(err) => {
                        warn!(driver_id, connection_id, %err, "disconnect cleanup failed");
                    },
                }
                self.fanout.to_observers(ServerMessage::DriverStatusChanged {
                    driver_id,
                    connected: false,
                    online: false,
                    timestamp: Utc::now(),
                });
            },
            Some(Unregistered::Driver { driver_id, was_current: false }) => {
                debug!(driver_id, connection_id, "superseded connection closed");
            },
            Some(Unregistered::Observer) => {
                info!(connection_id, "observer disconnected");
            },
            None => {},
        }
    }

    /// Handle a parsed client message from a driver connection.
    ///
    /// A fatal error means the gateway should close the connection; any other
    /// error has already been (or should be) surfaced as an `error` event
    /// with the connection left open.
    pub async fn handle_message(
        &self,
        connection_id: ConnectionId,
        message: ClientMessage,
    ) -> Result<(), CoordinatorError> {
        let driver_id = self.driver_for(connection_id)?;

        match message {
            ClientMessage::SetAvailability { available, online, location } => {
                self.handle_set_availability(&driver_id, available, online, location).await
            },
            ClientMessage::LocationUpdate { lat, lng, accuracy } => {
                self.handle_location_update(
                    &driver_id,
                    GeoPoint::new(lat, lng),
                    accuracy,
                )
                .await
            },
            ClientMessage::TripSupportAccept { trip_id } => {
                self.handle_trip_accept(connection_id, &driver_id, &trip_id).await;
                Ok(())
            },
            ClientMessage::TripSupportDecline { trip_id, reason } => {
                self.arbiter.decline(&trip_id, &driver_id, reason.as_deref()).await;
                self.fanout
                    .to_connection(connection_id, ServerMessage::TripSupportDeclined { trip_id });
                Ok(())
            },
        }
    }

    /// Send an event straight to one connection (used by the gateway for
    /// parse-error reports).
    pub fn send_to_connection(&self, connection_id: ConnectionId, message: ServerMessage) {
        self.fanout.to_connection(connection_id, message);
    }

    fn driver_for(&self, connection_id: ConnectionId) -> Result<DriverId, CoordinatorError> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        if registry.is_observer(connection_id) {
            return Err(CoordinatorError::Validation(
                "dashboard connections are read-only".to_string(),
            ));
        }
        let driver_id = registry
            .driver_for_connection(connection_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::Validation("unregistered connection".to_string()))?;

        // A superseded socket lingers in the registry until it closes, but
        // only the driver's current connection may act on their behalf.
        if registry.lookup(&driver_id) != Some(connection_id) {
            return Err(CoordinatorError::Validation("connection superseded".to_string()));
        }
        Ok(driver_id)
    }

    async fn handle_set_availability(
        &self,
        driver_id: &str,
        requested_available: bool,
        requested_online: Option<bool>,
        location: Option<GeoPoint>,
    ) -> Result<(), CoordinatorError> {
        let presence =
            self.presence.set_availability(driver_id, requested_available, requested_online).await?;

        if let Some(point) = location {
            let result = self
                .locations
                .on_location_update(driver_id, point, None, presence.current_trip_id.as_ref())
                .await;
            self.fanout.to_observers(ServerMessage::DriverLocationChanged {
                driver_id: driver_id.to_string(),
                lat: point.lat,
                lng: point.lng,
                distance_to_pickup: result.proximity.as_ref().map(|p| p.distance_to_pickup),
                bearing: result.proximity.as_ref().map(|p| p.bearing),
                timestamp: result.observed_at,
            });
        }

        self.fanout.to_driver(
            driver_id,
            ServerMessage::AvailabilityUpdated {
                available: presence.available,
                online: presence.online,
                message: availability_summary(&presence),
            },
        );
        self.fanout.to_observers(ServerMessage::DriverAvailabilityChanged {
            driver_id: driver_id.to_string(),
            available: presence.available,
            online: presence.online,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    async fn handle_location_update(
        &self,
        driver_id: &str,
        point: GeoPoint,
        accuracy: Option<f64>,
    ) -> Result<(), CoordinatorError> {
        let presence = self.presence.current(driver_id).await?;
        let result = self
            .locations
            .on_location_update(driver_id, point, accuracy, presence.current_trip_id.as_ref())
            .await;

        self.fanout.to_driver(
            driver_id,
            ServerMessage::LocationAcknowledged {
                timestamp: result.observed_at,
                accuracy: result.accuracy,
                distance_to_pickup: result.proximity.as_ref().map(|p| p.distance_to_pickup),
                bearing: result.proximity.as_ref().map(|p| p.bearing),
            },
        );

        if let Some(proximity) = &result.proximity {
            if proximity.arrived {
                self.fanout.to_driver(
                    driver_id,
                    ServerMessage::Arrived {
                        trip_id: proximity.trip_id.clone(),
                        distance_to_pickup: proximity.distance_to_pickup,
                    },
                );
            }
        }

        self.fanout.to_observers(ServerMessage::DriverLocationChanged {
            driver_id: driver_id.to_string(),
            lat: point.lat,
            lng: point.lng,
            distance_to_pickup: result.proximity.as_ref().map(|p| p.distance_to_pickup),
            bearing: result.proximity.as_ref().map(|p| p.bearing),
            timestamp: result.observed_at,
        });

        Ok(())
    }

    async fn handle_trip_accept(
        &self,
        connection_id: ConnectionId,
        driver_id: &str,
        trip_id: &str,
    ) {
        let trip = match self.arbiter.accept(trip_id, driver_id).await {
            Ok(trip) => trip,
            Err(err) => {
                self.fanout.to_connection(
                    connection_id,
                    ServerMessage::TripSupportAcceptFailed {
                        trip_id: trip_id.to_string(),
                        error: err.to_string(),
                    },
                );
                return;
            },
        };

        // The trip service already committed the accept; a local trip
        // conflict is reported without unwinding that decision.
        match self.presence.assign_trip(driver_id, trip_id).await {
            Ok(_) => {},
            Err(err @ PresenceError::TripConflict { .. }) => {
                warn!(driver_id, trip_id, %err, "accept committed but driver already on a trip");
                self.fanout.to_connection(
                    connection_id,
                    ServerMessage::TripSupportAcceptFailed {
                        trip_id: trip_id.to_string(),
                        error: err.to_string(),
                    },
                );
                return;
            },
            Err(err) => {
                warn!(driver_id, trip_id, %err, "presence update failed after accept");
            },
        }

        {
            let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
            registry.subscribe_trip(connection_id, trip_id);
        }

        self.fanout.to_connection(
            connection_id,
            ServerMessage::TripSupportAccepted { trip_id: trip_id.to_string(), trip: trip.clone() },
        );
        self.notify_losing_candidates(&trip, driver_id);

        let status_changed = ServerMessage::TripStatusChanged {
            trip_id: trip_id.to_string(),
            status: trip.status,
            driver_id: Some(driver_id.to_string()),
            timestamp: Utc::now(),
        };
        self.fanout.to_observers(status_changed.clone());
        self.fanout.to_trip_room(trip_id, status_changed);
    }

    /// Tell the other connected candidates the offer is gone.
    fn notify_losing_candidates(&self, trip: &Trip, winner: &str) {
        for candidate in &trip.candidate_driver_ids {
            if candidate == winner {
                continue;
            }
            self.fanout.to_driver(
                candidate,
                ServerMessage::TripSupportAcceptedByOther { trip_id: trip.id.clone() },
            );
        }
    }

    /// Number of live driver connections (for the gateway's logs).
    pub fn connection_count(&self) -> usize {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.count()
    }
}

fn availability_summary(presence: &Presence) -> String {
    if presence.available {
        "You are now available for trips".to_string()
    } else if !presence.online {
        "You are offline and unavailable".to_string()
    } else if presence.current_trip_id.is_some() {
        "You are unavailable while on an active trip".to_string()
    } else {
        "You are online but unavailable".to_string()
    }
}
