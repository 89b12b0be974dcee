//! Connection registry for driver and observer connection tracking.
//!
//! The registry maintains bidirectional mappings: driver → connection (for
//! addressing) and connection → driver (for cleanup on disconnect), plus the
//! observer set and trip-room subscriptions. This enables O(1) lookups in
//! both directions.
//!
//! It is the single source of truth for "who is reachable right now" and has
//! no side effects on presence state - callers transition presence explicitly
//! on connect/disconnect.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use dispatch_proto::{ConnectionId, DriverId, TripId};

/// A live driver connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConnection {
    /// The authenticated driver on this connection.
    pub driver_id: DriverId,
    /// The connection id assigned by the gateway.
    pub connection_id: ConnectionId,
    /// When the connection attached.
    pub connected_at: DateTime<Utc>,
}

/// What `unregister` removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unregistered {
    /// A driver connection. `was_current` is false when the mapping had
    /// already been superseded by a newer connection for the same driver.
    Driver {
        /// The driver the connection belonged to.
        driver_id: DriverId,
        /// Whether this connection was still the driver's active one.
        was_current: bool,
    },
    /// A dashboard observer connection.
    Observer,
}

/// Registry of live connections.
///
/// Registering a driver connection while one already exists replaces the
/// mapping without error (last-writer-wins), enabling reconnects without
/// duplicates. Unregistering an unknown connection is a no-op.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Connection id → driver connection info.
    connections: HashMap<ConnectionId, DriverConnection>,
    /// Driver id → active connection id (reverse index, last-writer-wins).
    drivers: HashMap<DriverId, ConnectionId>,
    /// Dashboard observer connections.
    observers: HashSet<ConnectionId>,
    /// Trip id → set of subscribed connection ids.
    trip_rooms: HashMap<TripId, HashSet<ConnectionId>>,
    /// Connection id → set of subscribed trip ids (for cleanup).
    connection_trips: HashMap<ConnectionId, HashSet<TripId>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver connection, superseding any existing one for the
    /// same driver. Returns the superseded connection id, if any.
    ///
    /// The superseded connection stays in `connections` (and in `count`)
    /// until it unregisters, so its disconnect can still be attributed to
    /// the driver. It is no longer the driver's current connection; callers
    /// routing inbound messages must check currency via [`Self::lookup`].
    pub fn register(
        &mut self,
        driver_id: impl Into<DriverId>,
        connection_id: ConnectionId,
    ) -> Option<ConnectionId> {
        let driver_id = driver_id.into();
        let superseded = self.drivers.insert(driver_id.clone(), connection_id);

        self.connections.insert(
            connection_id,
            DriverConnection { driver_id, connection_id, connected_at: Utc::now() },
        );

        superseded.filter(|old| *old != connection_id)
    }

    /// Register a dashboard observer connection.
    pub fn register_observer(&mut self, connection_id: ConnectionId) {
        self.observers.insert(connection_id);
    }

    /// Unregister a connection and drop its trip-room subscriptions.
    ///
    /// Unknown connections are a no-op (`None`). A superseded driver
    /// connection does not clobber the newer mapping for the same driver.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<Unregistered> {
        let trips = self.connection_trips.remove(&connection_id).unwrap_or_default();
        for trip_id in &trips {
            if let Some(members) = self.trip_rooms.get_mut(trip_id) {
                members.remove(&connection_id);
                if members.is_empty() {
                    self.trip_rooms.remove(trip_id);
                }
            }
        }

        if let Some(conn) = self.connections.remove(&connection_id) {
            let was_current = self.drivers.get(&conn.driver_id) == Some(&connection_id);
            if was_current {
                self.drivers.remove(&conn.driver_id);
            }
            return Some(Unregistered::Driver { driver_id: conn.driver_id, was_current });
        }

        if self.observers.remove(&connection_id) {
            return Some(Unregistered::Observer);
        }

        None
    }

    /// Active connection id for a driver, if connected.
    pub fn lookup(&self, driver_id: &str) -> Option<ConnectionId> {
        self.drivers.get(driver_id).copied()
    }

    /// Driver authenticated on a connection, if it is a driver connection.
    pub fn driver_for_connection(&self, connection_id: ConnectionId) -> Option<&DriverId> {
        self.connections.get(&connection_id).map(|c| &c.driver_id)
    }

    /// Connection metadata, if `connection_id` is a driver connection.
    pub fn connection(&self, connection_id: ConnectionId) -> Option<&DriverConnection> {
        self.connections.get(&connection_id)
    }

    /// Whether a connection is a registered observer.
    pub fn is_observer(&self, connection_id: ConnectionId) -> bool {
        self.observers.contains(&connection_id)
    }

    /// Subscribe a connection to a trip room.
    pub fn subscribe_trip(&mut self, connection_id: ConnectionId, trip_id: impl Into<TripId>) {
        let trip_id = trip_id.into();
        self.trip_rooms.entry(trip_id.clone()).or_default().insert(connection_id);
        self.connection_trips.entry(connection_id).or_default().insert(trip_id);
    }

    /// Unsubscribe a connection from a trip room.
    pub fn unsubscribe_trip(&mut self, connection_id: ConnectionId, trip_id: &str) {
        if let Some(members) = self.trip_rooms.get_mut(trip_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.trip_rooms.remove(trip_id);
            }
        }
        if let Some(trips) = self.connection_trips.get_mut(&connection_id) {
            trips.remove(trip_id);
        }
    }

    /// Connections subscribed to a trip room.
    pub fn trip_room(&self, trip_id: &str) -> impl Iterator<Item = ConnectionId> + '_ {
        self.trip_rooms.get(trip_id).into_iter().flat_map(|m| m.iter().copied())
    }

    /// Observer connection ids.
    pub fn observers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.observers.iter().copied()
    }

    /// Number of live driver connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Number of live observer connections.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}
