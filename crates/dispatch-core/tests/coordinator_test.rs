//! End-to-end coordinator scenarios over in-memory services.

use std::sync::Arc;

use dispatch_core::Coordinator;
use dispatch_proto::{ClientMessage, GeoPoint, ServerMessage, TripStatus};
use tokio::sync::mpsc::{self, UnboundedReceiver};

mod support {
    use dispatch_core::services::{MemoryProfileStore, MemoryTripService, StaticTokenVerifier};

    use super::*;

    pub struct Harness {
        pub coordinator: Coordinator,
        pub trips: MemoryTripService,
        pub store: MemoryProfileStore,
        next_conn: std::sync::atomic::AtomicU64,
    }

    impl Harness {
        /// Coordinator with profiles and tokens seeded for `drivers`
        /// (token for driver `dN` is `tok-dN`).
        pub fn new(drivers: &[&str]) -> Self {
            let store = MemoryProfileStore::new();
            for driver in drivers {
                store.seed_driver(*driver);
            }
            let auth = StaticTokenVerifier::new(
                drivers.iter().map(|d| (format!("tok-{d}"), (*d).to_string())),
            );
            let trips = MemoryTripService::new();

            Self {
                coordinator: Coordinator::new(
                    Arc::new(store.clone()),
                    Arc::new(trips.clone()),
                    Arc::new(auth),
                ),
                trips,
                store,
                next_conn: std::sync::atomic::AtomicU64::new(1),
            }
        }

        /// The driver's persisted trip assignment.
        pub async fn assigned_trip(&self, driver: &str) -> Option<String> {
            use dispatch_core::services::DriverProfileStore;
            self.store.find_by_user_id(driver).await.unwrap().current_trip_id
        }

        pub fn conn_id(&self) -> u64 {
            self.next_conn.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
        }

        /// Connect a driver, consume the `connected` ack.
        pub async fn connect_driver(
            &self,
            driver: &str,
        ) -> (u64, UnboundedReceiver<ServerMessage>) {
            let conn = self.conn_id();
            let (tx, mut rx) = mpsc::unbounded_channel();
            self.coordinator
                .connect_driver(&format!("tok-{driver}"), conn, tx)
                .await
                .unwrap();
            assert_eq!(
                rx.recv().await.unwrap(),
                ServerMessage::Connected { user_id: driver.to_string() }
            );
            (conn, rx)
        }

        /// Connect an observer, consume the `dashboard:connected` ack.
        pub async fn connect_observer(&self) -> (u64, UnboundedReceiver<ServerMessage>) {
            let conn = self.conn_id();
            let (tx, mut rx) = mpsc::unbounded_channel();
            self.coordinator.connect_observer(conn, tx);
            assert!(matches!(
                rx.recv().await.unwrap(),
                ServerMessage::DashboardConnected { .. }
            ));
            (conn, rx)
        }
    }

    /// All messages currently queued on a channel.
    pub fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

use support::{drain, Harness};

#[tokio::test]
async fn availability_request_while_offline_is_coerced() {
    // Scenario A: available=true while offline, no online flag given.
    let harness = Harness::new(&["d1"]);
    let (conn, mut rx) = harness.connect_driver("d1").await;

    harness
        .coordinator
        .handle_message(
            conn,
            ClientMessage::SetAvailability { available: true, online: None, location: None },
        )
        .await
        .unwrap();

    let messages = drain(&mut rx);
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::AvailabilityUpdated { available: false, online: false, .. }
    )));
}

#[tokio::test]
async fn availability_with_explicit_online_takes_effect() {
    let harness = Harness::new(&["d1"]);
    let (conn, mut rx) = harness.connect_driver("d1").await;

    harness
        .coordinator
        .handle_message(
            conn,
            ClientMessage::SetAvailability { available: true, online: Some(true), location: None },
        )
        .await
        .unwrap();

    let messages = drain(&mut rx);
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::AvailabilityUpdated { available: true, online: true, .. }
    )));
}

#[tokio::test]
async fn location_near_pickup_triggers_arrival() {
    // Scenario B: accepted trip, pickup at (9.0010, 38.7500), sample ~111 m
    // away. Both the acknowledgment and the arrival event fire.
    let harness = Harness::new(&["d1"]);
    let (conn, mut rx) = harness.connect_driver("d1").await;

    harness.trips.offer("t1", Some(GeoPoint::new(9.0010, 38.7500)), &["d1"]);
    harness
        .coordinator
        .handle_message(conn, ClientMessage::TripSupportAccept { trip_id: "t1".to_string() })
        .await
        .unwrap();
    drain(&mut rx);

    harness
        .coordinator
        .handle_message(
            conn,
            ClientMessage::LocationUpdate { lat: 9.0000, lng: 38.7500, accuracy: Some(5.0) },
        )
        .await
        .unwrap();

    let messages = drain(&mut rx);
    let ack = messages
        .iter()
        .find_map(|m| match m {
            ServerMessage::LocationAcknowledged { distance_to_pickup, bearing, .. } => {
                Some((distance_to_pickup.unwrap(), bearing.unwrap()))
            },
            _ => None,
        })
        .unwrap();
    assert!((ack.0 - 111.2).abs() < 2.0);
    assert!((0.0..360.0).contains(&ack.1));

    let arrived = messages.iter().find_map(|m| match m {
        ServerMessage::Arrived { trip_id, distance_to_pickup } => {
            Some((trip_id.clone(), *distance_to_pickup))
        },
        _ => None,
    });
    let (trip_id, distance) = arrived.unwrap();
    assert_eq!(trip_id, "t1");
    assert!(distance < 200.0);
}

#[tokio::test]
async fn location_outside_radius_does_not_trigger_arrival() {
    // Scenario C: same trip, sample well outside the 200 m radius.
    let harness = Harness::new(&["d1"]);
    let (conn, mut rx) = harness.connect_driver("d1").await;

    harness.trips.offer("t1", Some(GeoPoint::new(9.0010, 38.7500)), &["d1"]);
    harness
        .coordinator
        .handle_message(conn, ClientMessage::TripSupportAccept { trip_id: "t1".to_string() })
        .await
        .unwrap();
    drain(&mut rx);

    harness
        .coordinator
        .handle_message(
            conn,
            ClientMessage::LocationUpdate { lat: 9.0050, lng: 38.7500, accuracy: None },
        )
        .await
        .unwrap();

    let messages = drain(&mut rx);
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::LocationAcknowledged { distance_to_pickup: Some(d), .. } if *d > 200.0
    )));
    assert!(!messages.iter().any(|m| matches!(m, ServerMessage::Arrived { .. })));
}

#[tokio::test]
async fn location_without_trip_is_plain_ack() {
    let harness = Harness::new(&["d1"]);
    let (conn, mut rx) = harness.connect_driver("d1").await;

    harness
        .coordinator
        .handle_message(
            conn,
            ClientMessage::LocationUpdate { lat: 9.0, lng: 38.75, accuracy: Some(8.0) },
        )
        .await
        .unwrap();

    let messages = drain(&mut rx);
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::LocationAcknowledged {
            accuracy: Some(a),
            distance_to_pickup: None,
            bearing: None,
            ..
        } if (*a - 8.0).abs() < f64::EPSILON
    )));
}

#[tokio::test]
async fn contested_offer_has_one_winner_and_notified_losers() {
    // Scenario D: two candidates, d1 accepts first.
    let harness = Harness::new(&["d1", "d2"]);
    let (conn1, mut rx1) = harness.connect_driver("d1").await;
    let (conn2, mut rx2) = harness.connect_driver("d2").await;

    harness.trips.offer("t1", None, &["d1", "d2"]);

    harness
        .coordinator
        .handle_message(conn1, ClientMessage::TripSupportAccept { trip_id: "t1".to_string() })
        .await
        .unwrap();
    harness
        .coordinator
        .handle_message(conn2, ClientMessage::TripSupportAccept { trip_id: "t1".to_string() })
        .await
        .unwrap();

    let winner = drain(&mut rx1);
    assert!(winner.iter().any(|m| matches!(
        m,
        ServerMessage::TripSupportAccepted { trip_id, trip }
            if trip_id == "t1" && trip.accepted_by.as_deref() == Some("d1")
                && trip.status == TripStatus::Accepted
    )));

    let loser = drain(&mut rx2);
    assert!(loser.iter().any(|m| matches!(
        m,
        ServerMessage::TripSupportAcceptedByOther { trip_id } if trip_id == "t1"
    )));
    assert!(loser.iter().any(|m| matches!(
        m,
        ServerMessage::TripSupportAcceptFailed { trip_id, .. } if trip_id == "t1"
    )));
    assert!(!loser.iter().any(|m| matches!(m, ServerMessage::TripSupportAccepted { .. })));

    // Only the winner carries the trip assignment.
    assert_eq!(harness.assigned_trip("d1").await.as_deref(), Some("t1"));
    assert_eq!(harness.assigned_trip("d2").await, None);
}

#[tokio::test]
async fn decline_is_acknowledged_even_for_unknown_trip() {
    let harness = Harness::new(&["d1"]);
    let (conn, mut rx) = harness.connect_driver("d1").await;

    harness
        .coordinator
        .handle_message(
            conn,
            ClientMessage::TripSupportDecline {
                trip_id: "ghost".to_string(),
                reason: Some("busy".to_string()),
            },
        )
        .await
        .unwrap();

    let messages = drain(&mut rx);
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::TripSupportDeclined { trip_id } if trip_id == "ghost"
    )));
}

#[tokio::test]
async fn disconnect_forces_offline_and_notifies_observers() {
    let harness = Harness::new(&["d1"]);
    let (_obs_conn, mut obs_rx) = harness.connect_observer().await;
    let (conn, _rx) = harness.connect_driver("d1").await;

    harness
        .coordinator
        .handle_message(
            conn,
            ClientMessage::SetAvailability { available: true, online: Some(true), location: None },
        )
        .await
        .unwrap();
    drain(&mut obs_rx);

    harness.coordinator.disconnect(conn).await;

    let messages = drain(&mut obs_rx);
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::DriverStatusChanged { driver_id, connected: false, online: false, .. }
            if driver_id == "d1"
    )));
    assert_eq!(harness.coordinator.connection_count(), 0);
}

#[tokio::test]
async fn reconnect_supersedes_and_late_disconnect_is_harmless() {
    let harness = Harness::new(&["d1"]);
    let (old_conn, _old_rx) = harness.connect_driver("d1").await;
    let (new_conn, mut new_rx) = harness.connect_driver("d1").await;

    // Old socket finally times out; the new connection keeps working.
    harness.coordinator.disconnect(old_conn).await;

    harness
        .coordinator
        .handle_message(
            new_conn,
            ClientMessage::SetAvailability { available: true, online: Some(true), location: None },
        )
        .await
        .unwrap();

    let messages = drain(&mut new_rx);
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::AvailabilityUpdated { available: true, online: true, .. }
    )));
}

#[tokio::test]
async fn stale_connection_cannot_act_for_the_driver() {
    let harness = Harness::new(&["d1"]);
    let (old_conn, _old_rx) = harness.connect_driver("d1").await;
    let (new_conn, mut new_rx) = harness.connect_driver("d1").await;

    // The superseded socket is still open but no longer speaks for d1.
    let err = harness
        .coordinator
        .handle_message(
            old_conn,
            ClientMessage::SetAvailability { available: true, online: Some(true), location: None },
        )
        .await
        .unwrap_err();
    assert!(!err.is_connection_fatal());

    // No state leaked through: the current connection sees the driver still
    // offline until it acts itself.
    harness
        .coordinator
        .handle_message(
            new_conn,
            ClientMessage::SetAvailability { available: true, online: None, location: None },
        )
        .await
        .unwrap();
    let messages = drain(&mut new_rx);
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::AvailabilityUpdated { available: false, online: false, .. }
    )));
}

#[tokio::test]
async fn observer_events_track_driver_lifecycle() {
    let harness = Harness::new(&["d1"]);
    let (_obs_conn, mut obs_rx) = harness.connect_observer().await;

    let (conn, _rx) = harness.connect_driver("d1").await;
    let connected = drain(&mut obs_rx);
    assert!(connected.iter().any(|m| matches!(
        m,
        ServerMessage::DriverStatusChanged { driver_id, connected: true, .. } if driver_id == "d1"
    )));

    harness
        .coordinator
        .handle_message(
            conn,
            ClientMessage::SetAvailability { available: true, online: Some(true), location: None },
        )
        .await
        .unwrap();
    let availability = drain(&mut obs_rx);
    assert!(availability.iter().any(|m| matches!(
        m,
        ServerMessage::DriverAvailabilityChanged { driver_id, available: true, online: true, .. }
            if driver_id == "d1"
    )));

    harness
        .coordinator
        .handle_message(
            conn,
            ClientMessage::LocationUpdate { lat: 9.0, lng: 38.75, accuracy: None },
        )
        .await
        .unwrap();
    let location = drain(&mut obs_rx);
    assert!(location.iter().any(|m| matches!(
        m,
        ServerMessage::DriverLocationChanged { driver_id, .. } if driver_id == "d1"
    )));
}

#[tokio::test]
async fn trip_status_reaches_observers_on_accept() {
    let harness = Harness::new(&["d1"]);
    let (_obs_conn, mut obs_rx) = harness.connect_observer().await;
    let (conn, _rx) = harness.connect_driver("d1").await;
    drain(&mut obs_rx);

    harness.trips.offer("t1", None, &["d1"]);
    harness
        .coordinator
        .handle_message(conn, ClientMessage::TripSupportAccept { trip_id: "t1".to_string() })
        .await
        .unwrap();

    let messages = drain(&mut obs_rx);
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::TripStatusChanged { trip_id, status: TripStatus::Accepted, driver_id, .. }
            if trip_id == "t1" && driver_id.as_deref() == Some("d1")
    )));
}

#[tokio::test]
async fn observer_messages_are_rejected_without_closing() {
    let harness = Harness::new(&["d1"]);
    let (obs_conn, _obs_rx) = harness.connect_observer().await;

    let err = harness
        .coordinator
        .handle_message(
            obs_conn,
            ClientMessage::SetAvailability { available: true, online: None, location: None },
        )
        .await
        .unwrap_err();
    assert!(!err.is_connection_fatal());
}

#[tokio::test]
async fn bad_token_is_connection_fatal() {
    let harness = Harness::new(&["d1"]);
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = harness
        .coordinator
        .connect_driver("wrong-token", harness.conn_id(), tx)
        .await
        .unwrap_err();
    assert!(err.is_connection_fatal());
}
