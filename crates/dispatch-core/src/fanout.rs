//! Broadcast fan-out.
//!
//! Relays events to the specific driver connection affected, to dashboard
//! observers, and to trip rooms. Delivery is best-effort and non-blocking:
//! every connection has an unbounded channel drained by its own writer
//! task, so a slow or disconnected receiver never delays anyone else.
//! Having no observers is not an error.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, RwLock},
};

use dispatch_proto::{ConnectionId, ServerMessage};
use tokio::sync::mpsc;
use tracing::trace;

use crate::registry::ConnectionRegistry;

/// Sending half of a connection's outbound channel.
pub type EventSender = mpsc::UnboundedSender<ServerMessage>;

/// Fan-out over the connections tracked by the registry.
pub struct Fanout {
    registry: Arc<RwLock<ConnectionRegistry>>,
    senders: StdMutex<HashMap<ConnectionId, EventSender>>,
}

impl Fanout {
    /// Create a fan-out over `registry`.
    pub fn new(registry: Arc<RwLock<ConnectionRegistry>>) -> Self {
        Self { registry, senders: StdMutex::new(HashMap::new()) }
    }

    /// Attach a connection's outbound channel.
    pub fn attach(&self, connection_id: ConnectionId, sender: EventSender) {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.insert(connection_id, sender);
    }

    /// Detach a connection's outbound channel.
    pub fn detach(&self, connection_id: ConnectionId) {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.remove(&connection_id);
    }

    /// Send to one connection. Returns false when the connection is gone;
    /// that is not an error, merely a miss.
    pub fn to_connection(&self, connection_id: ConnectionId, message: ServerMessage) -> bool {
        let senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        match senders.get(&connection_id) {
            Some(sender) => sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Send to the driver's active connection, if any.
    pub fn to_driver(&self, driver_id: &str, message: ServerMessage) -> bool {
        let connection_id = {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
            registry.lookup(driver_id)
        };
        match connection_id {
            Some(id) => self.to_connection(id, message),
            None => {
                trace!(driver_id, "fan-out target not connected");
                false
            },
        }
    }

    /// Send to every dashboard observer.
    pub fn to_observers(&self, message: ServerMessage) {
        let targets: Vec<ConnectionId> = {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
            registry.observers().collect()
        };
        for connection_id in targets {
            self.to_connection(connection_id, message.clone());
        }
    }

    /// Send to every connection subscribed to a trip room.
    pub fn to_trip_room(&self, trip_id: &str, message: ServerMessage) {
        let targets: Vec<ConnectionId> = {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
            registry.trip_room(trip_id).collect()
        };
        for connection_id in targets {
            self.to_connection(connection_id, message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;

    fn setup() -> (Fanout, Arc<RwLock<ConnectionRegistry>>) {
        let registry = Arc::new(RwLock::new(ConnectionRegistry::new()));
        (Fanout::new(Arc::clone(&registry)), registry)
    }

    fn attach(fanout: &Fanout, id: ConnectionId) -> UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        fanout.attach(id, tx);
        rx
    }

    fn err_msg(text: &str) -> ServerMessage {
        ServerMessage::Error { message: text.to_string() }
    }

    #[tokio::test]
    async fn driver_fanout_targets_active_connection() {
        let (fanout, registry) = setup();
        registry.write().unwrap().register("d1", 10);
        let mut rx = attach(&fanout, 10);

        assert!(fanout.to_driver("d1", err_msg("hi")));
        assert_eq!(rx.recv().await.unwrap(), err_msg("hi"));

        assert!(!fanout.to_driver("d2", err_msg("nobody")));
    }

    #[tokio::test]
    async fn observer_fanout_reaches_all_observers() {
        let (fanout, registry) = setup();
        {
            let mut reg = registry.write().unwrap();
            reg.register_observer(100);
            reg.register_observer(101);
            reg.register("d1", 10);
        }
        let mut obs_a = attach(&fanout, 100);
        let mut obs_b = attach(&fanout, 101);
        let mut driver = attach(&fanout, 10);

        fanout.to_observers(err_msg("tick"));

        assert_eq!(obs_a.recv().await.unwrap(), err_msg("tick"));
        assert_eq!(obs_b.recv().await.unwrap(), err_msg("tick"));
        assert!(driver.try_recv().is_err());
    }

    #[test]
    fn zero_observers_is_not_an_error() {
        let (fanout, _registry) = setup();
        fanout.to_observers(err_msg("nobody home"));
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_block_others() {
        let (fanout, registry) = setup();
        {
            let mut reg = registry.write().unwrap();
            reg.register_observer(100);
            reg.register_observer(101);
        }
        let dead = attach(&fanout, 100);
        drop(dead);
        let mut alive = attach(&fanout, 101);

        fanout.to_observers(err_msg("still here"));
        assert_eq!(alive.recv().await.unwrap(), err_msg("still here"));
    }

    #[tokio::test]
    async fn trip_room_fanout() {
        let (fanout, registry) = setup();
        {
            let mut reg = registry.write().unwrap();
            reg.register_observer(100);
            reg.register_observer(101);
            reg.subscribe_trip(100, "t1");
        }
        let mut subscribed = attach(&fanout, 100);
        let mut other = attach(&fanout, 101);

        fanout.to_trip_room("t1", err_msg("trip news"));

        assert_eq!(subscribed.recv().await.unwrap(), err_msg("trip news"));
        assert!(other.try_recv().is_err());
    }
}
