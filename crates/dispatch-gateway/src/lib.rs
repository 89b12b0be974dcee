//! WebSocket gateway for the dispatch coordinator.
//!
//! Owns the sockets so the core does not have to: accepts WebSocket
//! upgrades, classifies each connection from its query string (driver with
//! bearer token, or read-only dashboard), and pumps JSON messages between
//! the socket and the [`Coordinator`].
//!
//! Each connection gets a writer task draining its unbounded event channel,
//! so a slow client never blocks coordinator logic, and a read loop that
//! parses client messages at the boundary. Malformed JSON produces an
//! `error` event and the connection stays open; authentication failures and
//! unknown drivers close the socket.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dispatch_core::Coordinator;
use dispatch_proto::{ClientMessage, ConnectionId, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::tungstenite::{
    handshake::server::{Request, Response},
    Message,
};
use tracing::{debug, info, warn};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind the WebSocket listener to.
    pub bind_address: String,
}

/// Errors from the gateway runtime.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Bad configuration (unparseable bind address).
    #[error("config error: {0}")]
    Config(String),

    /// Listener or socket failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// How a connection identified itself at upgrade time.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ClientRole {
    /// Driver connection carrying a bearer token.
    Driver { token: String },
    /// Read-only dashboard connection.
    Observer,
}

/// The WebSocket gateway.
pub struct Gateway {
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    next_connection_id: AtomicU64,
}

impl Gateway {
    /// Bind the listener.
    pub async fn bind(
        config: GatewayConfig,
        coordinator: Arc<Coordinator>,
    ) -> Result<Self, GatewayError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| GatewayError::Config(format!("invalid bind address: {e}")))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Transport(format!("bind failed: {e}")))?;

        info!("gateway bound to {}", addr);
        Ok(Self { listener, coordinator, next_connection_id: AtomicU64::new(1) })
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, GatewayError> {
        self.listener
            .local_addr()
            .map_err(|e| GatewayError::Transport(format!("local_addr failed: {e}")))
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), GatewayError> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .map_err(|e| GatewayError::Transport(format!("accept failed: {e}")))?;

            let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
            let coordinator = Arc::clone(&self.coordinator);

            tokio::spawn(async move {
                if let Err(err) = handle_socket(coordinator, stream, connection_id).await {
                    debug!(connection_id, %peer, %err, "connection ended with error");
                }
            });
        }
    }
}

async fn handle_socket(
    coordinator: Arc<Coordinator>,
    stream: TcpStream,
    connection_id: ConnectionId,
) -> Result<(), GatewayError> {
    let mut request_uri = None;
    let websocket = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        request_uri = Some(req.uri().clone());
        Ok(resp)
    })
    .await
    .map_err(|e| GatewayError::Transport(format!("websocket handshake failed: {e}")))?;

    let role = request_uri
        .as_ref()
        .and_then(|uri| uri.query())
        .map(classify_query)
        .unwrap_or(ClientRole::Driver { token: String::new() });

    let (mut sink, mut source) = websocket.split();
    let (sender, mut events) = mpsc::unbounded_channel::<ServerMessage>();

    // Writer task: serialize events onto the socket until the channel or
    // the socket closes.
    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(connection_id, %err, "failed to serialize event");
                    continue;
                },
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    match role {
        ClientRole::Observer => {
            coordinator.connect_observer(connection_id, sender);
        },
        ClientRole::Driver { token } => {
            // Refusal closes the socket without an event: a failed credential
            // gets no protocol-level detail.
            if let Err(err) = coordinator.connect_driver(&token, connection_id, sender).await {
                warn!(connection_id, %err, "driver connection refused");
                let _ = writer.await;
                return Ok(());
            }
        },
    }

    while let Some(message) = source.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(connection_id, %err, "read error");
                break;
            },
        };

        match message {
            Message::Text(text) => {
                let parsed: ClientMessage = match serde_json::from_str(&text) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        coordinator.send_to_connection(
                            connection_id,
                            ServerMessage::Error { message: format!("invalid message: {err}") },
                        );
                        continue;
                    },
                };

                if let Err(err) = coordinator.handle_message(connection_id, parsed).await {
                    if err.is_connection_fatal() {
                        warn!(connection_id, %err, "fatal error, closing connection");
                        break;
                    }
                    coordinator.send_to_connection(
                        connection_id,
                        ServerMessage::Error { message: err.to_string() },
                    );
                }
            },
            Message::Close(_) => break,
            // Pings are answered by tungstenite; binary frames are not part
            // of the protocol.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {},
            Message::Binary(_) => {
                coordinator.send_to_connection(
                    connection_id,
                    ServerMessage::Error { message: "binary frames are not supported".to_string() },
                );
            },
        }
    }

    coordinator.disconnect(connection_id).await;
    let _ = writer.await;
    Ok(())
}

/// Classify a connection from its upgrade query string.
///
/// `?dashboard=true` attaches a read-only observer; otherwise the `token`
/// parameter carries the driver's bearer credential (missing token is left
/// for the verifier to reject).
fn classify_query(query: &str) -> ClientRole {
    let mut token = String::new();
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("dashboard", "true")) => return ClientRole::Observer,
            Some(("token", value)) => token = value.to_string(),
            _ => {},
        }
    }
    ClientRole::Driver { token }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashboard_query_is_observer() {
        assert_eq!(classify_query("dashboard=true"), ClientRole::Observer);
        assert_eq!(classify_query("token=abc&dashboard=true"), ClientRole::Observer);
    }

    #[test]
    fn token_query_is_driver() {
        assert_eq!(
            classify_query("token=tok-1"),
            ClientRole::Driver { token: "tok-1".to_string() }
        );
        assert_eq!(
            classify_query("foo=bar&token=tok-1"),
            ClientRole::Driver { token: "tok-1".to_string() }
        );
    }

    #[test]
    fn missing_token_is_left_for_the_verifier() {
        assert_eq!(classify_query("foo=bar"), ClientRole::Driver { token: String::new() });
        assert_eq!(classify_query("dashboard=false"), ClientRole::Driver { token: String::new() });
    }
}
