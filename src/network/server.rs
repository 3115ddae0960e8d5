//! Relay Server
//!
//! WebSocket relay for a single shared room. Frames from one connection are
//! fanned out to every other connection; the relay holds no game state. It
//! only remembers which participant ids each connection announced, so it
//! can announce their departure when the connection drops.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn, error, debug, instrument};

use crate::game::state::PlayerId;
use crate::network::protocol::{ProtocolError, RelayEvent};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Frames buffered per lagging connection before it starts dropping.
    pub room_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], crate::DEFAULT_RELAY_PORT)),
            max_connections: 256,
            room_capacity: 1024,
        }
    }
}

/// Relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

/// Frame published to the room.
#[derive(Debug, Clone)]
struct RoomFrame {
    sender: u64,
    text: Arc<str>,
    echo: bool,
}

/// Decrements the live connection count when a connection task ends.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The relay.
pub struct RelayServer {
    config: RelayConfig,
    room_tx: broadcast::Sender<RoomFrame>,
    shutdown_tx: broadcast::Sender<()>,
    connections: Arc<AtomicUsize>,
    next_connection_id: AtomicU64,
}

impl RelayServer {
    /// Create a relay.
    pub fn new(config: RelayConfig) -> Self {
        let (room_tx, _) = broadcast::channel(config.room_capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            room_tx,
            shutdown_tx,
            connections: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Relay listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve an already-bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::SeqCst) >= self.config.max_connections {
                                warn!("{}, rejecting {}", RelayError::ConnectionLimitReached, addr);
                                continue;
                            }
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let slot = ConnectionSlot(self.connections.clone());
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let room_tx = self.room_tx.clone();
        // Subscribe before the handshake so no frame published after the
        // peer sees the upgrade is missed
        let mut room_rx = self.room_tx.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (direct_tx, mut direct_rx) = mpsc::channel::<Message>(64);

            // Sender task: direct replies plus room traffic from other connections
            let mut sender_task = tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        direct = direct_rx.recv() => match direct {
                            Some(message) => message,
                            None => break,
                        },
                        frame = room_rx.recv() => match frame {
                            Ok(frame) => {
                                if frame.sender == connection_id && !frame.echo {
                                    continue;
                                }
                                Message::Text(frame.text.to_string())
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!("Connection {} lagged, dropped {} frames", addr, skipped);
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    };
                    if ws_sender.send(message).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let mut announced: BTreeSet<PlayerId> = BTreeSet::new();

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let frame = match RelayEvent::from_json(&text) {
                                    Ok(frame) => frame,
                                    Err(e) => {
                                        debug!("Dropping frame from {}: {}", addr, ProtocolError::from(e));
                                        continue;
                                    }
                                };
                                match frame {
                                    RelayEvent::Ping { timestamp } => {
                                        if let Ok(pong) = (RelayEvent::Pong { timestamp }).to_json() {
                                            let _ = direct_tx.send(Message::Text(pong)).await;
                                        }
                                    }
                                    RelayEvent::Pong { .. } => {}
                                    frame => {
                                        if let Some(id) = frame.joined_id() {
                                            announced.insert(id);
                                        }
                                        if let Some(id) = frame.left_id() {
                                            announced.remove(&id);
                                        }
                                        debug!(kind = frame.type_name(), "Relaying frame from {}", addr);
                                        let _ = room_tx.send(RoomFrame {
                                            sender: connection_id,
                                            text: Arc::from(text.as_str()),
                                            echo: frame.echoes_to_sender(),
                                        });
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(data))) => {
                                debug!("Dropping frame from {}: {}", addr, ProtocolError::UnsupportedBinary(data.len()));
                            }
                            Some(Ok(Message::Ping(data))) => {
                                let _ = direct_tx.send(Message::Pong(data)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            // Let the sender flush its queue, then stop it
            drop(direct_tx);
            if tokio::time::timeout(Duration::from_secs(1), &mut sender_task).await.is_err() {
                sender_task.abort();
            }

            for id in announced {
                match (RelayEvent::ParticipantLeft { id }).to_json() {
                    Ok(text) => {
                        let _ = room_tx.send(RoomFrame {
                            sender: connection_id,
                            text: Arc::from(text.as_str()),
                            echo: false,
                        });
                    }
                    Err(e) => error!("Failed to serialize departure: {}", e),
                }
            }

            info!("Client {} cleaned up", addr);
        });
    }

    /// Shutdown the relay.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Live connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}
