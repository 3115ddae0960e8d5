//! Relay Client
//!
//! Connection from one game instance to the relay. Outbound frames are
//! queued on a bounded channel and sent best-effort; inbound frames and
//! connection changes are delivered as [`LinkEvent`]s. A dropped connection
//! is retried with exponential backoff until shutdown.

use std::time::Duration;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn, debug};

use crate::network::protocol::{ProtocolError, RelayEvent};

/// Relay client configuration.
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// Relay URL (`ws://host:port`).
    pub url: String,
    /// First reconnect delay.
    pub reconnect_min: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_max: Duration,
    /// Keepalive ping interval.
    pub ping_interval: Duration,
    /// Outbound frames buffered while disconnected or slow.
    pub outbound_capacity: usize,
}

impl RelayClientConfig {
    /// Defaults for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_min: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(10),
            ping_interval: Duration::from_secs(15),
            outbound_capacity: 256,
        }
    }
}

/// Notification from the relay link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Connection (re-)established.
    Connected,
    /// Frame received from another instance.
    Received(RelayEvent),
    /// Connection lost; a retry is pending.
    Disconnected,
}

enum PumpExit {
    Disconnected,
    Shutdown,
}

/// Running relay connection.
pub struct RelayLink {
    /// Frames to publish.
    pub outbound: mpsc::Sender<RelayEvent>,
    /// Frames and connection changes.
    pub inbound: mpsc::Receiver<LinkEvent>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl RelayLink {
    /// Start connecting in the background.
    pub fn connect(config: RelayClientConfig) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        let (inbound_tx, inbound) = mpsc::channel(config.outbound_capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_rx = shutdown_tx.subscribe();

        let task = tokio::spawn(run_link(config, outbound_rx, inbound_tx, shutdown_rx));

        Self {
            outbound,
            inbound,
            shutdown_tx,
            task,
        }
    }

    /// Queue a frame; dropped if the queue is full.
    pub fn publish(&self, frame: RelayEvent) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                debug!(kind = frame.type_name(), "Relay queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Close the connection and wait for the link task.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

async fn run_link(
    config: RelayClientConfig,
    mut outbound_rx: mpsc::Receiver<RelayEvent>,
    inbound_tx: mpsc::Sender<LinkEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut backoff = config.reconnect_min;

    loop {
        match connect_async(config.url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("Connected to relay at {}", config.url);
                backoff = config.reconnect_min;
                if inbound_tx.send(LinkEvent::Connected).await.is_err() {
                    return;
                }
                let exit = pump(ws_stream, &config, &mut outbound_rx, &inbound_tx, &mut shutdown_rx).await;
                match exit {
                    PumpExit::Shutdown => return,
                    PumpExit::Disconnected => {
                        warn!("Relay connection lost");
                        if inbound_tx.send(LinkEvent::Disconnected).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Relay connect to {} failed: {}", config.url, e);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.recv() => return,
        }
        backoff = (backoff * 2).min(config.reconnect_max);
    }
}

async fn pump<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    config: &RelayClientConfig,
    outbound_rx: &mut mpsc::Receiver<RelayEvent>,
    inbound_tx: &mpsc::Sender<LinkEvent>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> PumpExit
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut keepalive = tokio::time::interval(config.ping_interval);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    keepalive.reset();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match RelayEvent::from_json(&text) {
                            Ok(RelayEvent::Pong { .. }) => {}
                            Ok(frame) => {
                                if inbound_tx.send(LinkEvent::Received(frame)).await.is_err() {
                                    return PumpExit::Shutdown;
                                }
                            }
                            Err(e) => debug!("Ignoring relay frame: {}", ProtocolError::from(e)),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return PumpExit::Disconnected,
                    Some(Err(e)) => {
                        debug!("Relay read error: {}", e);
                        return PumpExit::Disconnected;
                    }
                    _ => {}
                }
            }
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    let _ = ws_sender.close().await;
                    return PumpExit::Shutdown;
                };
                match frame.to_json() {
                    Ok(text) => {
                        if ws_sender.send(Message::Text(text)).await.is_err() {
                            return PumpExit::Disconnected;
                        }
                    }
                    Err(e) => warn!("Failed to serialize {}: {}", frame.type_name(), e),
                }
            }
            _ = keepalive.tick() => {
                let ping = RelayEvent::Ping { timestamp: Utc::now().timestamp_millis().max(0) as u64 };
                if let Ok(text) = ping.to_json() {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        return PumpExit::Disconnected;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = ws_sender.close().await;
                return PumpExit::Shutdown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::server::{RelayConfig, RelayServer};
    use crate::game::state::PlayerId;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn next_received(link: &mut RelayLink) -> RelayEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), link.inbound.recv())
                .await
                .unwrap()
                .unwrap();
            if let LinkEvent::Received(frame) = event {
                return frame;
            }
        }
    }

    #[test]
    fn test_client_config_defaults() {
        let config = RelayClientConfig::new("ws://127.0.0.1:3000");
        assert!(config.reconnect_min < config.reconnect_max);
        assert_eq!(config.outbound_capacity, 256);
    }

    #[tokio::test]
    async fn test_links_exchange_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = Arc::new(RelayServer::new(RelayConfig::default()));
        let running = server.clone();
        tokio::spawn(async move { running.serve(listener).await });

        let mut a = RelayLink::connect(RelayClientConfig::new(url.clone()));
        let mut b = RelayLink::connect(RelayClientConfig::new(url));
        for link in [&mut a, &mut b] {
            let first = tokio::time::timeout(Duration::from_secs(2), link.inbound.recv()).await.unwrap();
            assert_eq!(first, Some(LinkEvent::Connected));
        }

        let id = PlayerId::new([5; 16]);
        assert!(a.publish(RelayEvent::ParticipantLeft { id }));
        assert_eq!(next_received(&mut b).await, RelayEvent::ParticipantLeft { id });

        a.shutdown().await;
        b.shutdown().await;
        server.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_while_unreachable() {
        let mut config = RelayClientConfig::new("ws://127.0.0.1:1");
        config.reconnect_min = Duration::from_millis(10);
        let link = RelayLink::connect(config);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::time::timeout(Duration::from_secs(2), link.shutdown()).await.unwrap();
    }
}
