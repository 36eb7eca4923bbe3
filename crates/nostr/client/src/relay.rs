//! Single relay connection management.

use crate::error::{ClientError, ConnectError, Result};
use crate::message::{ClientMessage, RelayMessage, parse_relay_message};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;

/// Connection state. `Closed` is terminal: a closed connection is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// Relay connection configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// One duplex link to one relay.
///
/// Inbound frames are decoded by a background task, in arrival order, and
/// handed out through [`RelayConnection::take_incoming`]. That channel closing
/// is the terminal "connection closed" signal.
pub struct RelayConnection {
    url: Url,
    config: RelayConfig,
    state: Arc<RwLock<ConnectionState>>,
    writer: Arc<Mutex<Option<WsWriter>>>,
    incoming_rx: Mutex<Option<mpsc::UnboundedReceiver<RelayMessage>>>,
    subscriptions: Mutex<HashSet<String>>,
    recv_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RelayConnection {
    /// Create a new relay connection with default config.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    /// Create a new relay connection with custom config. Does not connect.
    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        let parsed_url = Url::parse(url)?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed_url.scheme()
            )));
        }

        Ok(Self {
            url: parsed_url,
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            writer: Arc::new(Mutex::new(None)),
            incoming_rx: Mutex::new(None),
            subscriptions: Mutex::new(HashSet::new()),
            recv_task: Mutex::new(None),
        })
    }

    /// Relay URL as string.
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Perform the handshake and start the background receive loop.
    ///
    /// Fails with [`ConnectError::Timeout`] when the handshake does not finish
    /// within `connect_timeout`. A failed connection is closed for good.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            match *state {
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
                ConnectionState::Connecting | ConnectionState::Connected => {
                    return Err(ClientError::Internal(format!(
                        "relay {} is already {:?}",
                        self.url, *state
                    )));
                }
                ConnectionState::Closed => return Err(ClientError::Closed),
            }
        }

        if self.url.scheme() == "wss" {
            // Errors when a provider is already installed, which is fine.
            let _ = rustls::crypto::ring::default_provider().install_default();
        }

        let handshake = timeout(self.config.connect_timeout, connect_async(self.url.as_str())).await;
        let stream = match handshake {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(error)) => {
                *self.state.write().await = ConnectionState::Closed;
                return Err(classify_handshake_error(error).into());
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Closed;
                return Err(ConnectError::Timeout(self.config.connect_timeout).into());
            }
        };

        let (writer, mut reader) = stream.split();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        {
            // Publish `Connected` before the reader can observe a close.
            let mut state_guard = self.state.write().await;
            if *state_guard == ConnectionState::Closed {
                // `disconnect` ran while the handshake was in flight.
                return Err(ClientError::Closed);
            }
            *state_guard = ConnectionState::Connected;
            *self.writer.lock().await = Some(writer);
            *self.incoming_rx.lock().await = Some(incoming_rx);

            let state = Arc::clone(&self.state);
            let writer = Arc::clone(&self.writer);
            let relay_url = self.url.to_string();

            let task = tokio::spawn(async move {
                while let Some(frame) = reader.next().await {
                    match frame {
                        Ok(Message::Text(text)) => match parse_relay_message(text.as_str()) {
                            Ok(Some(message)) => {
                                if incoming_tx.send(message).is_err() {
                                    break;
                                }
                            }
                            Ok(None) => debug!("ignoring unhandled frame from {}", relay_url),
                            Err(error) => {
                                warn!("dropping frame from {}: {}", relay_url, error);
                            }
                        },
                        Ok(Message::Ping(payload)) => {
                            debug!("received ping from {} ({} bytes)", relay_url, payload.len());
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {}
                        Err(error) => {
                            warn!("websocket read error on {}: {}", relay_url, error);
                            break;
                        }
                    }
                }

                *state.write().await = ConnectionState::Closed;
                writer.lock().await.take();
                info!("disconnected from {}", relay_url);
            });

            *self.recv_task.lock().await = Some(task);
            drop(state_guard);
        }

        info!("connected to {}", self.url);
        Ok(())
    }

    /// Receiver of decoded inbound frames. Yields once per successful connect.
    pub async fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<RelayMessage>> {
        self.incoming_rx.lock().await.take()
    }

    /// Close the link and stop the receive loop. Safe to call repeatedly.
    pub async fn disconnect(&self) -> Result<()> {
        *self.state.write().await = ConnectionState::Closed;

        let close_result = match self.writer.lock().await.take() {
            Some(mut writer) => writer
                .send(Message::Close(None))
                .await
                .map_err(|error| ClientError::WebSocket(error.to_string())),
            None => Ok(()),
        };

        if let Some(task) = self.recv_task.lock().await.take() {
            task.abort();
        }
        self.subscriptions.lock().await.clear();

        close_result
    }

    /// Send one protocol frame.
    pub async fn send_message(&self, message: &ClientMessage) -> Result<()> {
        self.send_text(message.to_json()?).await
    }

    /// Send raw text. Fails with [`ClientError::Closed`] once closed.
    pub async fn send_text(&self, text: String) -> Result<()> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ClientError::Closed)?;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }

    pub async fn add_subscription(&self, subscription_id: &str) {
        self.subscriptions
            .lock()
            .await
            .insert(subscription_id.to_string());
    }

    /// Returns whether the id was active on this relay.
    pub async fn remove_subscription(&self, subscription_id: &str) -> bool {
        self.subscriptions.lock().await.remove(subscription_id)
    }

    pub async fn has_subscription(&self, subscription_id: &str) -> bool {
        self.subscriptions.lock().await.contains(subscription_id)
    }

    pub async fn active_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.iter().cloned().collect()
    }
}

fn classify_handshake_error(error: tungstenite::Error) -> ConnectError {
    match error {
        tungstenite::Error::Io(error) => ConnectError::Refused(error.to_string()),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ConnectError::Refused("connection closed during handshake".to_string())
        }
        tungstenite::Error::Tls(error) => ConnectError::Refused(format!("tls: {error}")),
        other => ConnectError::ProtocolViolation(other.to_string()),
    }
}
