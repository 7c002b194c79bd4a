//! Socket plumbing behind the [`Channel`](crate::channel::Channel).
//!
//! A connector turns a target URL into a pair of frame queues. The channel
//! never touches the socket itself: it pushes frames into `outbound` and reads
//! `inbound` until the connector closes it, which is how a disconnect is
//! observed.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use owge_sync_core::protocol::channel_events;
use owge_sync_core::{AuthRequest, ChannelFrame};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::ChannelError;

/// Both directions of one live connection.
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<ChannelFrame>,
    pub inbound: mpsc::UnboundedReceiver<ChannelFrame>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, target: &str) -> Result<Connection, ChannelError>;
}

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Accepts `http(s)://` targets as well, mapping them onto `ws(s)://`.
pub fn websocket_url(target: &str) -> Result<Url, ChannelError> {
    let mut url = Url::parse(target)
        .map_err(|err| ChannelError::Transport(format!("invalid target {target}: {err}")))?;
    let scheme = match url.scheme() {
        "http" => Some("ws"),
        "https" => Some("wss"),
        "ws" | "wss" => None,
        other => {
            return Err(ChannelError::Transport(format!(
                "unsupported scheme {other} in {target}"
            )))
        }
    };
    if let Some(scheme) = scheme {
        url.set_scheme(scheme)
            .map_err(|_| ChannelError::Transport(format!("cannot rewrite scheme of {target}")))?;
    }
    Ok(url)
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, target: &str) -> Result<Connection, ChannelError> {
        let url = websocket_url(target)?;
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;
        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ChannelFrame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<ChannelFrame>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(target: "owge.channel", error = %err, "dropping unencodable frame");
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text)).await {
                    debug!(target: "owge.channel", error = %err, "websocket send failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => match ChannelFrame::decode(&text) {
                        Ok(frame) => {
                            if inbound_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(target: "owge.channel", error = %err, "ignoring undecodable frame");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(other) => trace!(target: "owge.channel", kind = ?other, "ignoring non-text frame"),
                    Err(err) => {
                        debug!(target: "owge.channel", error = %err, "websocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(Connection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// In-process connector. Every successful connect hands the server half of
/// the connection to whoever holds the acceptor returned by [`MemoryConnector::new`].
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    connections: AtomicUsize,
    pending_failures: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, acceptor) = mpsc::unbounded_channel();
        (
            Self {
                accepted,
                connections: AtomicUsize::new(0),
                pending_failures: AtomicUsize::new(0),
            },
            acceptor,
        )
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_next(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Connections handed out so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, target: &str) -> Result<Connection, ChannelError> {
        let refused = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ChannelError::Transport(format!("connection to {target} refused")));
        }
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let server = ServerEnd {
            target: target.to_string(),
            inbound: server_rx,
            outbound: server_tx,
        };
        self.accepted
            .send(server)
            .map_err(|_| ChannelError::Transport("no acceptor listening".into()))?;
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Connection {
            outbound: client_tx,
            inbound: client_rx,
        })
    }
}

/// Server side of a [`MemoryConnector`] connection. Dropping it disconnects
/// the client.
pub struct ServerEnd {
    pub target: String,
    inbound: mpsc::UnboundedReceiver<ChannelFrame>,
    outbound: mpsc::UnboundedSender<ChannelFrame>,
}

impl ServerEnd {
    pub async fn recv(&mut self) -> Option<ChannelFrame> {
        self.inbound.recv().await
    }

    /// Waits for the next frame and decodes it as a handshake. `None` when
    /// the client went away or sent something else.
    pub async fn expect_authentication(&mut self) -> Option<AuthRequest> {
        let frame = self.recv().await?;
        if frame.event != channel_events::AUTHENTICATION {
            return None;
        }
        serde_json::from_value(frame.body()).ok()
    }

    pub fn reply_authentication(&self, response: Value) -> bool {
        self.send(ChannelFrame::new(channel_events::AUTHENTICATION, response))
    }

    /// Pushes a `deliver_message` frame carrying `envelope`.
    pub fn deliver(&self, envelope: Value) -> bool {
        self.send(ChannelFrame::new(channel_events::DELIVER_MESSAGE, envelope))
    }

    pub fn send(&self, frame: ChannelFrame) -> bool {
        self.outbound.send(frame).is_ok()
    }
}
