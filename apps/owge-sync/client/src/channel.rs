//! Authenticated, self-healing real-time channel.
//!
//! A [`Channel`] owns at most one live connection (a `Link`). Opening it
//! connects, sends the authentication handshake and resolves once the server
//! accepts it. Concurrent `open` calls share a single attempt. When the link
//! drops, the channel reconnects on its own and authenticates again; every
//! successful authentication bumps a generation counter and is announced on
//! the event stream so the orchestrator can resynchronize.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use owge_sync_core::protocol::channel_events;
use owge_sync_core::{AuthRequest, AuthResponse, ChannelFrame};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::ReconnectPolicy;
use crate::connector::{Connection, Connector};
use crate::error::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Authenticated
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The server accepted the handshake on a fresh connection.
    Authenticated { generation: u64 },
    /// Body of a `deliver_message` frame.
    Delivered(Value),
    Disconnected,
}

type Attempt = Shared<BoxFuture<'static, Result<(), ChannelError>>>;

struct Link {
    id: Uuid,
    outbound: mpsc::UnboundedSender<ChannelFrame>,
    waiters: Vec<oneshot::Sender<AuthResponse>>,
    authenticated: bool,
    reader: Option<JoinHandle<()>>,
}

pub struct Channel {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    token: RwLock<Option<String>>,
    target: Mutex<Option<String>>,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    attempt: Mutex<Option<Attempt>>,
    has_connected: AtomicBool,
    closed: AtomicBool,
    generation: AtomicU64,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl Channel {
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let channel = Arc::new(Self {
            connector,
            policy,
            token: RwLock::new(None),
            target: Mutex::new(None),
            state,
            link: Mutex::new(None),
            attempt: Mutex::new(None),
            has_connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            events,
        });
        (channel, events_rx)
    }

    pub fn set_authentication_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Number of successful authentications so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Connects and authenticates, or joins the attempt already in flight.
    /// `target` is required the first time; later calls may pass `None` to
    /// reuse the stored one. Resolves immediately when already authenticated.
    pub async fn open(
        self: &Arc<Self>,
        target: Option<&str>,
        token: Option<String>,
    ) -> Result<(), ChannelError> {
        if let Some(token) = token {
            self.set_authentication_token(token);
        }
        if let Some(target) = target {
            *self.target.lock() = Some(target.to_string());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        if self.is_connected() {
            return Ok(());
        }

        let attempt = {
            let mut slot = self.attempt.lock();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    if self.target.lock().is_none() {
                        return Err(ChannelError::Configuration);
                    }
                    let channel = Arc::clone(self);
                    let attempt = async move {
                        let result = Arc::clone(&channel).establish().await;
                        *channel.attempt.lock() = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };
        attempt.await
    }

    /// Sends the handshake on the live connection and waits for the answer.
    /// Callers arriving while a handshake is pending wait for the same answer
    /// instead of sending a second one.
    pub async fn authenticate(&self) -> Result<(), ChannelError> {
        let answer = {
            let mut link = self.link.lock();
            let Some(link) = link.as_mut() else {
                return Err(ChannelError::Interrupted);
            };
            if link.authenticated {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            let first = link.waiters.is_empty();
            link.waiters.push(tx);
            if first {
                let token = self.token.read().clone().unwrap_or_default();
                let frame = ChannelFrame::authentication(&AuthRequest::new(token))
                    .map_err(|err| ChannelError::Transport(err.to_string()))?;
                debug!(target: "owge.channel", link = %link.id, "authenticating");
                self.state.send_replace(ConnectionState::Authenticating);
                if link.outbound.send(frame).is_err() {
                    debug!(target: "owge.channel", link = %link.id, "handshake not sent, link closing");
                }
            }
            rx
        };

        match answer.await {
            Ok(response) if response.is_ok() => Ok(()),
            Ok(response) => Err(ChannelError::Authentication(response.into_value())),
            Err(_) => Err(ChannelError::Interrupted),
        }
    }

    /// Stops reconnecting and drops the live connection.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(link) = self.link.lock().take() {
            if let Some(reader) = link.reader {
                reader.abort();
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
        info!(target: "owge.channel", "channel closed");
    }

    async fn establish(self: Arc<Self>) -> Result<(), ChannelError> {
        let mut failures = 0u32;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ChannelError::Closed);
            }
            if self.link.lock().is_none() {
                let target = self
                    .target
                    .lock()
                    .clone()
                    .ok_or(ChannelError::Configuration)?;
                self.state.send_replace(ConnectionState::Connecting);
                match self.connector.connect(&target).await {
                    Ok(connection) => self.install(&target, connection),
                    Err(err) => {
                        failures = failures.saturating_add(1);
                        let delay = self.policy.delay_for(failures);
                        warn!(
                            target: "owge.channel",
                            error = %err,
                            attempt = failures,
                            delay_ms = delay.as_millis() as u64,
                            "connect failed, retrying"
                        );
                        self.state.send_replace(ConnectionState::Disconnected);
                        self.pause(delay).await;
                        continue;
                    }
                }
            }
            match self.authenticate().await {
                Ok(()) => return Ok(()),
                Err(ChannelError::Interrupted) => {
                    failures = failures.saturating_add(1);
                    let delay = self.policy.delay_for(failures);
                    warn!(
                        target: "owge.channel",
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "connection dropped during handshake, retrying"
                    );
                    self.pause(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }

    /// Keeps opening until a link is live again. An attempt that was already
    /// resolving when the link dropped reports success for the dead link, so
    /// the result alone is not trusted.
    async fn reconnect(self: Arc<Self>) {
        loop {
            match self.open(None, None).await {
                Ok(()) if self.link.lock().is_some() => return,
                Ok(()) => {
                    debug!(target: "owge.channel", "link dropped while its attempt resolved, reopening");
                }
                Err(ChannelError::Closed) => return,
                Err(err) => {
                    warn!(target: "owge.channel", error = %err, "reconnect gave up");
                    return;
                }
            }
        }
    }

    fn install(self: &Arc<Self>, target: &str, connection: Connection) {
        let id = Uuid::new_v4();
        if self.has_connected.swap(true, Ordering::SeqCst) {
            info!(target: "owge.channel", %target, link = %id, "reconnected");
        } else {
            info!(target: "owge.channel", %target, link = %id, "connection established");
        }
        let previous = self.link.lock().replace(Link {
            id,
            outbound: connection.outbound,
            waiters: Vec::new(),
            authenticated: false,
            reader: None,
        });
        if let Some(reader) = previous.and_then(|link| link.reader) {
            reader.abort();
        }
        self.state.send_replace(ConnectionState::Connected);

        let reader = tokio::spawn(read_loop(Arc::downgrade(self), id, connection.inbound));
        if let Some(link) = self.link.lock().as_mut().filter(|link| link.id == id) {
            link.reader = Some(reader);
        }
    }

    fn handle_frame(&self, link_id: Uuid, frame: ChannelFrame) {
        match frame.event.as_str() {
            channel_events::AUTHENTICATION => {
                let response = AuthResponse(frame.body());
                let accepted = response.is_ok();
                let waiters = {
                    let mut link = self.link.lock();
                    let Some(link) = link.as_mut().filter(|link| link.id == link_id) else {
                        return;
                    };
                    link.authenticated = accepted;
                    std::mem::take(&mut link.waiters)
                };
                if accepted {
                    self.state.send_replace(ConnectionState::Authenticated);
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(target: "owge.channel", link = %link_id, generation, "authenticated");
                    let _ = self.events.send(ChannelEvent::Authenticated { generation });
                } else {
                    warn!(target: "owge.channel", link = %link_id, payload = %response.0, "authentication rejected");
                    self.state.send_replace(ConnectionState::Connected);
                }
                for waiter in waiters {
                    let _ = waiter.send(response.clone());
                }
            }
            channel_events::DELIVER_MESSAGE => {
                let _ = self.events.send(ChannelEvent::Delivered(frame.body()));
            }
            other => trace!(target: "owge.channel", event = other, "ignoring channel event"),
        }
    }

    fn handle_disconnect(self: &Arc<Self>, link_id: Uuid) {
        {
            let mut link = self.link.lock();
            if link.as_ref().map(|link| link.id) != Some(link_id) {
                return;
            }
            link.take();
        }
        info!(target: "owge.channel", link = %link_id, "client disconnected");
        self.state.send_replace(ConnectionState::Disconnected);
        let _ = self.events.send(ChannelEvent::Disconnected);

        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        tokio::spawn(Arc::clone(self).reconnect());
    }
}

async fn read_loop(
    channel: Weak<Channel>,
    link_id: Uuid,
    mut inbound: mpsc::UnboundedReceiver<ChannelFrame>,
) {
    while let Some(frame) = inbound.recv().await {
        let Some(channel) = channel.upgrade() else {
            return;
        };
        channel.handle_frame(link_id, frame);
    }
    if let Some(channel) = channel.upgrade() {
        channel.handle_disconnect(link_id);
    }
}
