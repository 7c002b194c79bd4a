//! Orchestrator tying the channel, the dispatcher and the domain handlers.
//!
//! Every successful authentication (first connect and each reconnect) runs
//! `before_sync` then `sync` on every registered handler concurrently. Pushed
//! messages are dispatched as they arrive, also while a sync is running.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::CacheManager;
use crate::channel::{Channel, ChannelEvent, ConnectionState};
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::{ChannelError, HandlerError, ProgrammingError, SyncError};
use crate::handler::DomainHandler;

/// Summary of one synchronization fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub generation: u64,
    pub failed: Vec<&'static str>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct SyncService {
    channel: Arc<Channel>,
    dispatcher: Dispatcher,
    handlers: RwLock<Vec<Arc<dyn DomainHandler>>>,
    cache_panic: watch::Receiver<bool>,
    sync_reports: broadcast::Sender<SyncReport>,
    last_sync: watch::Sender<Option<SyncReport>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ChannelEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    pub fn new(
        channel: Arc<Channel>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        cache: &CacheManager,
    ) -> Arc<Self> {
        let (sync_reports, _) = broadcast::channel(32);
        let (last_sync, _) = watch::channel(None);
        Arc::new(Self {
            channel,
            dispatcher: Dispatcher::new(),
            handlers: RwLock::new(Vec::new()),
            cache_panic: cache.panic(),
            sync_reports,
            last_sync,
            events: Mutex::new(Some(events)),
            pump: Mutex::new(None),
        })
    }

    /// Registers `handler`: its event table goes to the dispatcher and its
    /// hooks join the offline bootstrap and every sync.
    pub fn add_event_handler(&self, handler: Arc<dyn DomainHandler>) -> Result<(), ProgrammingError> {
        let table = Arc::clone(&handler).event_table()?;
        self.dispatcher.register(table);
        self.handlers.write().push(handler);
        Ok(())
    }

    pub fn set_authentication_token(&self, token: impl Into<String>) {
        self.channel.set_authentication_token(token);
    }

    /// Hydrates every handler from the cache. Failures are logged and the
    /// names of the failing handlers returned.
    pub async fn run_initial_offline(&self) -> Vec<&'static str> {
        let handlers = self.handlers.read().clone();
        let results = join_all(handlers.iter().map(|handler| async move {
            (handler.name(), handler.initial_offline().await)
        }))
        .await;
        let mut failed = Vec::new();
        for (name, result) in results {
            if let Err(err) = result {
                warn!(target: "owge.sync", handler = name, error = %err, "offline bootstrap failed");
                failed.push(name);
            }
        }
        failed
    }

    /// Opens the channel and waits for the first sync after it authenticated.
    pub async fn init_socket(
        self: &Arc<Self>,
        target: &str,
        token: Option<String>,
    ) -> Result<SyncReport, SyncError> {
        self.start_pump();
        self.channel.open(Some(target), token).await?;
        let generation = self.channel.generation();
        let mut last_sync = self.last_sync.subscribe();
        let report = last_sync
            .wait_for(|report| {
                report
                    .as_ref()
                    .is_some_and(|report| report.generation >= generation)
            })
            .await
            .map_err(|_| ChannelError::Closed)?;
        Ok(report.clone().unwrap_or(SyncReport {
            generation,
            failed: Vec::new(),
        }))
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.channel.state()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn is_cache_panic(&self) -> bool {
        *self.cache_panic.borrow()
    }

    pub fn cache_panic(&self) -> watch::Receiver<bool> {
        self.cache_panic.clone()
    }

    pub fn sync_completions(&self) -> broadcast::Receiver<SyncReport> {
        self.sync_reports.subscribe()
    }

    pub fn dispatch_outcomes(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.dispatcher.outcomes()
    }

    /// Routes one pushed envelope; see [`Dispatcher::dispatch`].
    pub fn dispatch(&self, message: Value) -> usize {
        self.dispatcher.dispatch(message)
    }

    pub fn shutdown(&self) {
        self.channel.close();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        info!(target: "owge.sync", "sync service stopped");
    }

    /// Runs `before_sync` then `sync` on every handler concurrently.
    pub async fn sync_all(&self, generation: u64) -> SyncReport {
        let handlers = self.handlers.read().clone();
        debug!(target: "owge.sync", generation, handlers = handlers.len(), "synchronizing");
        let results = join_all(handlers.iter().map(|handler| async move {
            let run = async {
                match handler.before_sync().await {
                    Ok(()) => handler.sync().await,
                    Err(err) => Err(err),
                }
            };
            let result = AssertUnwindSafe(run)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(HandlerError::Panicked(format!("{} sync", handler.name()))));
            (handler.name(), result)
        }))
        .await;

        let mut failed = Vec::new();
        for (name, result) in results {
            if let Err(err) = result {
                warn!(target: "owge.sync", handler = name, generation, error = %err, "handler sync failed");
                failed.push(name);
            }
        }
        if failed.is_empty() {
            info!(target: "owge.sync", generation, "sync completed");
        } else {
            error!(target: "owge.sync", generation, failed = ?failed, "sync batch finished with failures");
        }

        let report = SyncReport { generation, failed };
        let _ = self.sync_reports.send(report.clone());
        self.last_sync.send_replace(Some(report.clone()));
        report
    }

    fn start_pump(self: &Arc<Self>) {
        let Some(events) = self.events.lock().take() else {
            return;
        };
        let pump = tokio::spawn(pump(Arc::downgrade(self), events));
        *self.pump.lock() = Some(pump);
    }
}

async fn pump(service: Weak<SyncService>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        let Some(service) = service.upgrade() else {
            return;
        };
        match event {
            ChannelEvent::Authenticated { generation } => {
                tokio::spawn(async move {
                    service.sync_all(generation).await;
                });
            }
            ChannelEvent::Delivered(message) => {
                service.dispatcher.dispatch(message);
            }
            ChannelEvent::Disconnected => {
                debug!(target: "owge.sync", "waiting for reconnect");
            }
        }
    }
}
