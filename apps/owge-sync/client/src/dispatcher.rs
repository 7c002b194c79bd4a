use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use owge_sync_core::InboundMessage;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::error::HandlerError;
use crate::handler::EventTable;

/// Result of one reducer invocation.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub handler: &'static str,
    pub event: String,
    pub result: Result<(), Arc<HandlerError>>,
}

/// Routes pushed envelopes to every handler whose table declares the event.
/// Reducers run as detached tasks; `dispatch` never waits for them.
pub struct Dispatcher {
    tables: RwLock<Vec<Arc<EventTable>>>,
    outcomes: broadcast::Sender<DispatchOutcome>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (outcomes, _) = broadcast::channel(256);
        Self {
            tables: RwLock::new(Vec::new()),
            outcomes,
        }
    }

    pub fn register(&self, table: EventTable) {
        debug!(
            target: "owge.dispatch",
            handler = table.handler(),
            events = ?table.events().collect::<Vec<_>>(),
            "handler registered"
        );
        self.tables.write().push(Arc::new(table));
    }

    pub fn outcomes(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.outcomes.subscribe()
    }

    /// Spawns one reducer task per matching handler and returns how many
    /// were started. Malformed envelopes and events nobody handles are
    /// logged and dropped.
    pub fn dispatch(&self, message: Value) -> usize {
        let envelope = match InboundMessage::from_value(message) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: "owge.dispatch", error = %err, "bad message from backend");
                return 0;
            }
        };
        let Some(event) = envelope.routable().map(str::to_owned) else {
            warn!(target: "owge.dispatch", message = ?envelope, "bad message from backend");
            return 0;
        };

        let matching: Vec<Arc<EventTable>> = self
            .tables
            .read()
            .iter()
            .filter(|table| table.handles(&event))
            .cloned()
            .collect();
        if matching.is_empty() {
            error!(target: "owge.dispatch", event = %event, "no handler for event");
            return 0;
        }

        for table in &matching {
            let handler = table.handler();
            let invocation = match table.execute(&event, envelope.value.clone()) {
                Ok(invocation) => invocation,
                Err(err) => {
                    error!(target: "owge.dispatch", handler, event = %event, error = %err, "handler table out of sync");
                    continue;
                }
            };
            let outcomes = self.outcomes.clone();
            let event = event.clone();
            tokio::spawn(async move {
                let result = match AssertUnwindSafe(invocation).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(HandlerError::Panicked(format!("reducer for {event}"))),
                }
                .map_err(Arc::new);
                if let Err(err) = &result {
                    error!(target: "owge.dispatch", handler, event = %event, error = %err, "handler failed");
                }
                let _ = outcomes.send(DispatchOutcome {
                    handler,
                    event,
                    result,
                });
            });
        }
        matching.len()
    }
}
