//! Contract shared by the domain handlers.
//!
//! A handler declares which pushed events it reduces by building an
//! [`EventTable`] once, at registration. Each entry pairs an event name with a
//! typed reducer; the payload is decoded with `serde` right before the reducer
//! runs, so a malformed payload only fails that one invocation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{HandlerError, ProgrammingError};

pub type Reducer = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

pub struct EventTable {
    handler: &'static str,
    reducers: HashMap<&'static str, Reducer>,
}

impl EventTable {
    pub fn builder<H>(handler: &Arc<H>, name: &'static str) -> EventTableBuilder<H>
    where
        H: Send + Sync + 'static,
    {
        EventTableBuilder {
            target: Arc::clone(handler),
            handler: name,
            reducers: HashMap::new(),
            duplicate: None,
        }
    }

    pub fn handler(&self) -> &'static str {
        self.handler
    }

    pub fn handles(&self, event: &str) -> bool {
        self.reducers.contains_key(event)
    }

    pub fn events(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.reducers.keys().copied()
    }

    /// Resolves `event` to its reducer and returns the pending invocation.
    /// Nothing runs until the returned future is polled.
    pub fn execute(
        &self,
        event: &str,
        payload: Value,
    ) -> Result<BoxFuture<'static, Result<(), HandlerError>>, ProgrammingError> {
        let reducer = self
            .reducers
            .get(event)
            .ok_or_else(|| ProgrammingError::UnknownEvent {
                handler: self.handler,
                event: event.to_string(),
            })?;
        Ok(reducer(payload))
    }
}

pub struct EventTableBuilder<H> {
    target: Arc<H>,
    handler: &'static str,
    reducers: HashMap<&'static str, Reducer>,
    duplicate: Option<&'static str>,
}

impl<H> EventTableBuilder<H>
where
    H: Send + Sync + 'static,
{
    /// Registers `reducer` for `event`, decoding the payload as `T`.
    pub fn on<T, F, Fut>(mut self, event: &'static str, reducer: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Arc<H>, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        if self.reducers.contains_key(event) {
            self.duplicate.get_or_insert(event);
            return self;
        }
        let target = Arc::clone(&self.target);
        let reducer = Arc::new(reducer);
        let erased: Reducer = Arc::new(move |payload: Value| {
            let target = Arc::clone(&target);
            let reducer = Arc::clone(&reducer);
            async move {
                let decoded = serde_json::from_value::<T>(payload).map_err(|source| {
                    HandlerError::Payload {
                        event: event.to_string(),
                        source,
                    }
                })?;
                reducer(target, decoded).await
            }
            .boxed()
        });
        self.reducers.insert(event, erased);
        self
    }

    pub fn build(self) -> Result<EventTable, ProgrammingError> {
        if let Some(event) = self.duplicate {
            return Err(ProgrammingError::DuplicateEvent {
                handler: self.handler,
                event,
            });
        }
        Ok(EventTable {
            handler: self.handler,
            reducers: self.reducers,
        })
    }
}

/// One bounded area of game state: its pushed-event reducers plus the hooks
/// the orchestrator drives on bootstrap and on every (re)connect.
#[async_trait]
pub trait DomainHandler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn event_table(self: Arc<Self>) -> Result<EventTable, ProgrammingError>;

    /// Runs right before [`DomainHandler::sync`] on every (re)connect.
    async fn before_sync(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Authoritative re-fetch of everything the handler projects.
    async fn sync(&self) -> Result<(), HandlerError>;

    /// Hydrates projections from the cache before the first connection.
    async fn initial_offline(&self) -> Result<(), HandlerError> {
        Ok(())
    }
}
