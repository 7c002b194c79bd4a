//! Real-time synchronization client for OWGE.
//!
//! The [`channel::Channel`] keeps one authenticated connection to the game
//! backend alive and reconnects on its own. The [`service::SyncService`]
//! resynchronizes every registered [`handler::DomainHandler`] after each
//! (re)authentication and routes pushed events to their reducers. Handlers
//! publish their state through [`projection::Projection`]s and persist the
//! last good values in the [`cache`] so the UI can render before the
//! connection is up.

pub mod api;
pub mod cache;
pub mod channel;
pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod projection;
pub mod service;
pub mod session;

#[cfg(test)]
mod test_support;

pub use api::{GameApi, HttpGameApi, Method};
pub use cache::{CacheBackend, CacheEntry, CacheManager, FileCacheBackend, MemoryCacheBackend};
pub use channel::{Channel, ChannelEvent, ConnectionState};
pub use config::{ClientConfig, ReconnectPolicy};
pub use connector::{Connector, MemoryConnector, ServerEnd, WebSocketConnector};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{ApiError, CacheError, ChannelError, HandlerError, ProgrammingError, SyncError};
pub use handler::{DomainHandler, EventTable};
pub use projection::Projection;
pub use service::{SyncReport, SyncService};
pub use session::GameSession;
