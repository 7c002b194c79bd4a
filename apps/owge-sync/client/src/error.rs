use owge_sync_core::{DateOutOfRange, MissionType};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("no connection target configured for the first open")]
    Configuration,
    #[error("authentication rejected: {0}")]
    Authentication(Value),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("channel closed")]
    Closed,
    #[error("connection dropped during handshake")]
    Interrupted,
}

/// Defects in handler wiring. These never come from the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgrammingError {
    #[error("handler {handler} registers event {event} twice")]
    DuplicateEvent {
        handler: &'static str,
        event: &'static str,
    },
    #[error("handler {handler} has no reducer for event {event}")]
    UnknownEvent { handler: &'static str, event: String },
    #[error("missions of type {0:?} can not be sent")]
    UnsendableMission(MissionType),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry not serializable: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("cache backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("payload for {event} did not decode: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("payload for {event} carries an unusable date: {source}")]
    Date {
        event: &'static str,
        #[source]
        source: DateOutOfRange,
    },
    #[error(transparent)]
    Programming(#[from] ProgrammingError),
    #[error("{0} panicked")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Programming(#[from] ProgrammingError),
}
