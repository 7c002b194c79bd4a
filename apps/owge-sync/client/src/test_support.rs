use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

use crate::api::{GameApi, Method};
use crate::cache::{CacheManager, MemoryCacheBackend};
use crate::error::ApiError;

type Scripted = Result<Value, u16>;

/// `GameApi` answering from canned responses keyed by method and path.
#[derive(Default)]
pub struct ScriptedApi {
    fixed: Mutex<HashMap<(Method, String), Scripted>>,
    calls: Mutex<Vec<(Method, String, Option<Value>)>>,
    gates: Mutex<HashMap<(Method, String), Arc<Notify>>>,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: Method, path: &str, value: Value) {
        self.fixed.lock().insert((method, path.to_string()), Ok(value));
    }

    pub fn fail(&self, method: Method, path: &str, status: u16) {
        self.fixed.lock().insert((method, path.to_string()), Err(status));
    }

    /// Holds requests to `path` until the returned handle is notified.
    pub fn gate(&self, method: Method, path: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .insert((method, path.to_string()), Arc::clone(&notify));
        notify
    }

    pub fn calls(&self) -> Vec<(Method, String, Option<Value>)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(m, p, _)| *m == method && p == path)
            .count()
    }
}

#[async_trait]
impl GameApi for ScriptedApi {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
        self.calls.lock().push((method, path.to_string(), body));
        let key = (method, path.to_string());
        let gate = self.gates.lock().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let scripted = self.fixed.lock().get(&key).cloned().unwrap_or(Err(404));
        scripted.map_err(|status| ApiError::UnexpectedStatus {
            status: reqwest::StatusCode::from_u16(status)
                .unwrap_or(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
            body: format!("{method} {path}"),
        })
    }
}

pub fn memory_cache() -> (CacheManager, Arc<MemoryCacheBackend>) {
    let backend = Arc::new(MemoryCacheBackend::new());
    (CacheManager::new(backend.clone(), "test"), backend)
}
