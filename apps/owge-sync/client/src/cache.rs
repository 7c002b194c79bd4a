//! Last known-good payloads, persisted per key.
//!
//! Handlers write every authoritative value they publish and read it back on
//! offline bootstrap and as a preview while a sync is in flight. A failed
//! write raises the cache panic flag; the game keeps running on network data.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::error::CacheError;

#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError>;
}

#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.entries.write().insert(key.into(), value);
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.snapshot(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        self.insert(key, value);
        Ok(())
    }
}

/// One JSON document per key under `root`.
#[derive(Debug, Clone)]
pub struct FileCacheBackend {
    root: PathBuf,
}

impl FileCacheBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform cache directory for the client, if the OS exposes one.
    pub fn default_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "owge", "owge-sync").map(|dirs| dirs.cache_dir().to_path_buf())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
                _ => '_',
            })
            .collect();
        self.root.join(format!("{file}.json"))
    }
}

#[async_trait]
impl CacheBackend for FileCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(key);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, serde_json::to_vec(&value)?).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }
}

/// Hands out typed, namespaced entries over one backend.
#[derive(Clone)]
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    namespace: String,
    panic: Arc<watch::Sender<bool>>,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn CacheBackend>, namespace: impl Into<String>) -> Self {
        let (panic, _) = watch::channel(false);
        Self {
            backend,
            namespace: namespace.into(),
            panic: Arc::new(panic),
        }
    }

    pub fn store<T>(&self, key: &str) -> CacheEntry<T> {
        CacheEntry {
            key: format!("{}:{}", self.namespace, key),
            backend: Arc::clone(&self.backend),
            panic: Arc::clone(&self.panic),
            _marker: PhantomData,
        }
    }

    /// Raised once any write fails; never lowered.
    pub fn panic(&self) -> watch::Receiver<bool> {
        self.panic.subscribe()
    }

    pub fn is_panicking(&self) -> bool {
        *self.panic.borrow()
    }
}

pub struct CacheEntry<T> {
    key: String,
    backend: Arc<dyn CacheBackend>,
    panic: Arc<watch::Sender<bool>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            backend: Arc::clone(&self.backend),
            panic: Arc::clone(&self.panic),
            _marker: PhantomData,
        }
    }
}

impl<T> CacheEntry<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cached value, or `None` when absent, null or no longer decodable.
    pub async fn find(&self) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.backend.get(&self.key).await? else {
            return Ok(None);
        };
        if raw.is_null() {
            return Ok(None);
        }
        match serde_json::from_value(raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(target: "owge.cache", key = %self.key, error = %err, "discarding stale cache entry");
                Ok(None)
            }
        }
    }

    pub async fn save(&self, value: &T) -> Result<(), CacheError> {
        let result = match serde_json::to_value(value) {
            Ok(raw) => self.backend.set(&self.key, raw).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = &result {
            error!(target: "owge.cache", key = %self.key, error = %err, "cache write failed");
            self.panic.send_replace(true);
        }
        result
    }

    /// Runs `f` with the cached value when there is one.
    pub async fn do_if_not_null<F, Fut, E>(&self, f: F) -> Result<(), E>
    where
        F: FnOnce(T) -> Fut + Send,
        Fut: Future<Output = Result<(), E>> + Send,
        E: From<CacheError>,
    {
        match self.find().await? {
            Some(value) => f(value).await,
            None => Ok(()),
        }
    }
}

/// Cache-aside read-through: shows the cached value for `entry` through
/// `preview` right away, then always runs `fetch` and returns its result.
/// The caller reduces the returned value, which overwrites the preview.
pub async fn find_from_cache_or_run<T, P, F, Fut, E>(
    event_name: &str,
    entry: &CacheEntry<T>,
    preview: P,
    fetch: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned + Send,
    P: FnOnce(T),
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match entry.find().await {
        Ok(Some(cached)) => {
            debug!(target: "owge.cache", event = event_name, key = %entry.key(), "previewing cached value");
            preview(cached);
        }
        Ok(None) => {}
        Err(err) => {
            warn!(target: "owge.cache", event = event_name, error = %err, "cache read failed");
        }
    }
    fetch().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: Value) -> Result<(), CacheError> {
            Err(CacheError::Backend("quota exceeded".into()))
        }
    }

    #[tokio::test]
    async fn entries_are_namespaced_and_null_reads_as_missing() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let cache = CacheManager::new(backend.clone(), "universe-1:user-7");
        let entry = cache.store::<Vec<u64>>("mission.count");
        assert_eq!(entry.key(), "universe-1:user-7:mission.count");

        assert_eq!(entry.find().await.unwrap(), None);
        entry.save(&vec![1, 2]).await.unwrap();
        assert_eq!(
            backend.snapshot("universe-1:user-7:mission.count"),
            Some(json!([1, 2]))
        );

        backend.insert("universe-1:user-7:mission.count", Value::Null);
        assert_eq!(entry.find().await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_write_raises_panic_flag() {
        let cache = CacheManager::new(Arc::new(BrokenBackend), "ns");
        let mut panic = cache.panic();
        let entry = cache.store::<u64>("mission.count");
        assert!(entry.save(&3).await.is_err());
        assert!(cache.is_panicking());
        assert!(panic.has_changed().unwrap());
        assert!(*panic.borrow_and_update());
    }

    #[tokio::test]
    async fn do_if_not_null_skips_missing_values() {
        let cache = CacheManager::new(Arc::new(MemoryCacheBackend::new()), "ns");
        let entry = cache.store::<u64>("count");
        let mut calls = Vec::new();
        entry
            .do_if_not_null(|value| {
                calls.push(value);
                async { Ok::<_, CacheError>(()) }
            })
            .await
            .unwrap();
        assert!(calls.is_empty());

        entry.save(&9).await.unwrap();
        entry
            .do_if_not_null(|value| {
                calls.push(value);
                async { Ok::<_, CacheError>(()) }
            })
            .await
            .unwrap();
        assert_eq!(calls, vec![9]);
    }

    #[tokio::test]
    async fn read_through_previews_cache_but_returns_network_value() {
        let cache = CacheManager::new(Arc::new(MemoryCacheBackend::new()), "ns");
        let entry = cache.store::<u64>("mission.count");
        entry.save(&3).await.unwrap();

        let mut previewed = None;
        let fresh = find_from_cache_or_run(
            "missions_count_change",
            &entry,
            |cached| previewed = Some(cached),
            || async { Ok::<_, CacheError>(5) },
        )
        .await
        .unwrap();
        assert_eq!(previewed, Some(3));
        assert_eq!(fresh, 5);
    }

    #[tokio::test]
    async fn file_backend_persists_documents() {
        let root = std::env::temp_dir().join(format!("owge-sync-cache-{}", uuid::Uuid::new_v4()));
        let backend = FileCacheBackend::new(&root);
        assert_eq!(backend.get("ns:mission.my").await.unwrap(), None);

        backend
            .set("ns:mission.my", json!([{ "id": 1 }]))
            .await
            .unwrap();
        let reopened = FileCacheBackend::new(&root);
        assert_eq!(
            reopened.get("ns:mission.my").await.unwrap(),
            Some(json!([{ "id": 1 }]))
        );
        assert!(root.join("ns_mission.my.json").exists());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
