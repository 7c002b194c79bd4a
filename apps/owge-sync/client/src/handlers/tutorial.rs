use std::sync::Arc;

use async_trait::async_trait;
use owge_sync_core::events;
use owge_sync_core::TutorialSectionEntry;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{get_json, post_json, GameApi};
use crate::cache::{find_from_cache_or_run, CacheEntry, CacheManager};
use crate::error::{HandlerError, ProgrammingError};
use crate::handler::{DomainHandler, EventTable};
use crate::projection::Projection;

pub struct TutorialStores {
    pub entries: CacheEntry<Vec<TutorialSectionEntry>>,
    pub visited_entries: CacheEntry<Vec<u64>>,
}

pub struct TutorialHandler {
    api: Arc<dyn GameApi>,
    stores: TutorialStores,
    entries: Projection<Vec<TutorialSectionEntry>>,
    visited_entries: Projection<Vec<u64>>,
    applicable_entries: Projection<Vec<TutorialSectionEntry>>,
    active_route: Mutex<Option<String>>,
}

impl TutorialHandler {
    pub const NAME: &'static str = "tutorial";

    pub fn new(api: Arc<dyn GameApi>, cache: &CacheManager) -> Arc<Self> {
        Arc::new(Self {
            api,
            stores: Self::create_stores(cache),
            entries: Projection::new(),
            visited_entries: Projection::new(),
            applicable_entries: Projection::new(),
            active_route: Mutex::new(None),
        })
    }

    pub fn create_stores(cache: &CacheManager) -> TutorialStores {
        TutorialStores {
            entries: cache.store("tutorial.entries"),
            visited_entries: cache.store("tutorial.visited_entries"),
        }
    }

    pub fn entries(&self) -> &Projection<Vec<TutorialSectionEntry>> {
        &self.entries
    }

    pub fn visited_entries(&self) -> &Projection<Vec<u64>> {
        &self.visited_entries
    }

    /// Updated by every [`TutorialHandler::trigger_tutorial`] that had
    /// entries and an active route to work with.
    pub fn applicable_entries(&self) -> &Projection<Vec<TutorialSectionEntry>> {
        &self.applicable_entries
    }

    pub fn set_active_route(&self, route: impl Into<String>) {
        *self.active_route.lock() = Some(route.into());
        self.trigger_tutorial();
    }

    /// Publishes the entries not yet visited that apply to the active route.
    /// Does nothing until entries are loaded and a route is known; loading
    /// the entries or setting the route triggers it again.
    pub fn trigger_tutorial(&self) {
        let entries = match self.entries.current() {
            Some(entries) if !entries.is_empty() => entries,
            _ => return,
        };
        let Some(route) = self.active_route.lock().clone() else {
            return;
        };
        let visited = self.visited_entries.current().unwrap_or_default();
        let applicable: Vec<TutorialSectionEntry> = entries
            .into_iter()
            .filter(|entry| !visited.contains(&entry.id) && entry.applies_to(&route))
            .collect();
        debug!(target: "owge.handler", handler = Self::NAME, %route, applicable = applicable.len(), "tutorial triggered");
        self.applicable_entries.publish(applicable);
    }

    pub async fn add_visited(&self, entry_id: u64) -> Result<(), HandlerError> {
        let _: Value = post_json(&*self.api, "tutorial/visited-entries", json!(entry_id)).await?;
        Ok(())
    }

    async fn on_entries_change(&self, entries: Vec<TutorialSectionEntry>) -> Result<(), HandlerError> {
        self.stores.entries.save(&entries).await?;
        self.entries.publish(entries);
        self.trigger_tutorial();
        Ok(())
    }

    async fn on_visited_change(&self, visited: Vec<u64>) -> Result<(), HandlerError> {
        self.stores.visited_entries.save(&visited).await?;
        self.visited_entries.publish(visited);
        self.trigger_tutorial();
        Ok(())
    }
}

#[async_trait]
impl DomainHandler for TutorialHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn event_table(self: Arc<Self>) -> Result<EventTable, ProgrammingError> {
        EventTable::builder(&self, Self::NAME)
            .on(
                events::VISITED_TUTORIAL_ENTRY_CHANGE,
                |handler: Arc<Self>, visited: Vec<u64>| async move {
                    handler.on_visited_change(visited).await
                },
            )
            .build()
    }

    async fn sync(&self) -> Result<(), HandlerError> {
        let entries = find_from_cache_or_run(
            events::TUTORIAL_ENTRIES_CHANGE,
            &self.stores.entries,
            |cached| {
                self.entries.warm(cached);
            },
            || get_json::<Vec<TutorialSectionEntry>>(&*self.api, "tutorial/entries"),
        )
        .await?;
        self.on_entries_change(entries).await?;

        let visited = find_from_cache_or_run(
            events::VISITED_TUTORIAL_ENTRY_CHANGE,
            &self.stores.visited_entries,
            |cached| {
                self.visited_entries.warm(cached);
            },
            || get_json::<Vec<u64>>(&*self.api, "tutorial/visited-entries"),
        )
        .await?;
        self.on_visited_change(visited).await
    }

    async fn initial_offline(&self) -> Result<(), HandlerError> {
        tokio::try_join!(
            self.stores
                .entries
                .do_if_not_null(|entries| self.on_entries_change(entries)),
            self.stores
                .visited_entries
                .do_if_not_null(|visited| self.on_visited_change(visited)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Method;
    use crate::test_support::{memory_cache, ScriptedApi};

    fn entries() -> Value {
        json!([
            { "id": 1, "order": 1, "htmlSymbol": { "sectionFrontendPath": "/planets" } },
            { "id": 2, "order": 2, "htmlSymbol": { "sectionFrontendPath": "/units" } },
            { "id": 3, "order": 3, "htmlSymbol": { "sectionFrontendPath": "" } },
            { "id": 4, "order": 4, "htmlSymbol": { "sectionFrontendPath": "/planets" } }
        ])
    }

    fn applicable_ids(handler: &TutorialHandler) -> Vec<u64> {
        handler
            .applicable_entries()
            .current()
            .unwrap_or_default()
            .iter()
            .map(|entry| entry.id)
            .collect()
    }

    #[tokio::test]
    async fn visited_change_publishes_applicable_entries() {
        let api = ScriptedApi::new();
        let (cache, _backend) = memory_cache();
        api.respond(Method::Get, "tutorial/entries", entries());
        api.respond(Method::Get, "tutorial/visited-entries", json!([4]));
        let handler = TutorialHandler::new(api, &cache);
        handler.set_active_route("/planets");

        handler.sync().await.unwrap();
        assert_eq!(applicable_ids(&handler), vec![1, 3]);

        let table = Arc::clone(&handler).event_table().unwrap();
        table
            .execute(events::VISITED_TUTORIAL_ENTRY_CHANGE, json!([4, 1]))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(applicable_ids(&handler), vec![3]);
    }

    #[tokio::test]
    async fn trigger_waits_for_entries_and_route() {
        let api = ScriptedApi::new();
        let (cache, backend) = memory_cache();
        backend.insert("test:tutorial.visited_entries", json!([]));
        let handler = TutorialHandler::new(api, &cache);

        handler.initial_offline().await.unwrap();
        assert_eq!(handler.visited_entries().current(), Some(vec![]));
        handler.trigger_tutorial();
        assert!(handler.applicable_entries().is_empty());

        backend.insert("test:tutorial.entries", entries());
        handler.initial_offline().await.unwrap();
        handler.trigger_tutorial();
        assert!(handler.applicable_entries().is_empty());

        handler.set_active_route("/units");
        assert_eq!(applicable_ids(&handler), vec![2, 3]);
    }

    #[tokio::test]
    async fn visited_ids_loaded_before_entries_still_trigger() {
        let api = ScriptedApi::new();
        let (cache, _backend) = memory_cache();
        let handler = TutorialHandler::new(api, &cache);
        handler.set_active_route("/planets");

        handler.on_visited_change(vec![4]).await.unwrap();
        assert!(handler.applicable_entries().is_empty());

        let loaded: Vec<TutorialSectionEntry> = serde_json::from_value(entries()).unwrap();
        handler.on_entries_change(loaded).await.unwrap();
        assert_eq!(applicable_ids(&handler), vec![1, 3]);
    }

    #[tokio::test]
    async fn replaying_visited_entries_publishes_the_same_snapshot() {
        let api = ScriptedApi::new();
        let (cache, backend) = memory_cache();
        backend.insert("test:tutorial.entries", entries());
        let handler = TutorialHandler::new(api, &cache);
        handler.set_active_route("/planets");
        handler.initial_offline().await.unwrap();
        let table = Arc::clone(&handler).event_table().unwrap();

        let mut snapshots = Vec::new();
        for _ in 0..2 {
            table
                .execute(events::VISITED_TUTORIAL_ENTRY_CHANGE, json!([1]))
                .unwrap()
                .await
                .unwrap();
            snapshots.push((
                handler.visited_entries().current(),
                applicable_ids(&handler),
            ));
        }
        assert_eq!(snapshots[0], snapshots[1]);
        assert_eq!(snapshots[1], (Some(vec![1]), vec![3, 4]));
    }

    #[tokio::test]
    async fn add_visited_posts_entry_id() {
        let api = ScriptedApi::new();
        let (cache, _backend) = memory_cache();
        api.respond(Method::Post, "tutorial/visited-entries", Value::Null);
        let handler = TutorialHandler::new(api.clone(), &cache);
        handler.add_visited(7).await.unwrap();
        let (_, _, body) = api.calls().pop().unwrap();
        assert_eq!(body, Some(json!(7)));
    }
}
