use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use owge_sync_core::events;
use owge_sync_core::{MissionReport, MissionReportResponse, UnreadCounters};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{get_json, post_json, GameApi};
use crate::cache::{CacheEntry, CacheManager};
use crate::error::{HandlerError, ProgrammingError};
use crate::handler::{DomainHandler, EventTable};
use crate::projection::Projection;

/// Reports downloaded so far, without duplicates.
#[derive(Debug, Default)]
struct ReportLedger {
    reports: Vec<MissionReport>,
    seen: HashSet<u64>,
}

impl ReportLedger {
    /// Adds the reports not seen before. A refresh (first page or pushed
    /// change) goes in front as one block, keeping its order; later pages
    /// are appended.
    fn merge(&mut self, incoming: Vec<MissionReport>, append: bool) -> Vec<MissionReport> {
        let fresh: Vec<MissionReport> = incoming
            .into_iter()
            .filter(|report| self.seen.insert(report.id))
            .collect();
        if append {
            self.reports.extend(fresh);
        } else {
            self.reports.splice(0..0, fresh);
        }
        self.reports.clone()
    }
}

pub struct ReportStores {
    pub unread: CacheEntry<UnreadCounters>,
}

pub struct ReportHandler {
    api: Arc<dyn GameApi>,
    stores: ReportStores,
    ledger: Mutex<ReportLedger>,
    reports: Projection<Vec<MissionReport>>,
    user_unread: Projection<u64>,
    enemy_unread: Projection<u64>,
}

impl ReportHandler {
    pub const NAME: &'static str = "report";

    pub fn new(api: Arc<dyn GameApi>, cache: &CacheManager) -> Arc<Self> {
        Arc::new(Self {
            api,
            stores: Self::create_stores(cache),
            ledger: Mutex::new(ReportLedger::default()),
            reports: Projection::new(),
            user_unread: Projection::new(),
            enemy_unread: Projection::new(),
        })
    }

    pub fn create_stores(cache: &CacheManager) -> ReportStores {
        ReportStores {
            unread: cache.store("report.unread"),
        }
    }

    pub fn reports(&self) -> &Projection<Vec<MissionReport>> {
        &self.reports
    }

    pub fn user_unread(&self) -> &Projection<u64> {
        &self.user_unread
    }

    pub fn enemy_unread(&self) -> &Projection<u64> {
        &self.enemy_unread
    }

    pub async fn download_page(&self, page: u32) -> Result<(), HandlerError> {
        let response = self.fetch_page(page).await?;
        let merged = self.ledger.lock().merge(response.reports, page != 1);
        debug!(target: "owge.handler", handler = Self::NAME, page, reports = merged.len(), "report page merged");
        self.reports.publish(merged);
        Ok(())
    }

    pub async fn mark_as_read(&self, reports: &[MissionReport]) -> Result<(), HandlerError> {
        let ids: Vec<u64> = reports.iter().map(|report| report.id).collect();
        let _: Value = post_json(&*self.api, "report/mark-as-read", json!(ids)).await?;
        Ok(())
    }

    async fn fetch_page(&self, page: u32) -> Result<MissionReportResponse, HandlerError> {
        let path = format!("report/findMy?page={page}");
        Ok(get_json(&*self.api, &path).await?)
    }

    async fn on_change(&self, content: MissionReportResponse) -> Result<(), HandlerError> {
        let counters = content.counters();
        let merged = self.ledger.lock().merge(content.reports, false);
        self.reports.publish(merged);
        self.on_count_change(counters).await
    }

    async fn on_count_change(&self, counters: UnreadCounters) -> Result<(), HandlerError> {
        self.publish_counters(counters);
        self.stores.unread.save(&counters).await?;
        Ok(())
    }

    fn publish_counters(&self, counters: UnreadCounters) {
        self.user_unread.publish(counters.user_unread);
        self.enemy_unread.publish(counters.enemy_unread);
    }
}

#[async_trait]
impl DomainHandler for ReportHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn event_table(self: Arc<Self>) -> Result<EventTable, ProgrammingError> {
        EventTable::builder(&self, Self::NAME)
            .on(
                events::MISSION_REPORT_CHANGE,
                |handler: Arc<Self>, content: MissionReportResponse| async move {
                    handler.on_change(content).await
                },
            )
            .on(
                events::MISSION_REPORT_COUNT_CHANGE,
                |handler: Arc<Self>, counters: UnreadCounters| async move {
                    handler.on_count_change(counters).await
                },
            )
            .build()
    }

    async fn sync(&self) -> Result<(), HandlerError> {
        let first_page = self.fetch_page(1).await?;
        self.on_change(first_page).await
    }

    async fn initial_offline(&self) -> Result<(), HandlerError> {
        self.stores
            .unread
            .do_if_not_null(|counters| async move {
                self.publish_counters(counters);
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Method;
    use crate::test_support::{memory_cache, ScriptedApi};

    fn page(ids: &[u64]) -> Value {
        let reports: Vec<Value> = ids
            .iter()
            .map(|id| json!({ "id": id, "missionDate": 1_600_000_000_000u64 + id }))
            .collect();
        json!({ "reports": reports, "userUnread": ids.len(), "enemyUnread": 0 })
    }

    fn ids(handler: &ReportHandler) -> Vec<u64> {
        handler
            .reports()
            .current()
            .unwrap_or_default()
            .iter()
            .map(|report| report.id)
            .collect()
    }

    #[tokio::test]
    async fn pages_accumulate_without_duplicates() {
        let api = ScriptedApi::new();
        let (cache, _backend) = memory_cache();
        api.respond(Method::Get, "report/findMy?page=1", page(&[10, 9]));
        api.respond(Method::Get, "report/findMy?page=2", page(&[9, 8, 7]));
        let handler = ReportHandler::new(api, &cache);

        handler.download_page(1).await.unwrap();
        assert_eq!(ids(&handler), vec![10, 9]);
        handler.download_page(2).await.unwrap();
        assert_eq!(ids(&handler), vec![10, 9, 8, 7]);
        handler.download_page(1).await.unwrap();
        assert_eq!(ids(&handler), vec![10, 9, 8, 7]);
    }

    #[tokio::test]
    async fn pushed_reports_go_in_front() {
        let api = ScriptedApi::new();
        let (cache, backend) = memory_cache();
        api.respond(Method::Get, "report/findMy?page=1", page(&[5, 4]));
        let handler = ReportHandler::new(api, &cache);
        handler.sync().await.unwrap();

        let table = Arc::clone(&handler).event_table().unwrap();
        table
            .execute(events::MISSION_REPORT_CHANGE, page(&[7, 6, 5]))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(ids(&handler), vec![7, 6, 5, 4]);
        assert_eq!(handler.user_unread().current(), Some(3));
        assert_eq!(
            backend.snapshot("test:report.unread"),
            Some(json!({ "userUnread": 3, "enemyUnread": 0 }))
        );
        let first = &handler.reports().current().unwrap()[0];
        assert!(first.normalized_date().is_some());
    }

    #[tokio::test]
    async fn count_change_only_touches_counters() {
        let api = ScriptedApi::new();
        let (cache, _backend) = memory_cache();
        let handler = ReportHandler::new(api, &cache);
        let table = Arc::clone(&handler).event_table().unwrap();
        table
            .execute(
                events::MISSION_REPORT_COUNT_CHANGE,
                json!({ "userUnread": 2, "enemyUnread": 1 }),
            )
            .unwrap()
            .await
            .unwrap();
        assert_eq!(handler.user_unread().current(), Some(2));
        assert_eq!(handler.enemy_unread().current(), Some(1));
        assert!(handler.reports().is_empty());
    }

    #[tokio::test]
    async fn offline_bootstrap_restores_counters() {
        let api = ScriptedApi::new();
        let (cache, backend) = memory_cache();
        backend.insert("test:report.unread", json!({ "userUnread": 4, "enemyUnread": 2 }));
        let handler = ReportHandler::new(api, &cache);
        handler.initial_offline().await.unwrap();
        assert_eq!(handler.user_unread().current(), Some(4));
        assert_eq!(handler.enemy_unread().current(), Some(2));
    }

    #[tokio::test]
    async fn mark_as_read_posts_ids() {
        let api = ScriptedApi::new();
        let (cache, _backend) = memory_cache();
        api.respond(Method::Get, "report/findMy?page=1", page(&[3, 2]));
        api.respond(Method::Post, "report/mark-as-read", Value::Null);
        let handler = ReportHandler::new(api.clone(), &cache);
        handler.sync().await.unwrap();

        let reports = handler.reports().current().unwrap();
        handler.mark_as_read(&reports).await.unwrap();
        let (method, path, body) = api.calls().pop().unwrap();
        assert_eq!((method, path.as_str()), (Method::Post, "report/mark-as-read"));
        assert_eq!(body, Some(json!([3, 2])));
    }
}
