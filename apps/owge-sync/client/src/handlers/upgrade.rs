use std::sync::Arc;

use async_trait::async_trait;
use owge_sync_core::events;
use owge_sync_core::{ObtainedUpgrade, RunningUpgrade};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::api::{get_json, GameApi};
use crate::cache::{find_from_cache_or_run, CacheEntry, CacheManager};
use crate::error::{HandlerError, ProgrammingError};
use crate::handler::{DomainHandler, EventTable};
use crate::projection::Projection;

pub struct UpgradeStores {
    pub obtained: CacheEntry<Vec<ObtainedUpgrade>>,
    pub running: CacheEntry<Option<RunningUpgrade>>,
}

pub struct UpgradeHandler {
    api: Arc<dyn GameApi>,
    stores: UpgradeStores,
    obtained: Projection<Vec<ObtainedUpgrade>>,
    running: Projection<Option<RunningUpgrade>>,
}

fn with_browser_date(running: Option<RunningUpgrade>) -> Result<Option<RunningUpgrade>, HandlerError> {
    let now = OffsetDateTime::now_utc();
    running
        .map(|running| running.with_browser_termination_date(now))
        .transpose()
        .map_err(|source| HandlerError::Date {
            event: events::RUNNING_UPGRADE_CHANGE,
            source,
        })
}

impl UpgradeHandler {
    pub const NAME: &'static str = "upgrade";

    pub fn new(api: Arc<dyn GameApi>, cache: &CacheManager) -> Arc<Self> {
        Arc::new(Self {
            api,
            stores: Self::create_stores(cache),
            obtained: Projection::new(),
            running: Projection::new(),
        })
    }

    pub fn create_stores(cache: &CacheManager) -> UpgradeStores {
        UpgradeStores {
            obtained: cache.store("upgrade.obtained"),
            running: cache.store("upgrade.running"),
        }
    }

    pub fn obtained(&self) -> &Projection<Vec<ObtainedUpgrade>> {
        &self.obtained
    }

    /// The level-up being researched; `Some(None)` once the server said there is none.
    pub fn running(&self) -> &Projection<Option<RunningUpgrade>> {
        &self.running
    }

    pub fn find_one_obtained(&self, upgrade_id: u64) -> Option<ObtainedUpgrade> {
        self.obtained
            .current()?
            .into_iter()
            .find(|obtained| obtained.upgrade.id == upgrade_id)
    }

    pub async fn register_level_up(&self, upgrade_id: u64) -> Result<(), HandlerError> {
        let path = format!("upgrade/registerLevelUp?upgradeId={upgrade_id}");
        let _: Value = get_json(&*self.api, &path).await?;
        Ok(())
    }

    pub async fn cancel_upgrade(&self) -> Result<(), HandlerError> {
        let _: Value = get_json(&*self.api, "upgrade/cancelUpgrade").await?;
        Ok(())
    }

    async fn on_obtained_change(&self, content: Vec<ObtainedUpgrade>) -> Result<(), HandlerError> {
        self.stores.obtained.save(&content).await?;
        debug!(target: "owge.handler", handler = Self::NAME, obtained = content.len(), "obtained upgrades changed");
        self.obtained.publish(content);
        Ok(())
    }

    async fn on_running_change(&self, content: Option<RunningUpgrade>) -> Result<(), HandlerError> {
        let running = with_browser_date(content)?;
        self.stores.running.save(&running).await?;
        self.running.publish(running);
        Ok(())
    }
}

#[async_trait]
impl DomainHandler for UpgradeHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn event_table(self: Arc<Self>) -> Result<EventTable, ProgrammingError> {
        EventTable::builder(&self, Self::NAME)
            .on(
                events::OBTAINED_UPGRADES_CHANGE,
                |handler: Arc<Self>, content: Vec<ObtainedUpgrade>| async move {
                    handler.on_obtained_change(content).await
                },
            )
            .on(
                events::RUNNING_UPGRADE_CHANGE,
                |handler: Arc<Self>, content: Option<RunningUpgrade>| async move {
                    handler.on_running_change(content).await
                },
            )
            .build()
    }

    async fn sync(&self) -> Result<(), HandlerError> {
        let obtained = find_from_cache_or_run(
            events::OBTAINED_UPGRADES_CHANGE,
            &self.stores.obtained,
            |cached| {
                self.obtained.warm(cached);
            },
            || get_json::<Vec<ObtainedUpgrade>>(&*self.api, "upgrade/findObtained"),
        )
        .await?;
        self.on_obtained_change(obtained).await?;

        let running = find_from_cache_or_run(
            events::RUNNING_UPGRADE_CHANGE,
            &self.stores.running,
            |cached| {
                self.running.warm(cached);
            },
            || async move {
                let running =
                    get_json::<Option<RunningUpgrade>>(&*self.api, "upgrade/findRunningUpgrade")
                        .await?;
                with_browser_date(running)
            },
        )
        .await?;
        self.on_running_change(running).await
    }

    async fn initial_offline(&self) -> Result<(), HandlerError> {
        self.stores
            .obtained
            .do_if_not_null(|content| self.on_obtained_change(content))
            .await?;
        self.stores
            .running
            .do_if_not_null(|content| self.on_running_change(content))
            .await
    }
}
