use std::sync::Arc;

use tracing::{info, warn};

use crate::api::{GameApi, HttpGameApi};
use crate::cache::{CacheBackend, CacheManager, FileCacheBackend, MemoryCacheBackend};
use crate::channel::Channel;
use crate::config::{ClientConfig, ReconnectPolicy};
use crate::connector::{Connector, WebSocketConnector};
use crate::error::{ProgrammingError, SyncError};
use crate::handlers::{MissionHandler, ReportHandler, TutorialHandler, UpgradeHandler};
use crate::service::{SyncReport, SyncService};

/// Everything one signed-in player needs: the sync service with the four
/// domain handlers registered on it.
pub struct GameSession {
    service: Arc<SyncService>,
    api: Arc<dyn GameApi>,
    cache: CacheManager,
    missions: Arc<MissionHandler>,
    reports: Arc<ReportHandler>,
    upgrades: Arc<UpgradeHandler>,
    tutorials: Arc<TutorialHandler>,
}

impl GameSession {
    pub fn from_config(config: &ClientConfig) -> Result<Self, ProgrammingError> {
        let token = config.token.clone().unwrap_or_default();
        let api: Arc<dyn GameApi> = Arc::new(HttpGameApi::new(&config.api_base_url, token));
        let backend: Arc<dyn CacheBackend> =
            match config.cache_dir.clone().or_else(FileCacheBackend::default_dir) {
                Some(dir) => {
                    info!(target: "owge.cache", dir = %dir.display(), "using file cache");
                    Arc::new(FileCacheBackend::new(dir))
                }
                None => {
                    warn!(target: "owge.cache", "no cache directory available, caching in memory");
                    Arc::new(MemoryCacheBackend::new())
                }
            };
        let cache = CacheManager::new(backend, &config.cache_namespace);
        Self::with_parts(Arc::new(WebSocketConnector::new()), config.reconnect, api, cache)
    }

    pub fn with_parts(
        connector: Arc<dyn Connector>,
        reconnect: ReconnectPolicy,
        api: Arc<dyn GameApi>,
        cache: CacheManager,
    ) -> Result<Self, ProgrammingError> {
        let (channel, events) = Channel::new(connector, reconnect);
        let service = SyncService::new(channel, events, &cache);

        let missions = MissionHandler::new(Arc::clone(&api), &cache);
        let reports = ReportHandler::new(Arc::clone(&api), &cache);
        let upgrades = UpgradeHandler::new(Arc::clone(&api), &cache);
        let tutorials = TutorialHandler::new(Arc::clone(&api), &cache);
        service.add_event_handler(missions.clone())?;
        service.add_event_handler(reports.clone())?;
        service.add_event_handler(upgrades.clone())?;
        service.add_event_handler(tutorials.clone())?;

        Ok(Self {
            service,
            api,
            cache,
            missions,
            reports,
            upgrades,
            tutorials,
        })
    }

    /// Shows cached state first, then connects and waits for the first sync.
    pub async fn start(&self, target: &str, token: Option<String>) -> Result<SyncReport, SyncError> {
        if let Some(token) = &token {
            self.api.set_token(token);
        }
        let failed = self.service.run_initial_offline().await;
        if !failed.is_empty() {
            warn!(target: "owge.sync", failed = ?failed, "offline bootstrap incomplete");
        }
        self.service.init_socket(target, token).await
    }

    pub fn set_authentication_token(&self, token: &str) {
        self.api.set_token(token);
        self.service.set_authentication_token(token);
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn missions(&self) -> &Arc<MissionHandler> {
        &self.missions
    }

    pub fn reports(&self) -> &Arc<ReportHandler> {
        &self.reports
    }

    pub fn upgrades(&self) -> &Arc<UpgradeHandler> {
        &self.upgrades
    }

    pub fn tutorials(&self) -> &Arc<TutorialHandler> {
        &self.tutorials
    }

    pub fn shutdown(&self) {
        self.service.shutdown();
    }
}
