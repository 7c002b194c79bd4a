use std::sync::Arc;

use async_trait::async_trait;
use owge_sync_core::events;
use owge_sync_core::{Improvement, MissionType, MyUnitMissions, RunningMission, SelectedUnit};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::debug;

use crate::api::{get_json, post_json, GameApi};
use crate::cache::{find_from_cache_or_run, CacheEntry, CacheManager};
use crate::error::{HandlerError, ProgrammingError};
use crate::handler::{DomainHandler, EventTable};
use crate::projection::Projection;

pub struct MissionStores {
    pub my: CacheEntry<Vec<RunningMission>>,
    pub enemy: CacheEntry<Vec<RunningMission>>,
    pub count: CacheEntry<u64>,
}

pub struct MissionHandler {
    api: Arc<dyn GameApi>,
    stores: MissionStores,
    my_unit_missions: Projection<Vec<RunningMission>>,
    enemy_unit_missions: Projection<Vec<RunningMission>>,
    missions_count: Projection<u64>,
    max_missions: Projection<u32>,
}

fn with_browser_dates(
    event: &'static str,
    missions: Vec<RunningMission>,
    now: OffsetDateTime,
) -> Result<Vec<RunningMission>, HandlerError> {
    missions
        .into_iter()
        .map(|mission| mission.with_browser_termination_date(now))
        .collect::<Result<_, _>>()
        .map_err(|source| HandlerError::Date { event, source })
}

impl MissionHandler {
    pub const NAME: &'static str = "mission";

    pub fn new(api: Arc<dyn GameApi>, cache: &CacheManager) -> Arc<Self> {
        Arc::new(Self {
            api,
            stores: Self::create_stores(cache),
            my_unit_missions: Projection::new(),
            enemy_unit_missions: Projection::new(),
            missions_count: Projection::new(),
            max_missions: Projection::new(),
        })
    }

    pub fn create_stores(cache: &CacheManager) -> MissionStores {
        MissionStores {
            my: cache.store("mission.my"),
            enemy: cache.store("mission.enemy"),
            count: cache.store("mission.count"),
        }
    }

    pub fn my_unit_missions(&self) -> &Projection<Vec<RunningMission>> {
        &self.my_unit_missions
    }

    pub fn enemy_unit_missions(&self) -> &Projection<Vec<RunningMission>> {
        &self.enemy_unit_missions
    }

    pub fn missions_count(&self) -> &Projection<u64> {
        &self.missions_count
    }

    pub fn max_missions(&self) -> &Projection<u32> {
        &self.max_missions
    }

    /// Tracks the mission cap granted by the player's improvements.
    pub fn apply_improvement(&self, improvement: &Improvement) {
        if let Some(max) = improvement.more_misions {
            self.max_missions.publish(max);
        }
    }

    pub async fn send_mission(
        &self,
        mission_type: MissionType,
        source_planet_id: u64,
        target_planet_id: u64,
        involved_units: &[SelectedUnit],
    ) -> Result<(), HandlerError> {
        let path = mission_type
            .send_path()
            .ok_or(ProgrammingError::UnsendableMission(mission_type))?;
        let result: Value = post_json(
            &*self.api,
            path,
            json!({
                "sourcePlanetId": source_planet_id,
                "targetPlanetId": target_planet_id,
                "involvedUnits": involved_units,
            }),
        )
        .await?;
        if let Some(count) = result.get("missionsCount").and_then(Value::as_u64) {
            self.on_missions_count_change(count).await?;
        }
        Ok(())
    }

    pub async fn cancel_mission(&self, mission_id: u64) -> Result<(), HandlerError> {
        let path = format!("mission/cancel?id={mission_id}");
        let _: Value = post_json(&*self.api, &path, json!({})).await?;
        Ok(())
    }

    async fn on_my_unit_missions_change(&self, content: MyUnitMissions) -> Result<(), HandlerError> {
        self.on_missions_count_change(content.count).await?;
        let missions = with_browser_dates(
            events::UNIT_MISSION_CHANGE,
            content.my_unit_missions,
            OffsetDateTime::now_utc(),
        )?;
        debug!(target: "owge.handler", handler = Self::NAME, missions = missions.len(), "my unit missions changed");
        self.my_unit_missions.publish(missions.clone());
        self.stores.my.save(&missions).await?;
        Ok(())
    }

    async fn on_enemy_mission_change(&self, content: Vec<RunningMission>) -> Result<(), HandlerError> {
        let missions =
            with_browser_dates(events::ENEMY_MISSION_CHANGE, content, OffsetDateTime::now_utc())?;
        debug!(target: "owge.handler", handler = Self::NAME, missions = missions.len(), "enemy missions changed");
        self.enemy_unit_missions.publish(missions.clone());
        self.stores.enemy.save(&missions).await?;
        Ok(())
    }

    async fn on_missions_count_change(&self, count: u64) -> Result<(), HandlerError> {
        self.missions_count.publish(count);
        self.stores.count.save(&count).await?;
        Ok(())
    }

    async fn fetch_missions(
        &self,
        event: &'static str,
        path: &str,
    ) -> Result<Vec<RunningMission>, HandlerError> {
        let missions = get_json::<Vec<RunningMission>>(&*self.api, path).await?;
        with_browser_dates(event, missions, OffsetDateTime::now_utc())
    }
}

#[async_trait]
impl DomainHandler for MissionHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn event_table(self: Arc<Self>) -> Result<EventTable, ProgrammingError> {
        EventTable::builder(&self, Self::NAME)
            .on(
                events::UNIT_MISSION_CHANGE,
                |handler: Arc<Self>, content: MyUnitMissions| async move {
                    handler.on_my_unit_missions_change(content).await
                },
            )
            .on(
                events::MISSIONS_COUNT_CHANGE,
                |handler: Arc<Self>, count: u64| async move {
                    handler.on_missions_count_change(count).await
                },
            )
            .on(
                events::ENEMY_MISSION_CHANGE,
                |handler: Arc<Self>, content: Vec<RunningMission>| async move {
                    handler.on_enemy_mission_change(content).await
                },
            )
            .build()
    }

    async fn sync(&self) -> Result<(), HandlerError> {
        let count = find_from_cache_or_run(
            events::MISSIONS_COUNT_CHANGE,
            &self.stores.count,
            |cached| {
                self.missions_count.warm(cached);
            },
            || get_json::<u64>(&*self.api, "mission/count"),
        )
        .await?;
        let my_unit_missions = find_from_cache_or_run(
            events::UNIT_MISSION_CHANGE,
            &self.stores.my,
            |cached| {
                self.my_unit_missions.warm(cached);
            },
            || self.fetch_missions(events::UNIT_MISSION_CHANGE, "mission/findMy"),
        )
        .await?;
        self.on_my_unit_missions_change(MyUnitMissions {
            count,
            my_unit_missions,
        })
        .await?;

        let enemy = find_from_cache_or_run(
            events::ENEMY_MISSION_CHANGE,
            &self.stores.enemy,
            |cached| {
                self.enemy_unit_missions.warm(cached);
            },
            || self.fetch_missions(events::ENEMY_MISSION_CHANGE, "mission/findEnemy"),
        )
        .await?;
        self.on_enemy_mission_change(enemy).await
    }

    async fn initial_offline(&self) -> Result<(), HandlerError> {
        if let Some(count) = self.stores.count.find().await? {
            self.stores
                .my
                .do_if_not_null(|my_unit_missions| {
                    self.on_my_unit_missions_change(MyUnitMissions {
                        count,
                        my_unit_missions,
                    })
                })
                .await?;
        }
        self.stores
            .enemy
            .do_if_not_null(|missions| self.on_enemy_mission_change(missions))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Method;
    use crate::test_support::{memory_cache, ScriptedApi};
    use owge_sync_core::dates;
    use std::time::Duration;
    use tokio::time::timeout;

    fn mission(id: u64, pending: i64) -> Value {
        json!({ "id": id, "type": "ATTACK", "pendingMillis": pending })
    }

    #[tokio::test]
    async fn sync_previews_cache_then_network_value_wins() {
        let api = ScriptedApi::new();
        let (cache, backend) = memory_cache();
        backend.insert("test:mission.count", json!(3));
        api.respond(Method::Get, "mission/count", json!(5));
        api.respond(Method::Get, "mission/findMy", json!([mission(1, 1000)]));
        api.respond(Method::Get, "mission/findEnemy", json!([]));
        let gate = api.gate(Method::Get, "mission/count");

        let handler = MissionHandler::new(api.clone(), &cache);
        let mut count = handler.missions_count().subscribe();
        let running = tokio::spawn({
            let handler = Arc::clone(&handler);
            async move { handler.sync().await }
        });

        timeout(Duration::from_secs(5), count.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*count.borrow_and_update(), Some(3));

        gate.notify_one();
        timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(handler.missions_count().current(), Some(5));
        assert_eq!(backend.snapshot("test:mission.count"), Some(json!(5)));
        let mine = handler.my_unit_missions().current().unwrap();
        assert_eq!(mine.len(), 1);
        assert!(mine[0].browser_computed_termination_date.is_some());
        assert_eq!(handler.enemy_unit_missions().current(), Some(vec![]));
    }

    #[tokio::test]
    async fn failed_fetch_fails_the_sync() {
        let api = ScriptedApi::new();
        let (cache, _backend) = memory_cache();
        api.respond(Method::Get, "mission/count", json!(1));
        api.fail(Method::Get, "mission/findMy", 500);

        let handler = MissionHandler::new(api.clone(), &cache);
        assert!(matches!(handler.sync().await, Err(HandlerError::Api(_))));
        assert_eq!(api.calls_to(Method::Get, "mission/findEnemy"), 0);
    }

    #[tokio::test]
    async fn out_of_range_pending_time_fails_the_sync() {
        let api = ScriptedApi::new();
        let (cache, backend) = memory_cache();
        api.respond(Method::Get, "mission/count", json!(1));
        api.respond(
            Method::Get,
            "mission/findMy",
            json!([mission(1, 400_000_000_000_000)]),
        );

        let handler = MissionHandler::new(api.clone(), &cache);
        let err = handler.sync().await.unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Date { event: events::UNIT_MISSION_CHANGE, .. }
        ));
        assert!(handler.my_unit_missions().is_empty());
        assert_eq!(backend.snapshot("test:mission.my"), None);
    }

    #[tokio::test]
    async fn replaying_a_mission_push_publishes_the_same_snapshot() {
        let api = ScriptedApi::new();
        let (cache, _backend) = memory_cache();
        let handler = MissionHandler::new(api, &cache);
        let table = Arc::clone(&handler).event_table().unwrap();
        let payload = json!({ "count": 2, "myUnitMissions": [mission(4, 100), mission(5, 100)] });
        // Termination dates follow the local clock, everything else must match.
        let without_dates = |missions: Vec<RunningMission>| {
            missions
                .into_iter()
                .map(|mut mission| {
                    mission.browser_computed_termination_date = None;
                    mission
                })
                .collect::<Vec<_>>()
        };

        let mut snapshots = Vec::new();
        for _ in 0..2 {
            table
                .execute(events::UNIT_MISSION_CHANGE, payload.clone())
                .unwrap()
                .await
                .unwrap();
            snapshots.push((
                handler.missions_count().current(),
                without_dates(handler.my_unit_missions().current().unwrap()),
            ));
        }
        assert_eq!(snapshots[0], snapshots[1]);
        assert_eq!(snapshots[1].1.len(), 2);
    }

    #[tokio::test]
    async fn offline_bootstrap_needs_count_for_own_missions() {
        let api = ScriptedApi::new();
        let (cache, backend) = memory_cache();
        backend.insert("test:mission.my", json!([mission(1, 10)]));
        backend.insert("test:mission.enemy", json!([mission(2, 10)]));

        let handler = MissionHandler::new(api.clone(), &cache);
        handler.initial_offline().await.unwrap();
        assert!(handler.my_unit_missions().is_empty());
        assert_eq!(handler.enemy_unit_missions().current().unwrap()[0].id, 2);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn offline_bootstrap_keeps_cached_termination_dates() {
        let api = ScriptedApi::new();
        let (cache, backend) = memory_cache();
        backend.insert("test:mission.count", json!(1));
        backend.insert(
            "test:mission.my",
            json!([{ "id": 1, "type": "GATHER", "pendingMillis": 10, "browserComputedTerminationDate": 1234 }]),
        );

        let handler = MissionHandler::new(api, &cache);
        handler.initial_offline().await.unwrap();
        let mine = handler.my_unit_missions().current().unwrap();
        assert_eq!(
            mine[0].browser_computed_termination_date,
            Some(dates::from_millis(1234).unwrap())
        );
        assert_eq!(handler.missions_count().current(), Some(1));
    }

    #[tokio::test]
    async fn pushed_events_update_projections_and_cache() {
        let api = ScriptedApi::new();
        let (cache, backend) = memory_cache();
        let handler = MissionHandler::new(api, &cache);
        let table = Arc::clone(&handler).event_table().unwrap();

        table
            .execute(
                events::UNIT_MISSION_CHANGE,
                json!({ "count": 2, "myUnitMissions": [mission(4, 100), mission(5, 100)] }),
            )
            .unwrap()
            .await
            .unwrap();
        assert_eq!(handler.missions_count().current(), Some(2));
        assert_eq!(handler.my_unit_missions().current().unwrap().len(), 2);
        assert_eq!(backend.snapshot("test:mission.count"), Some(json!(2)));

        table
            .execute(events::MISSIONS_COUNT_CHANGE, json!(1))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(handler.missions_count().current(), Some(1));
    }

    #[tokio::test]
    async fn send_mission_posts_to_type_endpoint() {
        let api = ScriptedApi::new();
        let (cache, _backend) = memory_cache();
        api.respond(Method::Post, "mission/gather", json!({ "missionsCount": 4 }));
        let handler = MissionHandler::new(api.clone(), &cache);

        handler
            .send_mission(MissionType::Gather, 1, 2, &[SelectedUnit { id: 9, count: 3 }])
            .await
            .unwrap();
        assert_eq!(handler.missions_count().current(), Some(4));
        let (_, _, body) = api.calls().pop().unwrap();
        assert_eq!(
            body,
            Some(json!({
                "sourcePlanetId": 1,
                "targetPlanetId": 2,
                "involvedUnits": [{ "id": 9, "count": 3 }]
            }))
        );

        let err = handler
            .send_mission(MissionType::BuildUnit, 1, 2, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Programming(ProgrammingError::UnsendableMission(MissionType::BuildUnit))
        ));
    }

    #[tokio::test]
    async fn cancel_mission_posts_id() {
        let api = ScriptedApi::new();
        let (cache, _backend) = memory_cache();
        api.respond(Method::Post, "mission/cancel?id=12", Value::Null);
        let handler = MissionHandler::new(api.clone(), &cache);
        handler.cancel_mission(12).await.unwrap();
        assert_eq!(api.calls_to(Method::Post, "mission/cancel?id=12"), 1);
    }
}
