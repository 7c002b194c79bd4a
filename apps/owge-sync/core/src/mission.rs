use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::dates::{self, epoch_millis, DateOutOfRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionType {
    LevelUp,
    BuildUnit,
    Explore,
    ReturnMission,
    Gather,
    EstablishBase,
    Attack,
    Counterattack,
    Conquest,
    Deploy,
    Deployed,
    #[serde(other)]
    Unknown,
}

impl MissionType {
    /// Missions performed by units travelling between planets.
    pub fn is_unit_mission(self) -> bool {
        matches!(
            self,
            MissionType::ReturnMission
                | MissionType::Explore
                | MissionType::Gather
                | MissionType::EstablishBase
                | MissionType::Attack
                | MissionType::Counterattack
                | MissionType::Conquest
                | MissionType::Deploy
                | MissionType::Deployed
        )
    }

    pub fn is_build_mission(self) -> bool {
        self == MissionType::BuildUnit
    }

    /// Endpoint used to launch this mission, `None` for types a player can
    /// not send directly.
    pub fn send_path(self) -> Option<&'static str> {
        match self {
            MissionType::Explore => Some("mission/explorePlanet"),
            MissionType::Gather => Some("mission/gather"),
            MissionType::EstablishBase => Some("mission/establishBase"),
            MissionType::Attack => Some("mission/attack"),
            MissionType::Counterattack => Some("mission/counterattack"),
            MissionType::Conquest => Some("mission/conquest"),
            MissionType::Deploy => Some("mission/deploy"),
            _ => None,
        }
    }
}

/// A mission currently in flight, as pushed by the server. Fields the client
/// does not interpret are preserved in `details`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningMission {
    pub id: u64,
    #[serde(rename = "type")]
    pub mission_type: MissionType,
    #[serde(default)]
    pub pending_millis: i64,
    #[serde(
        default,
        with = "epoch_millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub browser_computed_termination_date: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl RunningMission {
    /// Fills the absolute termination date from `pending_millis`. A date
    /// computed earlier (for example by a previous session, then cached) is
    /// kept as is.
    pub fn with_browser_termination_date(
        mut self,
        received_at: OffsetDateTime,
    ) -> Result<Self, DateOutOfRange> {
        if self.browser_computed_termination_date.is_none() {
            self.browser_computed_termination_date = Some(dates::browser_termination_date(
                self.pending_millis,
                received_at,
            )?);
        }
        Ok(self)
    }
}

/// Payload of `unit_mission_change`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyUnitMissions {
    pub count: u64,
    #[serde(default)]
    pub my_unit_missions: Vec<RunningMission>,
}

/// Units picked for a mission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedUnit {
    pub id: u64,
    pub count: u64,
}
