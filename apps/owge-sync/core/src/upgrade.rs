use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::dates::{self, epoch_millis, DateOutOfRange};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upgrade {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub primary_resource: f64,
    #[serde(default)]
    pub secondary_resource: f64,
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub level_effect: f64,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObtainedUpgrade {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub level: u32,
    pub upgrade: Upgrade,
    #[serde(default)]
    pub available: bool,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Bonuses the player has accumulated; only the fields the client uses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Improvement {
    #[serde(default)]
    pub more_upgrade_research_speed: f64,
    #[serde(default)]
    pub more_misions: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceRequirements {
    pub required_primary: f64,
    pub required_secondary: f64,
    pub required_time: f64,
}

impl ObtainedUpgrade {
    /// Cost of researching the next level. Each level past the first
    /// compounds the base cost by `level_effect`; research speed bonuses
    /// shorten the time by that percentage.
    pub fn next_level_requirements(&self, improvement: Option<&Improvement>) -> ResourceRequirements {
        let upgrade = &self.upgrade;
        let mut requirements = ResourceRequirements {
            required_primary: upgrade.primary_resource,
            required_secondary: upgrade.secondary_resource,
            required_time: upgrade.time,
        };
        for _ in 1..=self.level {
            requirements.required_primary += requirements.required_primary * upgrade.level_effect;
            requirements.required_secondary +=
                requirements.required_secondary * upgrade.level_effect;
            requirements.required_time += requirements.required_time * upgrade.level_effect;
        }
        if let Some(improvement) = improvement.filter(|i| i.more_upgrade_research_speed != 0.0) {
            requirements.required_time -=
                requirements.required_time * improvement.more_upgrade_research_speed / 100.0;
        }
        requirements
    }
}

/// The upgrade level currently being researched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningUpgrade {
    #[serde(default)]
    pub mission_id: Option<u64>,
    #[serde(default)]
    pub level: Option<u32>,
    #[serde(default)]
    pub upgrade: Option<Upgrade>,
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

impl RunningUpgrade {
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
