use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::dates::epoch_millis;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionReport {
    pub id: u64,
    #[serde(default, with = "epoch_millis::option")]
    pub mission_date: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "epoch_millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub report_date: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl MissionReport {
    /// Date to show for the report: when it was written, or when the mission ran.
    pub fn normalized_date(&self) -> Option<OffsetDateTime> {
        self.report_date.or(self.mission_date)
    }
}

/// One page of reports plus the unread counters, as returned by
/// `report/findMy` and pushed with `mission_report_change`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionReportResponse {
    #[serde(default)]
    pub reports: Vec<MissionReport>,
    #[serde(default)]
    pub user_unread: u64,
    #[serde(default)]
    pub enemy_unread: u64,
}

impl MissionReportResponse {
    pub fn counters(&self) -> UnreadCounters {
        UnreadCounters {
            user_unread: self.user_unread,
            enemy_unread: self.enemy_unread,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCounters {
    #[serde(default)]
    pub user_unread: u64,
    #[serde(default)]
    pub enemy_unread: u64,
}
