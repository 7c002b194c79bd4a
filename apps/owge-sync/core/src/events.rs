//! Domain event names pushed by the backend. Matched case-sensitively.

pub const OBTAINED_UPGRADES_CHANGE: &str = "obtained_upgrades_change";
pub const RUNNING_UPGRADE_CHANGE: &str = "running_upgrade_change";
pub const UNIT_MISSION_CHANGE: &str = "unit_mission_change";
pub const MISSIONS_COUNT_CHANGE: &str = "missions_count_change";
pub const ENEMY_MISSION_CHANGE: &str = "enemy_mission_change";
pub const MISSION_REPORT_CHANGE: &str = "mission_report_change";
pub const MISSION_REPORT_COUNT_CHANGE: &str = "mission_report_count_change";
pub const VISITED_TUTORIAL_ENTRY_CHANGE: &str = "visited_tutorial_entry_change";

/// Never pushed live; only used as the cache-aside key while syncing entries.
pub const TUTORIAL_ENTRIES_CHANGE: &str = "tutorial_entries_change";
