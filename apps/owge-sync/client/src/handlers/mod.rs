//! The four domain handlers driven by the sync service.

pub mod mission;
pub mod report;
pub mod tutorial;
pub mod upgrade;

pub use mission::MissionHandler;
pub use report::ReportHandler;
pub use tutorial::TutorialHandler;
pub use upgrade::UpgradeHandler;
