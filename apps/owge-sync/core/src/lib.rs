//! Shared primitives for the OWGE real-time sync client.
//!
//! This crate only describes shapes: the frames exchanged on the real-time
//! channel, the authentication handshake, the push envelope and the domain
//! payloads the handlers reduce. Behaviour lives in `owge-sync-client`.

pub mod dates;
pub mod events;
pub mod mission;
pub mod protocol;
pub mod report;
pub mod tutorial;
pub mod upgrade;

pub use dates::DateOutOfRange;
pub use mission::{MissionType, MyUnitMissions, RunningMission, SelectedUnit};
pub use protocol::{
    AuthRequest, AuthResponse, ChannelFrame, FrameError, InboundMessage, PROTOCOL_VERSION,
};
pub use report::{MissionReport, MissionReportResponse, UnreadCounters};
pub use tutorial::{HtmlSymbol, TutorialSectionEntry};
pub use upgrade::{Improvement, ObtainedUpgrade, ResourceRequirements, RunningUpgrade, Upgrade};
