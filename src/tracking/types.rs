use crate::device::types::SessionStatus;
use crate::location::types::{LocationStatus, PositionFix};
use crate::upload::types::UploadStats;

/// Requests a front-end can make of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartTracking,
    StopTracking,
    Scan,
    Disconnect,
    Send(String),
    SendControl(String),
    PushFix(PositionFix),
    Status,
    Shutdown,
}

/// Everything worth showing at once.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSnapshot {
    pub session_id: String,
    pub session: SessionStatus,
    pub location: LocationStatus,
    pub upload: UploadStats,
}
