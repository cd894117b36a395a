use std::time::SystemTime;
use serde::{Deserialize, Serialize};

pub const RECORD_TYPE_GPS: &str = "gps";

/// Body of one `POST /upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Unix seconds
    pub timestamp: i64,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The server answered with this status code
    Status(u16),
    /// The request never got an answer
    Transport(String),
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Status(200))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub upload_count: u64,
    pub last_upload_time: Option<SystemTime>,
    pub is_connected: bool,
}
