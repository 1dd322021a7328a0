use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Inactive,
    Maintenance,
}

/// Field unit registered with the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: Uuid,
    pub device_type: String,
    pub serial_number: String,
    pub status: DeviceStatus,
    pub created_at: DateTime<Utc>,
    pub last_connection_at: DateTime<Utc>,
}

impl Device {
    pub fn register(device_type: &str, serial_number: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_type: device_type.to_string(),
            serial_number: serial_number.to_string(),
            status: DeviceStatus::Inactive,
            created_at: at,
            last_connection_at: at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanStatus::InProgress => "in_progress",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        })
    }
}

/// One survey session of one device within a mission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scan {
    pub id: Uuid,
    pub mission_id: Option<Uuid>,
    pub device_id: Uuid,
    pub scan_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ScanStatus,
}

impl Scan {
    pub fn start(
        id: Uuid,
        mission_id: Option<Uuid>,
        device_id: Uuid,
        scan_type: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            mission_id,
            device_id,
            scan_type: scan_type.to_string(),
            start_time: at,
            end_time: None,
            status: ScanStatus::InProgress,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ScanStatus::InProgress
    }
}
