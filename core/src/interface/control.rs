use crate::interface::records::ScanStatus;
use crate::prelude::{FusionError, FusionResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Text-framed control messages sent by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Heartbeat,
    ScanStart {
        scan_id: Uuid,
        #[serde(default)]
        mission_id: Option<Uuid>,
        #[serde(default)]
        scan_type: Option<String>,
    },
    ScanEnd {
        scan_id: Uuid,
        #[serde(default)]
        status: Option<ScanStatus>,
    },
}

/// Replies written back to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceReply {
    HeartbeatAck {
        time: i64,
    },
    ScanAck {
        scan_id: Uuid,
        status: ScanStatus,
    },
    Rejected {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scan_id: Option<Uuid>,
    },
}

pub fn decode_control(text: &str) -> FusionResult<ControlMessage> {
    serde_json::from_str(text)
        .map_err(|err| FusionError::MalformedFrame(format!("control message: {}", err)))
}
