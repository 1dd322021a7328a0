//! Records and wire formats exchanged with devices and the stores.

pub mod control;
pub mod detection;
pub mod frame;
pub mod reading;
pub mod records;

pub use control::{decode_control, ControlMessage, DeviceReply};
pub use detection::{DangerLevel, Detection, ObjectType, VerificationDecision, VerificationStatus};
pub use frame::{decode_frame, encode_frame, FrameMetadata, RawFrame};
pub use reading::{QualityIndicators, Reading, SensorPayload, SensorType};
pub use records::{Device, DeviceStatus, Scan, ScanStatus};
