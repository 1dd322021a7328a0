use crate::prelude::{FusionError, FusionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    AntiPersonnelMine,
    AntiTankMine,
    UnexplodedOrdnance,
    Unknown,
}

/// Danger rating in `1..=5`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "u8", into = "u8")]
pub struct DangerLevel(u8);

impl DangerLevel {
    pub const MODERATE: DangerLevel = DangerLevel(3);
    pub const HIGH: DangerLevel = DangerLevel(4);
    pub const CRITICAL: DangerLevel = DangerLevel(5);

    pub fn new(level: u8) -> Option<Self> {
        (1..=5).contains(&level).then_some(DangerLevel(level))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for DangerLevel {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        DangerLevel::new(level).ok_or_else(|| format!("danger level {} outside 1..=5", level))
    }
}

impl From<DangerLevel> for u8 {
    fn from(level: DangerLevel) -> u8 {
        level.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Confirmed,
    Dismissed,
}

impl VerificationStatus {
    /// Open detections block a new detection for the same cell.
    pub fn is_open(self) -> bool {
        matches!(self, VerificationStatus::Unverified | VerificationStatus::Confirmed)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Confirmed => "confirmed",
            VerificationStatus::Dismissed => "dismissed",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationDecision {
    Confirm,
    Dismiss,
}

/// Persisted hypothesis that a hazardous object lies at a location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub id: Uuid,
    pub scan_id: Uuid,
    /// H3 cell the hypothesis was raised for.
    pub cell: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f64,
    pub object_type: ObjectType,
    pub confidence: f64,
    pub danger_level: DangerLevel,
    pub verification_status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Detection {
    /// Applies a human confirm/dismiss decision. Both outcomes are terminal.
    pub fn verify(
        &mut self,
        decision: VerificationDecision,
        verifier: &str,
        at: DateTime<Utc>,
    ) -> FusionResult<()> {
        if self.verification_status != VerificationStatus::Unverified {
            return Err(FusionError::InvalidTransition {
                id: self.id,
                status: self.verification_status,
            });
        }
        if verifier.trim().is_empty() {
            return Err(FusionError::InvalidParameter("verifier identity is empty".into()));
        }
        self.verification_status = match decision {
            VerificationDecision::Confirm => VerificationStatus::Confirmed,
            VerificationDecision::Dismiss => VerificationStatus::Dismissed,
        };
        self.verified_by = Some(verifier.to_string());
        self.verified_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection() -> Detection {
        Detection {
            id: Uuid::new_v4(),
            scan_id: Uuid::new_v4(),
            cell: 0,
            latitude: 48.46,
            longitude: 35.04,
            depth: 0.15,
            object_type: ObjectType::AntiPersonnelMine,
            confidence: 0.82,
            danger_level: DangerLevel::HIGH,
            verification_status: VerificationStatus::Unverified,
            verified_by: None,
            verified_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn confirm_records_verifier() {
        let mut det = detection();
        let at = Utc::now();
        det.verify(VerificationDecision::Confirm, "sapper-7", at).unwrap();
        assert_eq!(det.verification_status, VerificationStatus::Confirmed);
        assert_eq!(det.verified_by.as_deref(), Some("sapper-7"));
        assert_eq!(det.verified_at, Some(at));
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut det = detection();
        det.verify(VerificationDecision::Dismiss, "sapper-7", Utc::now()).unwrap();
        let err = det
            .verify(VerificationDecision::Confirm, "sapper-8", Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            FusionError::InvalidTransition {
                status: VerificationStatus::Dismissed,
                ..
            }
        ));
        assert_eq!(det.verified_by.as_deref(), Some("sapper-7"));
    }

    #[test]
    fn danger_level_bounds() {
        assert!(DangerLevel::new(0).is_none());
        assert!(DangerLevel::new(6).is_none());
        assert_eq!(DangerLevel::new(5), Some(DangerLevel::CRITICAL));
        assert!(serde_json::from_str::<DangerLevel>("9").is_err());
    }
}
