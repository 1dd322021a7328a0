use crate::interface::VerificationStatus;
use crate::ingest::IngestConfig;
use crate::processing::{ClassifierConfig, ConditioningConfig, EmitterConfig, FusionConfig, GridConfig};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline-wide configuration shared by every stage.
///
/// Grid resolution and bucket width live here rather than on individual
/// requests so that every run over the same scan lands readings in the same
/// cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub grid: GridConfig,
    pub conditioning: ConditioningConfig,
    pub fusion: FusionConfig,
    pub classifier: ClassifierConfig,
    pub emitter: EmitterConfig,
    pub ingest: IngestConfig,
}

/// Common error type for the ingestion and detection path.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("unsupported sensor type: {0}")]
    UnsupportedSensorType(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("scan {0} is not in progress")]
    ScanNotActive(Uuid),
    #[error("scan {0} is not completed")]
    ScanNotCompleted(Uuid),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("detection {id} is already {status}")]
    InvalidTransition { id: Uuid, status: VerificationStatus },
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl FusionError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        FusionError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Errors that only affect the frame being processed; the device stream
    /// stays open.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            FusionError::MalformedFrame(_) | FusionError::UnsupportedSensorType(_)
        )
    }
}

pub type FusionResult<T> = Result<T, FusionError>;
