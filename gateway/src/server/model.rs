use chrono::{DateTime, Utc};
use minefusion::interface::{Detection, Reading, SensorType, VerificationDecision};
use minefusion::telemetry::MetricsSnapshot;
use minefusion::FusionError;
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    pub decision: VerificationDecision,
    pub verifier: String,
}

/// Query string of `GET /scans/{id}/heatmap`. `grid_size_m` wins over
/// `resolution` when both are given.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeatmapQuery {
    pub sensor: Option<SensorType>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub resolution: Option<u8>,
    pub grid_size_m: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RollupQuery {
    pub sensor: Option<SensorType>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub interval: Option<String>,
}

/// Query string of `GET /scans/{id}/near`.
#[derive(Debug, Clone, Deserialize)]
pub struct NearQuery {
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "NearQuery::default_radius")]
    pub radius_m: f64,
    #[serde(default)]
    pub sensor: Option<SensorType>,
}

impl NearQuery {
    fn default_radius() -> f64 {
        10.0
    }
}

/// Stored evidence of one scan around a point.
#[derive(Debug, Clone, Serialize)]
pub struct NearModel {
    pub readings: Vec<Reading>,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusModel {
    pub connected_devices: usize,
    pub metrics: MetricsSnapshot,
}

pub fn status_code(err: &FusionError) -> StatusCode {
    match err {
        FusionError::NotFound { .. } => StatusCode::NOT_FOUND,
        FusionError::InvalidParameter(_)
        | FusionError::MalformedFrame(_)
        | FusionError::UnsupportedSensorType(_) => StatusCode::BAD_REQUEST,
        FusionError::ScanNotActive(_)
        | FusionError::ScanNotCompleted(_)
        | FusionError::InvalidTransition { .. } => StatusCode::CONFLICT,
        FusionError::PersistenceFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn maps_errors_to_status_codes() {
        assert_eq!(
            status_code(&FusionError::not_found("scan", Uuid::nil())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_code(&FusionError::InvalidParameter("unsupported interval".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_code(&FusionError::ScanNotCompleted(Uuid::nil())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn near_query_defaults_radius() {
        let query: NearQuery = serde_json::from_str(r#"{"lat":48.46,"lon":35.04}"#).unwrap();
        assert_eq!(query.radius_m, 10.0);
        assert!(query.sensor.is_none());
    }

    #[test]
    fn verify_request_uses_snake_case_decisions() {
        let request: VerifyRequest =
            serde_json::from_str(r#"{"decision":"dismiss","verifier":"eod-team-3"}"#).unwrap();
        assert_eq!(request.decision, VerificationDecision::Dismiss);
    }
}
