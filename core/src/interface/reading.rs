use crate::prelude::FusionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Sensor families carried on the device stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Ranging,
    Magnetic,
    Acoustic,
}

impl SensorType {
    pub const ALL: [SensorType; 3] = [SensorType::Ranging, SensorType::Magnetic, SensorType::Acoustic];

    /// Maps the packet-type byte of a binary frame.
    pub fn from_packet_type(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(SensorType::Ranging),
            0x02 => Some(SensorType::Magnetic),
            0x03 => Some(SensorType::Acoustic),
            _ => None,
        }
    }

    pub fn packet_type(self) -> u8 {
        match self {
            SensorType::Ranging => 0x01,
            SensorType::Magnetic => 0x02,
            SensorType::Acoustic => 0x03,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SensorType::Ranging => "ranging",
            SensorType::Magnetic => "magnetic",
            SensorType::Acoustic => "acoustic",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorType {
    type Err = FusionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            // Older field units still report their rangefinder as "lidar".
            "ranging" | "lidar" => Ok(SensorType::Ranging),
            "magnetic" => Ok(SensorType::Magnetic),
            "acoustic" => Ok(SensorType::Acoustic),
            other => Err(FusionError::UnsupportedSensorType(other.to_string())),
        }
    }
}

/// Sensor-reported confidence metadata.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityIndicators {
    pub signal_strength: u8,
}

/// Conditioned payload, one variant per sensor family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "sensor", rename_all = "snake_case")]
pub enum SensorPayload {
    Ranging {
        median_deviation: f64,
        sample_count: usize,
    },
    Magnetic {
        mean_field: f64,
        residual_bias: [f64; 3],
        sample_count: usize,
    },
    Acoustic {
        rms_energy: f64,
        cutoff_fraction: f64,
        sample_count: usize,
    },
}

impl SensorPayload {
    pub fn sensor_type(&self) -> SensorType {
        match self {
            SensorPayload::Ranging { .. } => SensorType::Ranging,
            SensorPayload::Magnetic { .. } => SensorType::Magnetic,
            SensorPayload::Acoustic { .. } => SensorType::Acoustic,
        }
    }

    pub fn sample_count(&self) -> usize {
        match self {
            SensorPayload::Ranging { sample_count, .. }
            | SensorPayload::Magnetic { sample_count, .. }
            | SensorPayload::Acoustic { sample_count, .. } => *sample_count,
        }
    }
}

/// One normalized measurement from one sensor at one place and time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub id: Uuid,
    pub scan_id: Uuid,
    pub sensor_type: SensorType,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Dimensionless anomaly index; 0 is background.
    pub value: f64,
    /// Measurement variance `R` used by the filter.
    pub variance: f64,
    pub quality: QualityIndicators,
    pub payload: SensorPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_type_mapping_is_symmetric() {
        for sensor in SensorType::ALL {
            assert_eq!(SensorType::from_packet_type(sensor.packet_type()), Some(sensor));
        }
        assert_eq!(SensorType::from_packet_type(0x04), None);
    }

    #[test]
    fn parses_legacy_lidar_name() {
        assert_eq!("lidar".parse::<SensorType>().unwrap(), SensorType::Ranging);
        assert!(matches!(
            "thermal".parse::<SensorType>(),
            Err(FusionError::UnsupportedSensorType(_))
        ));
    }
}
