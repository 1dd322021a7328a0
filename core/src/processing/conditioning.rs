//! Per-sensor conditioning of raw frame payloads.
//!
//! Every sensor family has one [`SensorConditioner`] registered with the
//! [`Preprocessor`]. A conditioner turns the raw payload into a dimensionless
//! anomaly index (0 is background) plus the typed [`SensorPayload`] variant
//! that downstream stages consume. Conditioners can be swapped per sensor
//! type without touching the rest of the pipeline.

use crate::interface::frame::decode_samples;
use crate::interface::{QualityIndicators, RawFrame, Reading, SensorPayload, SensorType};
use crate::math::{FftHelper, MatrixHelper, StatsHelper};
use crate::prelude::{FusionError, FusionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditioningConfig {
    /// Surface deviation (m) that maps to an anomaly index of 1.
    pub ranging_reference: f64,
    pub ranging_variance: f64,
    /// Field magnitude (nT) that maps to an anomaly index of 1.
    pub magnetic_reference: f64,
    /// Hard-iron offset subtracted from every xyz sample.
    pub magnetic_bias: [f64; 3],
    pub magnetic_variance: f64,
    pub acoustic_reference: f64,
    /// Fraction of the Nyquist band kept by the low-pass filter.
    pub acoustic_cutoff: f32,
    pub acoustic_variance: f64,
}

impl Default for ConditioningConfig {
    fn default() -> Self {
        Self {
            ranging_reference: 0.05,
            ranging_variance: 0.1,
            magnetic_reference: 50.0,
            magnetic_bias: [0.0; 3],
            magnetic_variance: 0.2,
            acoustic_reference: 1.0,
            acoustic_cutoff: 0.25,
            acoustic_variance: 0.3,
        }
    }
}

/// Measurement variance for a reading: the sensor's base variance scaled by
/// the inverse of the signal-quality byte (255 is best).
pub fn measurement_variance(base_variance: f64, signal_quality: u8) -> f64 {
    base_variance * 255.0 / f64::from(signal_quality.max(1))
}

/// Output of conditioning one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditioned {
    pub value: f64,
    pub variance: f64,
    pub payload: SensorPayload,
}

pub trait SensorConditioner: Send + Sync {
    fn sensor_type(&self) -> SensorType;

    /// Variance of a reading taken at full signal quality.
    fn base_variance(&self) -> f64;

    fn condition(&self, payload: &[u8]) -> FusionResult<(f64, SensorPayload)>;
}

/// Median despiking of surface-deviation samples.
pub struct RangingConditioner {
    reference: f64,
    variance: f64,
}

impl SensorConditioner for RangingConditioner {
    fn sensor_type(&self) -> SensorType {
        SensorType::Ranging
    }

    fn base_variance(&self) -> f64 {
        self.variance
    }

    fn condition(&self, payload: &[u8]) -> FusionResult<(f64, SensorPayload)> {
        let samples = decode_samples(payload)?;
        let median = StatsHelper::median(&samples)
            .ok_or_else(|| FusionError::MalformedFrame("ranging samples contain NaN".into()))?;
        let median = f64::from(median);
        Ok((
            median.abs() / self.reference,
            SensorPayload::Ranging {
                median_deviation: median,
                sample_count: samples.len(),
            },
        ))
    }
}

/// Hard-iron bias correction of xyz field samples.
pub struct MagneticConditioner {
    reference: f64,
    bias: [f64; 3],
    variance: f64,
}

impl SensorConditioner for MagneticConditioner {
    fn sensor_type(&self) -> SensorType {
        SensorType::Magnetic
    }

    fn base_variance(&self) -> f64 {
        self.variance
    }

    fn condition(&self, payload: &[u8]) -> FusionResult<(f64, SensorPayload)> {
        let samples = decode_samples(payload)?;
        let mut field = MatrixHelper::triples(&samples)?;
        MatrixHelper::subtract_bias(&mut field, self.bias);
        let norms = MatrixHelper::row_norms(&field);
        let mean_field = norms.mean().unwrap_or(0.0);
        Ok((
            mean_field / self.reference,
            SensorPayload::Magnetic {
                mean_field,
                residual_bias: MatrixHelper::column_means(&field),
                sample_count: norms.len(),
            },
        ))
    }
}

/// FFT low-pass followed by RMS energy.
pub struct AcousticConditioner {
    reference: f64,
    cutoff: f32,
    variance: f64,
}

impl SensorConditioner for AcousticConditioner {
    fn sensor_type(&self) -> SensorType {
        SensorType::Acoustic
    }

    fn base_variance(&self) -> f64 {
        self.variance
    }

    fn condition(&self, payload: &[u8]) -> FusionResult<(f64, SensorPayload)> {
        let samples = decode_samples(payload)?;
        let filtered = FftHelper::new(samples.len()).low_pass(&samples, self.cutoff);
        let rms_energy = f64::from(StatsHelper::rms(&filtered));
        if !rms_energy.is_finite() {
            return Err(FusionError::MalformedFrame("acoustic samples are not finite".into()));
        }
        Ok((
            rms_energy / self.reference,
            SensorPayload::Acoustic {
                rms_energy,
                cutoff_fraction: f64::from(self.cutoff),
                sample_count: samples.len(),
            },
        ))
    }
}

/// Registry of conditioners keyed by sensor type.
pub struct Preprocessor {
    conditioners: HashMap<SensorType, Box<dyn SensorConditioner>>,
}

impl Preprocessor {
    /// A preprocessor with the default conditioner for every sensor type.
    pub fn new(config: &ConditioningConfig) -> FusionResult<Self> {
        let references = [
            ("ranging_reference", config.ranging_reference),
            ("magnetic_reference", config.magnetic_reference),
            ("acoustic_reference", config.acoustic_reference),
        ];
        for (name, value) in references {
            if !(value.is_finite() && value > 0.0) {
                return Err(FusionError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        let mut preprocessor = Self::empty();
        preprocessor.register(Box::new(RangingConditioner {
            reference: config.ranging_reference,
            variance: config.ranging_variance,
        }));
        preprocessor.register(Box::new(MagneticConditioner {
            reference: config.magnetic_reference,
            bias: config.magnetic_bias,
            variance: config.magnetic_variance,
        }));
        preprocessor.register(Box::new(AcousticConditioner {
            reference: config.acoustic_reference,
            cutoff: config.acoustic_cutoff,
            variance: config.acoustic_variance,
        }));
        Ok(preprocessor)
    }

    pub fn empty() -> Self {
        Self {
            conditioners: HashMap::new(),
        }
    }

    /// Installs a conditioner, returning the one it replaces.
    pub fn register(
        &mut self,
        conditioner: Box<dyn SensorConditioner>,
    ) -> Option<Box<dyn SensorConditioner>> {
        self.conditioners.insert(conditioner.sensor_type(), conditioner)
    }

    pub fn condition(
        &self,
        sensor_type: SensorType,
        payload: &[u8],
        signal_quality: u8,
    ) -> FusionResult<Conditioned> {
        let conditioner = self
            .conditioners
            .get(&sensor_type)
            .ok_or_else(|| FusionError::UnsupportedSensorType(sensor_type.to_string()))?;
        let (value, payload) = conditioner.condition(payload)?;
        if !value.is_finite() {
            return Err(FusionError::MalformedFrame(format!(
                "{} conditioning produced a non-finite value",
                sensor_type
            )));
        }
        Ok(Conditioned {
            value,
            variance: measurement_variance(conditioner.base_variance(), signal_quality),
            payload,
        })
    }

    /// Builds the immutable [`Reading`] for a decoded frame.
    pub fn reading(&self, frame: &RawFrame, timestamp: DateTime<Utc>) -> FusionResult<Reading> {
        let conditioned = self.condition(
            frame.sensor_type,
            &frame.payload,
            frame.metadata.signal_quality,
        )?;
        Ok(Reading {
            id: Uuid::new_v4(),
            scan_id: frame.scan_id,
            sensor_type: frame.sensor_type,
            timestamp,
            latitude: frame.metadata.latitude,
            longitude: frame.metadata.longitude,
            altitude: frame.metadata.altitude,
            value: conditioned.value,
            variance: conditioned.variance,
            quality: QualityIndicators {
                signal_strength: frame.metadata.signal_quality,
            },
            payload: conditioned.payload,
        })
    }
}
