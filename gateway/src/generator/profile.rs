use crate::generator::template::{acoustic_samples, magnetic_samples, ranging_samples};
use anyhow::Context;
use minefusion::interface::frame::encode_samples;
use minefusion::interface::{encode_frame, FrameMetadata, RawFrame, SensorType};
use minefusion::processing::ConditioningConfig;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const METRES_PER_DEGREE: f64 = 111_320.0;

/// Object planted in a synthetic survey field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuriedObject {
    /// Offset from the survey origin in metres (east, north).
    pub east_m: f64,
    pub north_m: f64,
    /// Peak anomaly index directly above the object.
    pub strength: f64,
    pub radius_m: f64,
}

/// Lawnmower survey over a rectangular field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyProfile {
    pub seed: u64,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub altitude_m: f64,
    pub rows: usize,
    pub columns: usize,
    pub spacing_m: f64,
    pub sensors: Vec<SensorType>,
    pub samples_per_frame: usize,
    pub noise: f32,
    pub scan_type: String,
    pub objects: Vec<BuriedObject>,
    /// Fraction of frames sent with a corrupted header.
    pub corrupt_fraction: f64,
}

impl Default for SurveyProfile {
    fn default() -> Self {
        Self {
            seed: 7,
            origin_lat: 48.4647,
            origin_lon: 35.0462,
            altitude_m: 112.0,
            rows: 12,
            columns: 12,
            spacing_m: 2.5,
            sensors: SensorType::ALL.to_vec(),
            samples_per_frame: 32,
            noise: 0.002,
            scan_type: "survey".into(),
            objects: vec![
                BuriedObject {
                    east_m: 10.0,
                    north_m: 12.0,
                    strength: 2.5,
                    radius_m: 2.0,
                },
                BuriedObject {
                    east_m: 22.0,
                    north_m: 6.0,
                    strength: 7.0,
                    radius_m: 3.0,
                },
            ],
            corrupt_fraction: 0.0,
        }
    }
}

impl SurveyProfile {
    pub fn point(&self, row: usize, column: usize) -> (f64, f64) {
        // Serpentine track: every other row runs back west.
        let column = if row % 2 == 0 { column } else { self.columns - 1 - column };
        let east = column as f64 * self.spacing_m;
        let north = row as f64 * self.spacing_m;
        let lat = self.origin_lat + north / METRES_PER_DEGREE;
        let lon = self.origin_lon + east / (METRES_PER_DEGREE * self.origin_lat.to_radians().cos());
        (lat, lon)
    }

    /// Anomaly index at a point, summed over every planted object.
    pub fn anomaly_at(&self, east_m: f64, north_m: f64) -> f64 {
        self.objects
            .iter()
            .map(|object| {
                let d2 = (east_m - object.east_m).powi(2) + (north_m - object.north_m).powi(2);
                object.strength * (-d2 / object.radius_m.powi(2)).exp()
            })
            .sum()
    }

    fn payload<R: Rng>(
        &self,
        rng: &mut R,
        sensor: SensorType,
        anomaly: f64,
        conditioning: &ConditioningConfig,
    ) -> Vec<f32> {
        match sensor {
            SensorType::Ranging => ranging_samples(
                rng,
                anomaly,
                conditioning.ranging_reference,
                self.samples_per_frame,
                self.noise,
            ),
            SensorType::Magnetic => magnetic_samples(
                rng,
                anomaly,
                conditioning.magnetic_reference,
                conditioning.magnetic_bias,
                self.samples_per_frame,
                self.noise * 500.0,
            ),
            SensorType::Acoustic => acoustic_samples(
                rng,
                anomaly,
                conditioning.acoustic_reference,
                self.samples_per_frame,
                self.noise * 10.0,
            ),
        }
    }

    /// Encoded binary frames for one scan, in track order.
    pub fn frames(&self, scan_id: Uuid, conditioning: &ConditioningConfig) -> anyhow::Result<Vec<Vec<u8>>> {
        if self.columns == 0 || self.rows == 0 {
            anyhow::bail!("survey grid of {}x{} points is empty", self.rows, self.columns);
        }
        let capacity = self
            .rows
            .checked_mul(self.columns)
            .and_then(|points| points.checked_mul(self.sensors.len()))
            .context("overflow computing frame count for survey")?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut frames = Vec::with_capacity(capacity);
        for row in 0..self.rows {
            for column in 0..self.columns {
                let (latitude, longitude) = self.point(row, column);
                let east = (longitude - self.origin_lon)
                    * METRES_PER_DEGREE
                    * self.origin_lat.to_radians().cos();
                let north = (latitude - self.origin_lat) * METRES_PER_DEGREE;
                let anomaly = self.anomaly_at(east, north);
                for &sensor in &self.sensors {
                    let samples = self.payload(&mut rng, sensor, anomaly, conditioning);
                    let mut bytes = encode_frame(&RawFrame {
                        scan_id,
                        sensor_type: sensor,
                        metadata: FrameMetadata {
                            latitude,
                            longitude,
                            altitude: self.altitude_m,
                            signal_quality: rng.gen_range(200..=255),
                        },
                        payload: encode_samples(&samples),
                    });
                    if self.corrupt_fraction > 0.0 && rng.gen_bool(self.corrupt_fraction.min(1.0)) {
                        bytes[0] = 0x00;
                    }
                    frames.push(bytes);
                }
            }
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minefusion::interface::decode_frame;

    #[test]
    fn generates_one_frame_per_point_and_sensor() {
        let profile = SurveyProfile {
            rows: 3,
            columns: 4,
            ..Default::default()
        };
        let frames = profile
            .frames(Uuid::new_v4(), &ConditioningConfig::default())
            .unwrap();
        assert_eq!(frames.len(), 3 * 4 * 3);
        assert!(frames.iter().all(|f| decode_frame(f).is_ok()));
    }

    #[test]
    fn same_seed_same_frames() {
        let profile = SurveyProfile::default();
        let scan = Uuid::new_v4();
        let conditioning = ConditioningConfig::default();
        assert_eq!(
            profile.frames(scan, &conditioning).unwrap(),
            profile.frames(scan, &conditioning).unwrap()
        );
    }

    #[test]
    fn anomaly_peaks_over_objects() {
        let profile = SurveyProfile::default();
        assert!((profile.anomaly_at(10.0, 12.0) - 2.5).abs() < 0.01);
        assert!(profile.anomaly_at(0.0, 0.0) < 0.01);
    }

    #[test]
    fn corrupted_frames_fail_to_decode() {
        let profile = SurveyProfile {
            rows: 2,
            columns: 2,
            corrupt_fraction: 1.0,
            ..Default::default()
        };
        let frames = profile
            .frames(Uuid::new_v4(), &ConditioningConfig::default())
            .unwrap();
        assert!(frames.iter().all(|f| decode_frame(f).is_err()));
    }

    #[test]
    fn empty_grid_is_an_error() {
        let profile = SurveyProfile {
            rows: 0,
            ..Default::default()
        };
        assert!(profile
            .frames(Uuid::new_v4(), &ConditioningConfig::default())
            .is_err());
    }
}
