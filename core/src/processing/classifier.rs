use crate::interface::{DangerLevel, ObjectType, SensorType};
use crate::processing::fusion::{Estimate, FusionEstimate};
use serde::{Deserialize, Serialize};

/// Logistic response over an estimate's signal-to-noise ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseCurve {
    /// SNR at which the probability is 0.5.
    pub midpoint: f64,
    pub steepness: f64,
}

impl Default for ResponseCurve {
    fn default() -> Self {
        Self {
            midpoint: 3.0,
            steepness: 1.5,
        }
    }
}

impl ResponseCurve {
    pub fn probability(&self, estimate: &Estimate) -> f64 {
        let snr = estimate.snr();
        if snr.is_infinite() {
            return 1.0;
        }
        let p = 1.0 / (1.0 + (-self.steepness * (snr - self.midpoint)).exp());
        if p.is_nan() {
            0.0
        } else {
            p.clamp(0.0, 1.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub fused_curve: ResponseCurve,
    // Per-sensor curves default to the fused curve, so a cell never loses
    // probability when a second sensor with the same evidence joins it.
    pub ranging_curve: ResponseCurve,
    pub magnetic_curve: ResponseCurve,
    pub acoustic_curve: ResponseCurve,
    /// Type and danger are assigned only above this probability.
    pub promotion_threshold: f64,
    /// Fused anomaly index from which an object is rated anti-tank.
    pub anti_tank_magnitude: f64,
    pub critical_probability: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            fused_curve: ResponseCurve::default(),
            ranging_curve: ResponseCurve::default(),
            magnetic_curve: ResponseCurve::default(),
            acoustic_curve: ResponseCurve::default(),
            promotion_threshold: 0.8,
            anti_tank_magnitude: 6.0,
            critical_probability: 0.95,
        }
    }
}

impl ClassifierConfig {
    pub fn curve_for(&self, sensor: SensorType) -> &ResponseCurve {
        match sensor {
            SensorType::Ranging => &self.ranging_curve,
            SensorType::Magnetic => &self.magnetic_curve,
            SensorType::Acoustic => &self.acoustic_curve,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceBasis {
    Fused,
    Combined,
    NoEvidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub probability: f64,
    pub object_type: Option<ObjectType>,
    pub danger_level: Option<DangerLevel>,
    pub basis: EvidenceBasis,
}

/// Dempster's rule over simple support functions on the frame
/// {mine, clear}: each sensor commits mass `p` to {mine} and `1 - p` to the
/// whole frame. No mass ever lands on {clear}, so there is no conflict and
/// the combined belief in {mine} is `1 - prod(1 - p_i)`.
///
/// Non-positive inputs carry no evidence and are skipped; no evidence at
/// all yields 0.
pub fn combine_beliefs<I>(probabilities: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut uncommitted = 1.0;
    let mut any = false;
    for p in probabilities {
        if p.is_nan() || p <= 0.0 {
            continue;
        }
        any = true;
        uncommitted *= 1.0 - p.min(1.0);
    }
    if any {
        1.0 - uncommitted
    } else {
        0.0
    }
}

pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn classify(&self, estimate: &FusionEstimate) -> Classification {
        let (probability, basis) = match &estimate.fused {
            Some(fused) => (self.config.fused_curve.probability(fused), EvidenceBasis::Fused),
            None if estimate.per_sensor.is_empty() => (0.0, EvidenceBasis::NoEvidence),
            None => (
                combine_beliefs(
                    estimate
                        .per_sensor
                        .iter()
                        .map(|(sensor, e)| self.config.curve_for(*sensor).probability(e)),
                ),
                EvidenceBasis::Combined,
            ),
        };

        let (object_type, danger_level) = if probability > self.config.promotion_threshold {
            let object_type = self.object_type(estimate);
            (Some(object_type), Some(self.danger_level(object_type, probability)))
        } else {
            (None, None)
        };

        Classification {
            probability,
            object_type,
            danger_level,
            basis,
        }
    }

    fn object_type(&self, estimate: &FusionEstimate) -> ObjectType {
        let magnitude = estimate
            .combined()
            .map(|e| e.mean.abs())
            .unwrap_or_else(|| {
                estimate
                    .per_sensor
                    .values()
                    .map(|e| e.mean.abs())
                    .fold(0.0, f64::max)
            });
        let sensors = estimate.contributing();
        if magnitude >= self.config.anti_tank_magnitude {
            ObjectType::AntiTankMine
        } else if sensors == [SensorType::Magnetic] {
            ObjectType::UnexplodedOrdnance
        } else {
            ObjectType::AntiPersonnelMine
        }
    }

    fn danger_level(&self, object_type: ObjectType, probability: f64) -> DangerLevel {
        if object_type == ObjectType::AntiTankMine || probability >= self.config.critical_probability {
            DangerLevel::CRITICAL
        } else {
            DangerLevel::HIGH
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn estimate(mean: f64, variance: f64) -> Estimate {
        Estimate {
            mean,
            variance,
            updates: 1,
        }
    }

    fn cell(sensors: &[(SensorType, Estimate)], fuse: bool) -> FusionEstimate {
        let per_sensor: BTreeMap<_, _> = sensors.iter().copied().collect();
        FusionEstimate::from_per_sensor(per_sensor, fuse)
    }

    #[test]
    fn combination_is_not_an_average() {
        let combined = combine_beliefs([0.6, 0.7, 0.8]);
        assert!(combined > 0.8);
        assert!((combined - (1.0 - 0.4 * 0.3 * 0.2)).abs() < 1e-12);
    }

    #[test]
    fn no_evidence_yields_zero() {
        assert_eq!(combine_beliefs(std::iter::empty()), 0.0);
        assert_eq!(combine_beliefs([0.0, 0.0]), 0.0);
        let classifier = Classifier::new(ClassifierConfig::default());
        let c = classifier.classify(&cell(&[], true));
        assert_eq!(c.probability, 0.0);
        assert_eq!(c.basis, EvidenceBasis::NoEvidence);
    }

    #[test]
    fn response_curve_is_monotonic_and_bounded() {
        let curve = ResponseCurve::default();
        let mut last = 0.0;
        for step in 0..40 {
            let p = curve.probability(&estimate(step as f64 * 0.1, 0.1));
            assert!((0.0..=1.0).contains(&p));
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn corroborating_sensors_never_lower_probability() {
        let classifier = Classifier::new(ClassifierConfig::default());
        let e = estimate(0.8, 0.2);
        for fuse in [true, false] {
            let one = classifier.classify(&cell(&[(SensorType::Ranging, e)], fuse));
            let two = classifier.classify(&cell(
                &[(SensorType::Ranging, e), (SensorType::Magnetic, e)],
                fuse,
            ));
            let three = classifier.classify(&cell(
                &[
                    (SensorType::Ranging, e),
                    (SensorType::Magnetic, e),
                    (SensorType::Acoustic, e),
                ],
                fuse,
            ));
            assert!(two.probability >= one.probability, "fuse={}", fuse);
            assert!(three.probability >= two.probability, "fuse={}", fuse);
            assert!(three.probability > one.probability, "fuse={}", fuse);
        }
    }

    #[test]
    fn fused_estimate_takes_precedence() {
        let classifier = Classifier::new(ClassifierConfig::default());
        let c = classifier.classify(&cell(
            &[(SensorType::Ranging, estimate(2.0, 0.1)), (SensorType::Magnetic, estimate(2.2, 0.2))],
            true,
        ));
        assert_eq!(c.basis, EvidenceBasis::Fused);
        assert!(c.probability > 0.8);
        assert_eq!(c.object_type, Some(ObjectType::AntiPersonnelMine));
        assert!(c.danger_level.is_some());
    }

    #[test]
    fn below_promotion_type_and_danger_stay_unset() {
        let classifier = Classifier::new(ClassifierConfig::default());
        let c = classifier.classify(&cell(&[(SensorType::Acoustic, estimate(0.9, 0.1))], true));
        assert!(c.probability <= 0.8);
        assert!(c.object_type.is_none());
        assert!(c.danger_level.is_none());
    }

    #[test]
    fn large_anomaly_is_rated_anti_tank_and_critical() {
        let classifier = Classifier::new(ClassifierConfig::default());
        let c = classifier.classify(&cell(
            &[(SensorType::Magnetic, estimate(7.0, 0.1)), (SensorType::Ranging, estimate(6.5, 0.1))],
            true,
        ));
        assert_eq!(c.object_type, Some(ObjectType::AntiTankMine));
        assert_eq!(c.danger_level, Some(DangerLevel::CRITICAL));
    }

    #[test]
    fn magnetic_only_evidence_is_ordnance() {
        let classifier = Classifier::new(ClassifierConfig::default());
        let c = classifier.classify(&cell(&[(SensorType::Magnetic, estimate(2.5, 0.1))], true));
        assert_eq!(c.basis, EvidenceBasis::Combined);
        assert_eq!(c.object_type, Some(ObjectType::UnexplodedOrdnance));
    }
}
