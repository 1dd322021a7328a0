pub mod classifier;
pub mod conditioning;
pub mod emitter;
pub mod fusion;
pub mod grid;

pub use classifier::{combine_beliefs, Classification, Classifier, ClassifierConfig, EvidenceBasis, ResponseCurve};
pub use conditioning::{
    AcousticConditioner, Conditioned, ConditioningConfig, MagneticConditioner, Preprocessor,
    RangingConditioner, SensorConditioner,
};
pub use emitter::{DetectionEmitter, EmitOutcome, EmitterConfig};
pub use fusion::{inverse_variance_fuse, Estimate, FusionConfig, FusionEngine, FusionEstimate, ScalarKalman};
pub use grid::{CellKey, GridConfig, SpatialGrid};
