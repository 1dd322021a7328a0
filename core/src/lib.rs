//! Multi-sensor fusion and detection core for buried-object surveys.
//!
//! Binary frames from ranging, magnetic and acoustic sensors are decoded,
//! conditioned per sensor, binned into H3 cells and time buckets, filtered
//! per cell and fused across sensors. The fused evidence is classified and
//! high-confidence cells become persisted detections awaiting human
//! verification. Heatmaps and rollups over stored readings run alongside.

pub mod aggregation;
pub mod ingest;
pub mod interface;
pub mod math;
pub mod pipeline;
pub mod prelude;
pub mod processing;
pub mod service;
pub mod store;
pub mod telemetry;

pub use pipeline::{DetectionPipeline, DetectionRun};
pub use prelude::{FusionError, FusionResult, PipelineConfig};
pub use service::FusionService;
