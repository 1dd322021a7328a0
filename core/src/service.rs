use crate::aggregation::AggregationService;
use crate::ingest::ConnectionRegistry;
use crate::pipeline::DetectionPipeline;
use crate::prelude::{FusionResult, PipelineConfig};
use crate::processing::{FusionEngine, Preprocessor, SensorConditioner, SpatialGrid};
use crate::store::{MemoryStore, Stores};
use crate::telemetry::{LogManager, MetricsRecorder};
use std::sync::Arc;

/// Every long-lived component of a running deployment, wired once from a
/// [`PipelineConfig`] and shared by all device workers and request handlers.
pub struct FusionService {
    config: PipelineConfig,
    stores: Stores,
    grid: SpatialGrid,
    preprocessor: Preprocessor,
    fusion: Arc<FusionEngine>,
    pipeline: DetectionPipeline,
    aggregation: AggregationService,
    registry: ConnectionRegistry,
    metrics: Arc<MetricsRecorder>,
}

impl FusionService {
    pub fn new(config: PipelineConfig, stores: Stores) -> FusionResult<Self> {
        config.ingest.validate()?;
        let grid = SpatialGrid::new(&config.grid)?;
        let preprocessor = Preprocessor::new(&config.conditioning)?;
        let fusion = Arc::new(FusionEngine::new(config.fusion.clone()));
        let metrics = Arc::new(MetricsRecorder::new());
        let pipeline = DetectionPipeline::new(
            &config,
            grid.clone(),
            Arc::clone(&fusion),
            stores.clone(),
            Arc::clone(&metrics),
        )?;
        LogManager::new("service").record(&format!(
            "grid resolution {} with {}s buckets, threshold {}",
            grid.resolution(),
            grid.bucket_width().num_seconds(),
            config.emitter.confidence_threshold
        ));
        Ok(Self {
            aggregation: AggregationService::new(stores.clone()),
            config,
            stores,
            grid,
            preprocessor,
            fusion,
            pipeline,
            registry: ConnectionRegistry::new(),
            metrics,
        })
    }

    /// A service backed by a single in-memory store, returned alongside it.
    pub fn in_memory(config: PipelineConfig) -> FusionResult<(Self, Arc<MemoryStore>)> {
        let store = Arc::new(MemoryStore::new());
        let service = Self::new(config, Stores::from_memory(Arc::clone(&store)))?;
        Ok((service, store))
    }

    /// Swaps the conditioner of one sensor type before the service is shared.
    pub fn register_conditioner(
        &mut self,
        conditioner: Box<dyn SensorConditioner>,
    ) -> Option<Box<dyn SensorConditioner>> {
        self.preprocessor.register(conditioner)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn fusion(&self) -> &FusionEngine {
        &self.fusion
    }

    pub fn pipeline(&self) -> &DetectionPipeline {
        &self.pipeline
    }

    pub fn aggregation(&self) -> &AggregationService {
        &self.aggregation
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }
}
