use crate::generator::profile::SurveyProfile;
use anyhow::Context;
use minefusion::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_bind() -> String {
    "127.0.0.1:9000".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub survey: SurveyProfile,
    /// Offline summaries are appended here when set.
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            pipeline: PipelineConfig::default(),
            survey: SurveyProfile::default(),
            report_path: None,
        }
    }
}

impl GatewayConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading gateway config {}", path_ref.display()))?;
        let config: GatewayConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing gateway config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(bind: &str, resolution: u8, bucket_secs: u64, threshold: f64) -> Self {
        let mut config = Self {
            bind: bind.to_string(),
            ..Default::default()
        };
        config.pipeline.grid.resolution = resolution;
        config.pipeline.grid.bucket_width_secs = bucket_secs;
        config.pipeline.emitter.confidence_threshold = threshold;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_sets_grid_and_threshold() {
        let cfg = GatewayConfig::from_args("0.0.0.0:8080", 11, 60, 0.75);
        assert_eq!(cfg.bind, "0.0.0.0:8080");
        assert_eq!(cfg.pipeline.grid.resolution, 11);
        assert_eq!(cfg.pipeline.grid.bucket_width_secs, 60);
        assert_eq!(cfg.pipeline.emitter.confidence_threshold, 0.75);
    }

    #[test]
    fn config_load_reads_yaml_with_defaults() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"pipeline:\n  grid:\n    resolution: 11\n  fusion:\n    fuse_across_sensors: false\nsurvey:\n  rows: 4\n  sensors: [ranging, magnetic]\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = GatewayConfig::load(&path).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:9000");
        assert_eq!(cfg.pipeline.grid.resolution, 11);
        assert_eq!(cfg.pipeline.grid.bucket_width_secs, 300);
        assert!(!cfg.pipeline.fusion.fuse_across_sensors);
        assert_eq!(cfg.survey.rows, 4);
        assert_eq!(cfg.survey.columns, 12);
        assert_eq!(cfg.survey.sensors.len(), 2);
    }

    #[test]
    fn config_load_reports_missing_file() {
        let err = GatewayConfig::load("/nonexistent/gateway.yaml").unwrap_err();
        assert!(err.to_string().contains("reading gateway config"));
    }
}
