//! Model capability.
//!
//! The pipeline only needs `predict(feature_row) -> f64`. [`OnnxModel`]
//! provides it from an ONNX export of the trained regressor; tests and
//! benchmarks plug in closures.

use crate::features::{FeatureRow, NUM_FEATURES};
use anyhow::{anyhow, Context};
use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A trained model that maps one feature row to one raw target value.
///
/// Implementations are shared across requests and must tolerate concurrent
/// calls.
pub trait PriceModel: Send + Sync {
    fn predict(&self, row: &FeatureRow) -> anyhow::Result<f64>;

    /// Human-readable summary for metadata endpoints.
    fn describe(&self) -> String {
        "unnamed model".to_string()
    }
}

impl<F> PriceModel for F
where
    F: Fn(&FeatureRow) -> anyhow::Result<f64> + Send + Sync,
{
    fn predict(&self, row: &FeatureRow) -> anyhow::Result<f64> {
        self(row)
    }

    fn describe(&self) -> String {
        "closure model".to_string()
    }
}

/// Session options for [`OnnxModel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnnxConfig {
    /// Output tensor holding the regression value
    pub output_name: String,

    /// Enable full graph optimization
    pub optimize_graph: bool,

    /// Intra-op threads per session
    pub intra_threads: usize,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            output_name: "variable".to_string(),
            optimize_graph: true,
            intra_threads: 1, // Single-threaded for determinism
        }
    }
}

/// ONNX Runtime backed regressor.
pub struct OnnxModel {
    /// Running a session needs exclusive access
    session: Mutex<Session>,
    path: PathBuf,
    config: OnnxConfig,
}

impl OnnxModel {
    /// Load an ONNX model.
    ///
    /// # Example
    /// ```no_run
    /// use high_inference::model::{OnnxConfig, OnnxModel};
    /// use std::path::Path;
    ///
    /// let model = OnnxModel::load(Path::new("models/high.onnx"), OnnxConfig::default()).unwrap();
    /// ```
    pub fn load(model_path: &Path, config: OnnxConfig) -> anyhow::Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(if config.optimize_graph {
                GraphOptimizationLevel::Level3
            } else {
                GraphOptimizationLevel::Level1
            })?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("loading ONNX model from {}", model_path.display()))?;

        Ok(Self {
            session: Mutex::new(session),
            path: model_path.to_path_buf(),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lay a feature row out as the `1 × NUM_FEATURES` input the model expects.
pub fn input_matrix(row: &FeatureRow) -> Array2<f32> {
    Array2::from_shape_fn((1, NUM_FEATURES), |(_, j)| row.values()[j] as f32)
}

impl PriceModel for OnnxModel {
    fn predict(&self, row: &FeatureRow) -> anyhow::Result<f64> {
        let input_tensor = Tensor::from_array(input_matrix(row))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .context("running ONNX session")?;

        let output = outputs
            .get(self.config.output_name.as_str())
            .ok_or_else(|| anyhow!("model has no output named {:?}", self.config.output_name))?;
        let (_, data) = output.try_extract_tensor::<f32>()?;

        data.first()
            .map(|&v| f64::from(v))
            .ok_or_else(|| anyhow!("output {:?} is empty", self.config.output_name))
    }

    fn describe(&self) -> String {
        format!(
            "ONNX regressor {} (output {:?}, {} intra-op threads)",
            self.path.display(),
            self.config.output_name,
            self.config.intra_threads
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::{normalize, RawCandle};
    use crate::features::{build, FEATURE_NAMES};

    fn sample_row() -> FeatureRow {
        let rows: Vec<RawCandle> = (1..=21)
            .map(|d| RawCandle::new(format!("2025-03-{d:02}"), 10.0, 12.0, 9.0, 11.0, Some(5.0)))
            .collect();
        build(&normalize(&rows).unwrap()).last_usable_row().unwrap()
    }

    #[test]
    fn test_closure_model() {
        let model = |row: &FeatureRow| Ok::<_, anyhow::Error>(row.get("close").unwrap_or(0.0) * 2.0);
        assert_eq!(model.predict(&sample_row()).unwrap(), 22.0);
        assert_eq!(model.describe(), "closure model");
    }

    #[test]
    fn test_input_matrix_follows_schema_order() {
        let row = sample_row();
        let input = input_matrix(&row);

        assert_eq!(input.dim(), (1, NUM_FEATURES));
        for (j, name) in FEATURE_NAMES.iter().enumerate() {
            assert_eq!(input[[0, j]], row.get(name).unwrap() as f32);
        }
        assert_eq!(input[[0, NUM_FEATURES - 1]], 3.0); // month
    }

    #[test]
    fn test_onnx_config_default() {
        let config = OnnxConfig::default();
        assert_eq!(config.output_name, "variable");
        assert_eq!(config.intra_threads, 1);
        assert!(config.optimize_graph);
    }
}
