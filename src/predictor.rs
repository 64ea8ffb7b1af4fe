//! Next-period high prediction.
//!
//! [`HighPredictor`] runs the full pipeline for one request:
//! normalize → (window) → features → model → decode. It holds no mutable
//! state, so one instance serves any number of concurrent callers.

use crate::candle::{normalize, NormalizedSeries, RawCandle};
use crate::config::InferenceConfig;
use crate::error::PredictError;
use crate::features::{self, FeatureRow, FEATURE_NAMES};
use crate::model::PriceModel;
use crate::target::{decode, TargetEncoding};
use crate::window::window_at_or_before;
use crate::Result;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of one prediction.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    /// Decoded next-period high
    pub predicted_high: f64,

    /// Encoding used to decode the raw model output
    pub target_mode: TargetEncoding,

    /// High of the last candle the prediction was made from
    pub last_known_high: Option<f64>,

    /// Exact feature vector passed to the model
    pub feature_row_used: FeatureRow,

    /// Feature schema, in model input order
    pub features_used: &'static [&'static str],

    /// Candles in the (possibly windowed) series
    pub history_rows_used: usize,
}

/// Prediction pipeline around a shared, read-only model.
pub struct HighPredictor {
    model: Arc<dyn PriceModel>,
    config: InferenceConfig,
}

impl HighPredictor {
    /// Build a predictor from a model and explicit configuration.
    ///
    /// # Example
    /// ```
    /// use high_inference::{FeatureRow, HighPredictor, InferenceConfig, TargetEncoding};
    /// use std::sync::Arc;
    ///
    /// let model = |row: &FeatureRow| Ok::<_, anyhow::Error>(row.get("close").unwrap_or(0.0));
    /// let predictor = HighPredictor::new(
    ///     Arc::new(model),
    ///     InferenceConfig::with_default_mode(TargetEncoding::Level),
    /// );
    /// assert_eq!(predictor.config().default_mode, TargetEncoding::Level);
    /// ```
    pub fn new(model: Arc<dyn PriceModel>, config: InferenceConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn model(&self) -> &dyn PriceModel {
        self.model.as_ref()
    }

    /// Predict from raw rows, optionally as of `anchor`.
    pub fn predict(
        &self,
        rows: &[RawCandle],
        mode_override: Option<TargetEncoding>,
        anchor: Option<DateTime<Utc>>,
    ) -> Result<PredictionResult> {
        let series = normalize(rows)?;
        let series = window_at_or_before(&series, anchor)?;
        debug!(rows = rows.len(), window = series.len(), ?anchor, "history resolved");

        self.predict_series(&series, mode_override)
    }

    /// Direct-candles call shape: the caller sends the whole history.
    pub fn predict_candles(
        &self,
        rows: &[RawCandle],
        mode_override: Option<TargetEncoding>,
    ) -> Result<PredictionResult> {
        if rows.len() < self.config.min_history {
            return Err(PredictError::InsufficientHistory(format!(
                "got {} candles, need at least {} for features like volume_sma21",
                rows.len(),
                self.config.min_history
            )));
        }
        self.predict(rows, mode_override, None)
    }

    /// Fetch-and-predict call shape: `rows` came from the market-data client.
    pub fn predict_recent(
        &self,
        rows: &[RawCandle],
        mode_override: Option<TargetEncoding>,
    ) -> Result<PredictionResult> {
        let series = normalize(rows)?;
        if series.len() < self.config.min_history {
            return Err(PredictError::InsufficientHistory(format!(
                "fetched {} candles, need at least {}",
                series.len(),
                self.config.min_history
            )));
        }
        self.predict_series(&series, mode_override)
    }

    /// Anchored fetch-and-predict call shape.
    pub fn predict_at(
        &self,
        rows: &[RawCandle],
        anchor: DateTime<Utc>,
        mode_override: Option<TargetEncoding>,
    ) -> Result<PredictionResult> {
        self.predict(rows, mode_override, Some(anchor))
    }

    /// Run features, model and decoding over an already normalized series.
    pub fn predict_series(
        &self,
        series: &NormalizedSeries,
        mode_override: Option<TargetEncoding>,
    ) -> Result<PredictionResult> {
        let last_known_high = series.last().map(|c| c.high);

        let frame = features::build(series);
        let row = frame.last_usable_row()?;

        let raw = self
            .model
            .predict(&row)
            .map_err(PredictError::ModelInference)?;
        if !raw.is_finite() {
            return Err(PredictError::ModelInference(anyhow!(
                "model returned a non-finite value ({raw})"
            )));
        }

        let mode = mode_override.unwrap_or(self.config.default_mode);
        let predicted_high = decode(raw, last_known_high, mode)?;

        info!(
            %mode,
            raw,
            predicted_high,
            last_known_high,
            history = series.len(),
            row_time = %row.time_open,
            "prediction"
        );

        Ok(PredictionResult {
            predicted_high,
            target_mode: mode,
            last_known_high,
            feature_row_used: row,
            features_used: &FEATURE_NAMES,
            history_rows_used: series.len(),
        })
    }
}
