//! Error taxonomy for the inference pipeline.
//!
//! Every variant is terminal for the request that raised it. Nothing is
//! retried and no shared state is touched on the way out.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure raised by one stage of the prediction pipeline.
#[derive(Error, Debug)]
pub enum PredictError {
    /// Missing or unparseable input fields, rejected before any computation.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Too few candles, or no usable feature row after dropping incomplete ones.
    #[error("insufficient history: {0}")]
    InsufficientHistory(String),

    /// The anchor precedes every available candle.
    #[error("no candles at or before {anchor}")]
    NoDataBeforeAnchor { anchor: DateTime<Utc> },

    /// The raw model output cannot be turned back into a price.
    #[error("cannot invert prediction: {0}")]
    Inversion(String),

    #[error("unsupported target mode: {0:?} (expected level, delta or logdiff)")]
    UnsupportedMode(String),

    /// The model capability itself failed.
    #[error("model inference failed: {0:#}")]
    ModelInference(#[source] anyhow::Error),

    /// The market-data collaborator failed to deliver candles.
    #[error("market data fetch failed: {0:#}")]
    MarketData(#[source] anyhow::Error),
}

impl PredictError {
    /// Short name of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed_input",
            Self::InsufficientHistory(_) => "insufficient_history",
            Self::NoDataBeforeAnchor { .. } => "no_data_before_anchor",
            Self::Inversion(_) => "inversion",
            Self::UnsupportedMode(_) => "unsupported_mode",
            Self::ModelInference(_) => "model_inference",
            Self::MarketData(_) => "market_data",
        }
    }

    /// True when the caller's input caused the failure rather than the model or a backend.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::ModelInference(_) | Self::MarketData(_))
    }
}
