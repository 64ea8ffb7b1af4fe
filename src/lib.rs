//! Next-period high price inference from OHLCV history.
//!
//! This crate turns a candle history into the feature vector a trained
//! regressor expects, runs the model, and converts its output back into a
//! price level. The HTTP surface in [`server`] and the Kraken client in
//! [`market_data`] are thin collaborators around that pipeline.

pub mod candle;
pub mod config;
pub mod error;
pub mod features;
pub mod market_data;
pub mod model;
pub mod predictor;
pub mod server;
pub mod target;
pub mod window;

pub use candle::{normalize, Candle, NormalizedSeries, RawCandle};
pub use config::{InferenceConfig, ServiceConfig};
pub use error::PredictError;
pub use features::{FeatureFrame, FeatureRow, FEATURE_NAMES, MIN_HISTORY, NUM_FEATURES};
pub use model::{OnnxConfig, OnnxModel, PriceModel};
pub use predictor::{HighPredictor, PredictionResult};
pub use target::{decode, encode, TargetEncoding};
pub use window::{parse_anchor, prefix_at_or_before, window_at_or_before};

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, PredictError>;
