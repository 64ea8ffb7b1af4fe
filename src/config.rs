//! Configuration.
//!
//! [`InferenceConfig`] is what the pipeline is built with; [`ServiceConfig`]
//! is read once from the environment by the binary.

use crate::features::{FEATURE_NAMES, MIN_HISTORY};
use crate::market_data::{kraken_pair, MarketDataConfig, ALLOWED_INTERVALS};
use crate::model::OnnxConfig;
use crate::target::TargetEncoding;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Settings the prediction pipeline is constructed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Encoding the model was trained with; used when a request has no override
    pub default_mode: TargetEncoding,

    /// Fewest candles accepted by the direct and fetch call shapes
    pub min_history: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            default_mode: TargetEncoding::Level,
            min_history: MIN_HISTORY,
        }
    }
}

impl InferenceConfig {
    pub fn with_default_mode(mode: TargetEncoding) -> Self {
        Self {
            default_mode: mode,
            ..Self::default()
        }
    }

    /// Published feature schema, read-only.
    pub fn feature_schema(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub inference: InferenceConfig,
    pub onnx: OnnxConfig,
    pub market: MarketDataConfig,
}

impl ServiceConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |name: &str| {
            lookup(name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let str_or = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());

        let default_mode: TargetEncoding = str_or("MODEL_TARGET_MODE", "level")
            .parse()
            .context("MODEL_TARGET_MODE")?;

        let port: u16 = match get("PORT") {
            Some(p) => p.parse().with_context(|| format!("PORT={p:?} is not a port"))?,
            None => 8000,
        };

        let interval_minutes: u32 = match get("KRAKEN_INTERVAL") {
            Some(v) => v
                .parse()
                .with_context(|| format!("KRAKEN_INTERVAL={v:?} is not a number"))?,
            None => 1440,
        };
        if !ALLOWED_INTERVALS.contains(&interval_minutes) {
            bail!("KRAKEN_INTERVAL={interval_minutes} not one of {ALLOWED_INTERVALS:?}");
        }

        let pair = kraken_pair(&str_or("KRAKEN_PAIR", "SOLUSD")).context("KRAKEN_PAIR")?;

        let enabled = get("MARKET_DATA_ENABLE")
            .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"))
            .unwrap_or(true);

        Ok(Self {
            bind: str_or("BIND", "0.0.0.0"),
            port,
            model_path: PathBuf::from(str_or("MODEL_PATH", "models/lgbm_final_ma_copy.onnx")),
            inference: InferenceConfig::with_default_mode(default_mode),
            onnx: OnnxConfig {
                output_name: str_or("MODEL_OUTPUT_NAME", "variable"),
                ..OnnxConfig::default()
            },
            market: MarketDataConfig {
                enabled,
                base_url: str_or("KRAKEN_BASE_URL", "https://api.kraken.com"),
                pair,
                interval_minutes,
                ..MarketDataConfig::default()
            },
        })
    }
}
