//! Target encodings and their inversion.
//!
//! A model may be trained on the next high directly or on its change from
//! the last known high. [`decode`] maps the raw model output back to a
//! price level; [`encode`] is its exact inverse.

use crate::error::PredictError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the model's training target relates to the next-period high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetEncoding {
    /// The next high itself.
    #[default]
    Level,
    /// Next high minus the last known high.
    Delta,
    /// `ln(next_high / last_high)`.
    LogDiff,
}

impl TargetEncoding {
    pub fn all() -> [TargetEncoding; 3] {
        [Self::Level, Self::Delta, Self::LogDiff]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Level => "level",
            Self::Delta => "delta",
            Self::LogDiff => "logdiff",
        }
    }
}

impl fmt::Display for TargetEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetEncoding {
    type Err = PredictError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "level" => Ok(Self::Level),
            "delta" => Ok(Self::Delta),
            "logdiff" => Ok(Self::LogDiff),
            _ => Err(PredictError::UnsupportedMode(s.to_string())),
        }
    }
}

fn require_last_high(last_known_high: Option<f64>, mode: TargetEncoding) -> Result<f64> {
    match last_known_high {
        Some(h) if h.is_finite() => Ok(h),
        Some(h) => Err(PredictError::Inversion(format!(
            "last known high {h} is not finite ({mode} mode)"
        ))),
        None => Err(PredictError::Inversion(format!(
            "{mode} mode needs a last known high"
        ))),
    }
}

/// Turn a raw model output into a price level.
pub fn decode(raw: f64, last_known_high: Option<f64>, mode: TargetEncoding) -> Result<f64> {
    match mode {
        TargetEncoding::Level => Ok(raw),
        TargetEncoding::Delta => Ok(require_last_high(last_known_high, mode)? + raw),
        TargetEncoding::LogDiff => Ok(raw.exp() * require_last_high(last_known_high, mode)?),
    }
}

/// Turn a next-period high into the training target for `mode`.
///
/// `logdiff` additionally needs both highs to be positive.
pub fn encode(next_high: f64, last_known_high: Option<f64>, mode: TargetEncoding) -> Result<f64> {
    match mode {
        TargetEncoding::Level => Ok(next_high),
        TargetEncoding::Delta => Ok(next_high - require_last_high(last_known_high, mode)?),
        TargetEncoding::LogDiff => {
            let last = require_last_high(last_known_high, mode)?;
            if last <= 0.0 || next_high <= 0.0 {
                return Err(PredictError::Inversion(format!(
                    "logdiff needs positive highs (next {next_high}, last {last})"
                )));
            }
            Ok((next_high / last).ln())
        }
    }
}
