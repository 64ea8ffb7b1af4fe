//! Feature computation for model inputs.
//!
//! Derives the fixed 15-column feature schema from a normalized candle
//! series. Column order is part of the model contract: the model was
//! trained on exactly this layout and reads features by position.
//!
//! Rolling helpers mark an undefined value (not enough history, absent
//! volume) as `NaN`; a row is usable only when none of its columns is `NaN`.

use crate::candle::NormalizedSeries;
use crate::error::PredictError;
use crate::Result;
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Number of model input features.
pub const NUM_FEATURES: usize = 15;

/// Published feature schema, in model input order.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "close",
    "open",
    "low",
    "close_ema3",
    "low_ema3",
    "open_sma3",
    "open_sma7",
    "high_lag1",
    "high_lag2",
    "low_lag1",
    "low_lag2",
    "close_lag3",
    "volume",
    "volume_sma21",
    "month",
];

/// Fewest ordered candles that can produce a usable last row.
///
/// Driven by the full 21-bar window of `volume_sma21`.
pub const MIN_HISTORY: usize = 21;

const EMA_SPAN: usize = 3;
const OPEN_SMA_SHORT: usize = 3;
const OPEN_SMA_LONG: usize = 7;
const VOLUME_SMA_WINDOW: usize = 21;

/// Exponential moving average, seeded with the first observation.
///
/// `y[0] = x[0]`, then `y[t] = α·x[t] + (1-α)·y[t-1]` with `α = 2/(span+1)`.
/// No bias adjustment and no look-ahead. A `span` of 0 is treated as 1.
pub fn compute_ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span.max(1) as f64 + 1.0);
    let mut result = Vec::with_capacity(values.len());

    let mut prev: Option<f64> = None;
    for &x in values {
        let y = match prev {
            None => x,
            Some(p) => alpha * x + (1.0 - alpha) * p,
        };
        result.push(y);
        prev = Some(y);
    }

    result
}

/// Rolling mean over the trailing `window` values.
///
/// `NaN` inputs are skipped; a position needs at least `min_periods` defined
/// values in its window, otherwise it is `NaN`. With `min_periods = 1` early
/// positions average over whatever history exists.
pub fn compute_sma(values: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    let window = window.max(1);
    let min_periods = min_periods.max(1);

    // Sum each window afresh; a running sum loses small values once a huge one leaves
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let (sum, count) = values[start..=i]
                .iter()
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(sum, count), &v| (sum + v, count + 1));
            if count >= min_periods {
                sum / count as f64
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Shift values back by `lag` positions; the first `lag` entries are `NaN`.
pub fn compute_lag(values: &[f64], lag: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| if i >= lag { values[i - lag] } else { f64::NAN })
        .collect()
}

/// Per-position feature candidates for a series, `NaN` marking missing values.
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    times: Vec<DateTime<Utc>>,
    values: Array2<f64>,
}

impl FeatureFrame {
    /// Number of positions (equal to the series length).
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// The full `len × NUM_FEATURES` matrix.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// One named column, oldest to newest.
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let idx = FEATURE_NAMES.iter().position(|n| *n == name)?;
        Some(self.values.column(idx))
    }

    /// Whether every feature at `position` is defined.
    pub fn is_complete(&self, position: usize) -> bool {
        position < self.len() && self.values.row(position).iter().all(|v| !v.is_nan())
    }

    /// All fully populated rows, oldest to newest.
    ///
    /// Fails when no row survives.
    pub fn usable_rows(&self) -> Result<Vec<FeatureRow>> {
        let rows: Vec<FeatureRow> = (0..self.len())
            .filter(|&i| self.is_complete(i))
            .map(|i| self.row_at(i))
            .collect();

        if rows.is_empty() {
            return Err(no_usable_rows(self.len()));
        }
        Ok(rows)
    }

    /// The most recent fully populated row.
    pub fn last_usable_row(&self) -> Result<FeatureRow> {
        (0..self.len())
            .rev()
            .find(|&i| self.is_complete(i))
            .map(|i| self.row_at(i))
            .ok_or_else(|| no_usable_rows(self.len()))
    }

    fn row_at(&self, position: usize) -> FeatureRow {
        let mut values = [0.0; NUM_FEATURES];
        for (dst, src) in values.iter_mut().zip(self.values.row(position).iter()) {
            *dst = *src;
        }
        FeatureRow {
            time_open: self.times[position],
            values,
        }
    }
}

fn no_usable_rows(len: usize) -> PredictError {
    PredictError::InsufficientHistory(format!(
        "no usable feature rows from {len} candles (need at least {MIN_HISTORY} with volume)"
    ))
}

/// Compute every feature column for every position of `series`.
pub fn build(series: &NormalizedSeries) -> FeatureFrame {
    let close = series.column(|c| c.close);
    let open = series.column(|c| c.open);
    let high = series.column(|c| c.high);
    let low = series.column(|c| c.low);
    let volume = series.column(|c| c.volume.unwrap_or(f64::NAN));
    let month = series.column(|c| f64::from(c.month));

    let columns: [Vec<f64>; NUM_FEATURES] = [
        close.clone(),
        open.clone(),
        low.clone(),
        compute_ema(&close, EMA_SPAN),
        compute_ema(&low, EMA_SPAN),
        compute_sma(&open, OPEN_SMA_SHORT, 1),
        compute_sma(&open, OPEN_SMA_LONG, 1),
        compute_lag(&high, 1),
        compute_lag(&high, 2),
        compute_lag(&low, 1),
        compute_lag(&low, 2),
        compute_lag(&close, 3),
        volume.clone(),
        compute_sma(&volume, VOLUME_SMA_WINDOW, VOLUME_SMA_WINDOW),
        month,
    ];

    let n = series.len();
    let mut values = Array2::<f64>::from_elem((n, NUM_FEATURES), f64::NAN);
    for (idx, column) in columns.iter().enumerate() {
        values
            .column_mut(idx)
            .assign(&ArrayView1::from(column.as_slice()));
    }

    FeatureFrame {
        times: series.iter().map(|c| c.time_open).collect(),
        values,
    }
}

/// A fully populated feature vector in schema order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRow {
    /// Open time of the bar the row was derived from.
    pub time_open: DateTime<Utc>,
    values: [f64; NUM_FEATURES],
}

impl FeatureRow {
    pub fn values(&self) -> &[f64; NUM_FEATURES] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|idx| self.values[idx])
    }

    /// `(name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}

// Serialized as an object whose keys follow schema order.
impl Serialize for FeatureRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_FEATURES))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}
