//! Candle records and time normalization.
//!
//! Collaborators hand over [`RawCandle`]s exactly as they arrived (from a
//! request body or a market-data payload). [`normalize`] turns them into a
//! [`NormalizedSeries`]: every timestamp in UTC, ordered ascending, each bar
//! annotated with its calendar month.

use crate::error::PredictError;
use crate::Result;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Offset-carrying formats tried after RFC 3339.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Naive formats, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// One OHLCV record before validation.
///
/// Every field is optional so that a missing column is reported by
/// [`normalize`] as malformed input with the row index, instead of failing
/// deserialization of the whole payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCandle {
    /// Bar open time as text, naive or timezone-aware.
    #[serde(rename = "timeOpen", alias = "time_open")]
    pub time_open: Option<String>,
    /// Open time under its short name; read only when `timeOpen` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl RawCandle {
    /// Build a complete record.
    pub fn new(
        time_open: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: Option<f64>,
    ) -> Self {
        Self {
            time_open: Some(time_open.into()),
            time: None,
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close: Some(close),
            volume,
        }
    }

    fn to_candle(&self, row: usize) -> Result<Candle> {
        let text = self
            .time_open
            .as_deref()
            .or(self.time.as_deref())
            .ok_or_else(|| missing_field(row, "timeOpen"))?;
        let time_open = parse_timestamp(text).ok_or_else(|| {
            PredictError::MalformedInput(format!("row {row}: unparseable timestamp {text:?}"))
        })?;

        let open = finite_field(row, "open", self.open)?;
        let high = finite_field(row, "high", self.high)?;
        let low = finite_field(row, "low", self.low)?;
        let close = finite_field(row, "close", self.close)?;

        let volume = match self.volume {
            Some(v) if !v.is_finite() => {
                return Err(PredictError::MalformedInput(format!(
                    "row {row}: field `volume` is not finite ({v})"
                )))
            }
            other => other,
        };

        Ok(Candle::new(time_open, open, high, low, close, volume))
    }
}

fn missing_field(row: usize, name: &str) -> PredictError {
    PredictError::MalformedInput(format!("row {row}: missing required field `{name}`"))
}

fn finite_field(row: usize, name: &str, value: Option<f64>) -> Result<f64> {
    let value = value.ok_or_else(|| missing_field(row, name))?;
    if !value.is_finite() {
        return Err(PredictError::MalformedInput(format!(
            "row {row}: field `{name}` is not finite ({value})"
        )));
    }
    Ok(value)
}

/// One validated OHLCV bar with a UTC open time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time_open: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
    /// Calendar month (1-12) of `time_open`.
    pub month: u32,
}

impl Candle {
    pub fn new(
        time_open: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: Option<f64>,
    ) -> Self {
        Self {
            time_open,
            open,
            high,
            low,
            close,
            volume,
            month: time_open.month(),
        }
    }

    /// Whether `low` sits at or below open, close and high.
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open.min(self.close).min(self.high)
    }
}

/// Candles ordered by `time_open` (non-decreasing), all in UTC.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedSeries {
    candles: Vec<Candle>,
}

impl NormalizedSeries {
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    /// The first `len` candles. Ordering is preserved, so the prefix is normalized too.
    pub(crate) fn prefix(&self, len: usize) -> Self {
        Self {
            candles: self.candles[..len.min(self.candles.len())].to_vec(),
        }
    }

    /// Extract one numeric column, oldest to newest.
    pub fn column(&self, pick: impl Fn(&Candle) -> f64) -> Vec<f64> {
        self.candles.iter().map(pick).collect()
    }
}

/// Parse a timestamp into a UTC instant.
///
/// Offset-aware inputs are converted to UTC, naive inputs are taken as UTC
/// and a bare `YYYY-MM-DD` means midnight UTC of that day.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Validate raw rows and order them by open time.
///
/// The sort is stable, so bars sharing a timestamp keep their input order.
/// No row is dropped. Bars whose `low` exceeds another price are passed
/// through unchanged and only counted in the log.
pub fn normalize(rows: &[RawCandle]) -> Result<NormalizedSeries> {
    let mut candles = rows
        .iter()
        .enumerate()
        .map(|(row, raw)| raw.to_candle(row))
        .collect::<Result<Vec<_>>>()?;

    candles.sort_by_key(|c| c.time_open);

    let inconsistent = candles.iter().filter(|c| !c.is_consistent()).count();
    if inconsistent > 0 {
        warn!(inconsistent, total = candles.len(), "bars with low above open/close/high");
    }

    Ok(NormalizedSeries { candles })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn raw(time: &str, high: f64) -> RawCandle {
        RawCandle::new(time, 10.0, high, 9.0, 10.5, Some(100.0))
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2025, 9, 30, 0, 0, 0).unwrap();

        assert_eq!(parse_timestamp("2025-09-30T00:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-09-30T00:00:00+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-09-30T02:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-09-30T00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-09-30 00:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-09-30"), Some(expected));
        assert_eq!(parse_timestamp(" 2025-09-30T00:00:00.000Z "), Some(expected));
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2025-13-01").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_normalize_sorts_and_keeps_length() {
        let rows = vec![
            raw("2025-01-03T00:00:00Z", 3.0),
            raw("2025-01-01T00:00:00Z", 1.0),
            raw("2025-01-02T00:00:00Z", 2.0),
        ];
        let series = normalize(&rows).unwrap();

        assert_eq!(series.len(), 3);
        assert_eq!(series.column(|c| c.high), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_normalize_is_stable_for_equal_timestamps() {
        let rows = vec![
            raw("2025-01-02T00:00:00Z", 20.0),
            raw("2025-01-01T00:00:00Z", 10.0),
            raw("2025-01-02T00:00:00", 21.0),
        ];
        let series = normalize(&rows).unwrap();
        assert_eq!(series.column(|c| c.high), vec![10.0, 20.0, 21.0]);
    }

    #[test]
    fn test_normalize_mixed_naive_and_aware_agree() {
        let rows = vec![
            raw("2025-03-01T12:00:00", 1.0),
            raw("2025-03-01T12:00:00Z", 2.0),
            raw("2025-03-01T14:00:00+02:00", 3.0),
        ];
        let series = normalize(&rows).unwrap();
        let times: Vec<_> = series.iter().map(|c| c.time_open).collect();

        assert!(times.iter().all(|t| *t == times[0]));
        // Stable: ties keep input order
        assert_eq!(series.column(|c| c.high), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_normalize_attaches_month() {
        let rows = vec![raw("2024-12-31T23:00:00Z", 1.0), raw("2024-12-31T23:00:00-02:00", 2.0)];
        let series = normalize(&rows).unwrap();

        assert_eq!(series.candles()[0].month, 12);
        // 23:00 at -02:00 is already January in UTC
        assert_eq!(series.candles()[1].month, 1);
    }

    #[test]
    fn test_normalize_missing_field() {
        let mut bad = raw("2025-01-01T00:00:00Z", 1.0);
        bad.close = None;
        let rows = vec![raw("2025-01-02T00:00:00Z", 1.0), bad];

        let err = normalize(&rows).unwrap_err();
        assert!(matches!(err, PredictError::MalformedInput(ref msg) if msg.contains("row 1") && msg.contains("close")));
    }

    #[test]
    fn test_normalize_missing_time() {
        let mut bad = raw("2025-01-01T00:00:00Z", 1.0);
        bad.time_open = None;
        assert!(matches!(normalize(&[bad]), Err(PredictError::MalformedInput(_))));
    }

    #[test]
    fn test_normalize_unparseable_time() {
        let rows = vec![raw("not-a-date", 1.0)];
        let err = normalize(&rows).unwrap_err();
        assert!(err.to_string().contains("not-a-date"));
    }

    #[test]
    fn test_normalize_rejects_non_finite_prices() {
        let rows = vec![RawCandle::new("2025-01-01", 1.0, f64::NAN, 0.5, 1.0, None)];
        assert!(matches!(normalize(&rows), Err(PredictError::MalformedInput(_))));

        let rows = vec![RawCandle::new("2025-01-01", 1.0, 2.0, 0.5, 1.0, Some(f64::INFINITY))];
        assert!(matches!(normalize(&rows), Err(PredictError::MalformedInput(_))));
    }

    #[test]
    fn test_normalize_passes_inconsistent_bars_through() {
        // low above high
        let rows = vec![RawCandle::new("2025-01-01", 10.0, 9.0, 11.0, 10.0, None)];
        let series = normalize(&rows).unwrap();
        assert!(!series.candles()[0].is_consistent());
    }

    #[test]
    fn test_normalize_does_not_touch_input() {
        let rows = vec![raw("2025-01-02", 2.0), raw("2025-01-01", 1.0)];
        let before = rows.clone();
        let _ = normalize(&rows).unwrap();
        assert_eq!(rows, before);
    }

    #[test]
    fn test_raw_candle_deserialize_aliases() {
        let json = r#"[
            {"timeOpen": "2025-01-01T00:00:00Z", "open": 1, "high": 2, "low": 0.5, "close": 1.5, "volume": 10},
            {"time": "2025-01-02", "open": 1, "high": 2, "low": 0.5, "close": 1.5},
            {"timeOpen": "2025-01-03", "open": 1, "low": 0.5, "close": 1.5, "volume": null}
        ]"#;
        let rows: Vec<RawCandle> = serde_json::from_str(json).unwrap();

        assert_eq!(rows[0].volume, Some(10.0));
        assert_eq!(rows[1].time_open, None);
        assert_eq!(rows[1].time.as_deref(), Some("2025-01-02"));
        assert_eq!(rows[1].volume, None);
        assert_eq!(rows[2].high, None);
    }

    #[test]
    fn test_time_open_preferred_over_time() {
        let json = r#"[
            {"timeOpen": "2025-01-05", "time": "2025-01-01", "open": 1, "high": 2, "low": 0.5, "close": 1.5},
            {"time": "2025-01-03", "open": 1, "high": 3, "low": 0.5, "close": 1.5}
        ]"#;
        let rows: Vec<RawCandle> = serde_json::from_str(json).unwrap();
        let series = normalize(&rows).unwrap();

        let expected = |d| Utc.with_ymd_and_hms(2025, 1, d, 0, 0, 0).unwrap();
        assert_eq!(series.candles()[0].time_open, expected(3));
        assert_eq!(series.candles()[1].time_open, expected(5));
        assert_eq!(series.candles()[1].high, 2.0);
    }

    #[quickcheck]
    fn prop_normalize_orders_without_losing_rows(offsets: Vec<u32>) -> bool {
        let base = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let rows: Vec<RawCandle> = offsets
            .iter()
            .map(|&secs| {
                let t = base + chrono::Duration::seconds(i64::from(secs % 100_000_000));
                RawCandle::new(t.to_rfc3339(), 1.0, 2.0, 0.5, 1.5, Some(1.0))
            })
            .collect();

        let series = normalize(&rows).unwrap();
        series.len() == rows.len()
            && series
                .candles()
                .windows(2)
                .all(|w| w[0].time_open <= w[1].time_open)
    }
}
