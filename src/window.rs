//! As-of history selection.

use crate::candle::{parse_timestamp, NormalizedSeries};
use crate::error::PredictError;
use crate::features::MIN_HISTORY;
use crate::Result;
use chrono::{DateTime, Utc};

/// Parse a caller-supplied anchor.
///
/// Accepts the same forms as candle timestamps; a bare date means midnight
/// UTC of that day.
pub fn parse_anchor(text: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(text).ok_or_else(|| {
        PredictError::MalformedInput(format!(
            "invalid anchor {text:?}; use an ISO date or datetime such as 2025-09-30 or 2025-09-30T00:00:00Z"
        ))
    })
}

/// Longest prefix of `series` whose bars opened at or before `anchor`.
///
/// Fails only when no bar qualifies; the length is not checked.
pub fn prefix_at_or_before(
    series: &NormalizedSeries,
    anchor: DateTime<Utc>,
) -> Result<NormalizedSeries> {
    // Series is sorted, so everything up to the partition point qualifies
    let len = series.candles().partition_point(|c| c.time_open <= anchor);
    if len == 0 {
        return Err(PredictError::NoDataBeforeAnchor { anchor });
    }
    Ok(series.prefix(len))
}

/// History window used for an anchored prediction.
///
/// Without an anchor the full series is returned unchanged. With one, the
/// prefix from [`prefix_at_or_before`] must hold at least [`MIN_HISTORY`]
/// candles.
pub fn window_at_or_before(
    series: &NormalizedSeries,
    anchor: Option<DateTime<Utc>>,
) -> Result<NormalizedSeries> {
    let Some(anchor) = anchor else {
        return Ok(series.clone());
    };

    let window = prefix_at_or_before(series, anchor)?;
    if window.len() < MIN_HISTORY {
        return Err(PredictError::InsufficientHistory(format!(
            "only {} candles at or before {anchor} (need at least {MIN_HISTORY})",
            window.len()
        )));
    }

    Ok(window)
}
