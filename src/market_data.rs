//! Kraken public OHLC client.
//!
//! The only market-data source of the service. One GET per call, no retry.

use crate::candle::RawCandle;
use crate::error::PredictError;
use crate::Result;
use anyhow::{anyhow, Context};
use chrono::{DateTime, SecondsFormat};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Bar sizes (minutes) Kraken serves.
pub const ALLOWED_INTERVALS: [u32; 8] = [1, 5, 15, 30, 60, 240, 1440, 10080];

const PAIR_ALIASES: &[(&str, &str)] = &[
    ("SOL", "SOLUSD"),
    ("SOLUSD", "SOLUSD"),
    ("SOLUSDT", "SOLUSDT"),
];

/// Map a token name onto a supported Kraken pair.
///
/// Case-insensitive, dashes ignored.
pub fn kraken_pair(token: &str) -> Result<String> {
    let normalized = token.trim().to_uppercase().replace('-', "");
    PAIR_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, pair)| pair.to_string())
        .ok_or_else(|| {
            PredictError::MalformedInput(format!(
                "unsupported token {token:?}; use SOL, SOLUSD or SOLUSDT"
            ))
        })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Serve the fetch routes at all
    pub enabled: bool,

    pub base_url: String,

    /// Kraken pair name, already resolved through [`kraken_pair`]
    pub pair: String,

    /// Bar size in minutes, one of [`ALLOWED_INTERVALS`]
    pub interval_minutes: u32,

    pub timeout_secs: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.kraken.com".to_string(),
            pair: "SOLUSD".to_string(),
            interval_minutes: 1440,
            timeout_secs: 30,
        }
    }
}

pub struct KrakenClient {
    http: Client,
    config: MarketDataConfig,
}

impl KrakenClient {
    pub fn new(config: MarketDataConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("high-inference/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build reqwest client")
            .map_err(PredictError::MarketData)?;
        Ok(Self::with_client(http, config))
    }

    /// Use a pre-configured HTTP client, e.g. one pointed at a mock server.
    pub fn with_client(http: Client, config: MarketDataConfig) -> Self {
        Self { http, config }
    }

    pub fn pair(&self) -> &str {
        &self.config.pair
    }

    /// The `n` most recent bars, oldest first.
    pub async fn recent_candles(&self, n: usize) -> Result<Vec<RawCandle>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let url = format!("{}/0/public/OHLC", self.config.base_url.trim_end_matches('/'));
        let interval = self.config.interval_minutes.to_string();
        debug!(%url, pair = %self.config.pair, %interval, n, "fetching OHLC");

        let fetch = async {
            let response = self
                .http
                .get(&url)
                .query(&[("pair", self.config.pair.as_str()), ("interval", interval.as_str())])
                .send()
                .await
                .context("HTTP error contacting Kraken")?
                .error_for_status()
                .context("Kraken returned an error status")?;
            let payload = response
                .json::<Value>()
                .await
                .context("invalid JSON from Kraken")?;
            anyhow::Ok(payload)
        };
        let payload = fetch.await.map_err(PredictError::MarketData)?;

        parse_ohlc_payload(&payload, &self.config.pair, n)
    }
}

fn market_error(msg: String) -> PredictError {
    PredictError::MarketData(anyhow!(msg))
}

/// Extract the last `n` bars for `pair` from a Kraken OHLC response.
///
/// Rows look like `[time, open, high, low, close, vwap, volume, count]` with
/// prices as strings. Malformed rows are skipped.
pub fn parse_ohlc_payload(payload: &Value, pair: &str, n: usize) -> Result<Vec<RawCandle>> {
    let Some(body) = payload.as_object() else {
        return Err(market_error("unexpected Kraken response type".to_string()));
    };

    if let Some(errors) = body.get("error").and_then(Value::as_array) {
        if !errors.is_empty() {
            return Err(market_error(format!("Kraken error: {errors:?}")));
        }
    }

    let result = body
        .get("result")
        .and_then(Value::as_object)
        .ok_or_else(|| market_error("Kraken response has no result".to_string()))?;

    // Kraken may change the key's case; otherwise take the first data key
    let key = result
        .keys()
        .find(|k| k.eq_ignore_ascii_case(pair))
        .or_else(|| result.keys().find(|k| k.as_str() != "last"))
        .ok_or_else(|| {
            market_error(format!(
                "unexpected Kraken payload keys: {:?}",
                result.keys().collect::<Vec<_>>()
            ))
        })?;

    let rows = result
        .get(key)
        .and_then(Value::as_array)
        .filter(|rows| !rows.is_empty())
        .ok_or_else(|| market_error("no OHLC rows returned from Kraken".to_string()))?;

    let tail = &rows[rows.len().saturating_sub(n)..];
    let mut parsed: Vec<(i64, RawCandle)> = tail.iter().filter_map(parse_row).collect();
    if parsed.len() < tail.len() {
        debug!(skipped = tail.len() - parsed.len(), "malformed OHLC rows");
    }

    parsed.sort_by_key(|(ts, _)| *ts);
    Ok(parsed.into_iter().map(|(_, candle)| candle).collect())
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

fn parse_row(row: &Value) -> Option<(i64, RawCandle)> {
    let fields = row.as_array()?;
    let ts = fields.first()?.as_i64()?;
    let time = DateTime::from_timestamp(ts, 0)?.to_rfc3339_opts(SecondsFormat::Secs, true);

    let candle = RawCandle::new(
        time,
        number(fields.get(1)?)?,
        number(fields.get(2)?)?,
        number(fields.get(3)?)?,
        number(fields.get(4)?)?,
        Some(number(fields.get(6)?)?),
    );
    Some((ts, candle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(rows: Value) -> Value {
        json!({
            "error": [],
            "result": { "SOLUSD": rows, "last": 1710000300 }
        })
    }

    #[test]
    fn test_parse_success() {
        let body = payload(json!([
            [1710000000, "150.1", "151.0", "149.8", "150.6", "150.5", "123.45", 1000]
        ]));
        let candles = parse_ohlc_payload(&body, "SOLUSD", 10).unwrap();

        assert_eq!(candles.len(), 1);
        let c = &candles[0];
        assert_eq!(c.time_open.as_deref(), Some("2024-03-09T16:00:00Z"));
        assert_eq!(c.open, Some(150.1));
        assert_eq!(c.high, Some(151.0));
        assert_eq!(c.low, Some(149.8));
        assert_eq!(c.close, Some(150.6));
        assert_eq!(c.volume, Some(123.45));
    }

    #[test]
    fn test_parse_keeps_last_n_sorted() {
        let body = payload(json!([
            [300, "3", "3", "3", "3", "3", "3", 1],
            [100, "1", "1", "1", "1", "1", "1", 1],
            [200, "2", "2", "2", "2", "2", "2", 1],
            [400, "4", "4", "4", "4", "4", "4", 1]
        ]));
        let candles = parse_ohlc_payload(&body, "SOLUSD", 3).unwrap();
        let highs: Vec<_> = candles.iter().map(|c| c.high.unwrap()).collect();

        assert_eq!(highs, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_parse_skips_malformed_rows() {
        let body = payload(json!([
            [100, "1", "1", "1", "1", "1", "1", 1],
            [200, "x", "2", "2", "2", "2", "2", 1],
            [300, "3", "3"],
            "garbage"
        ]));
        let candles = parse_ohlc_payload(&body, "SOLUSD", 10).unwrap();
        assert_eq!(candles.len(), 1);
    }

    #[test]
    fn test_parse_key_fallback() {
        let body = json!({
            "error": [],
            "result": { "last": 1, "SOLUSD.X": [[100, "1", "1", "1", "1", "1", "1", 1]] }
        });
        assert_eq!(parse_ohlc_payload(&body, "SOLUSD", 5).unwrap().len(), 1);

        let lower = json!({
            "error": [],
            "result": { "solusd": [[100, "1", "1", "1", "1", "1", "1", 1]] }
        });
        assert_eq!(parse_ohlc_payload(&lower, "SOLUSD", 5).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_ohlc_payload(&json!({"error": ["EQuery:Unknown asset pair"]}), "SOLUSD", 5)
            .unwrap_err();
        assert!(matches!(err, PredictError::MarketData(_)));
        assert!(err.to_string().contains("Unknown asset pair"));

        assert!(parse_ohlc_payload(&json!([1, 2]), "SOLUSD", 5).is_err());
        assert!(parse_ohlc_payload(&payload(json!([])), "SOLUSD", 5).is_err());
        assert!(parse_ohlc_payload(&json!({"error": [], "result": {"last": 1}}), "SOLUSD", 5).is_err());
    }

    #[test]
    fn test_kraken_pair_aliases() {
        assert_eq!(kraken_pair("sol").unwrap(), "SOLUSD");
        assert_eq!(kraken_pair("SOL-USD").unwrap(), "SOLUSD");
        assert_eq!(kraken_pair("solusdt").unwrap(), "SOLUSDT");
        assert!(matches!(kraken_pair("XBTUSD"), Err(PredictError::MalformedInput(_))));
    }

    #[tokio::test]
    async fn test_zero_candles_skips_request() {
        let config = MarketDataConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..MarketDataConfig::default()
        };
        let client = KrakenClient::new(config).unwrap();
        assert!(client.recent_candles(0).await.unwrap().is_empty());
    }
}
