//! HTTP surface.
//!
//! Handlers parse requests, call the predictor and map [`PredictError`]s
//! onto status codes. Prediction itself runs on the blocking pool.

use crate::candle::RawCandle;
use crate::error::PredictError;
use crate::features::{FEATURE_NAMES, MIN_HISTORY};
use crate::market_data::KrakenClient;
use crate::predictor::{HighPredictor, PredictionResult};
use crate::target::TargetEncoding;
use crate::window::parse_anchor;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

const MAX_FETCH: usize = 1000;
const MAX_ANCHORED_FETCH: usize = 2000;

/// Shared state handed to every handler.
pub struct AppState {
    pub predictor: Arc<HighPredictor>,
    /// `None` when fetching is disabled
    pub market: Option<KrakenClient>,
    /// Where the model was loaded from, for `/model/info`
    pub model_path: String,
}

impl AppState {
    pub fn new(
        predictor: HighPredictor,
        market: Option<KrakenClient>,
        model_path: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            predictor: Arc::new(predictor),
            market,
            model_path: model_path.into(),
        })
    }
}

/// Error body returned by every route.
#[derive(Debug)]
pub enum ApiError {
    Predict(PredictError),
    BadRequest(String),
    NotImplemented(String),
    Internal(String),
}

impl From<PredictError> for ApiError {
    fn from(e: PredictError) -> Self {
        Self::Predict(e)
    }
}

// Undecodable bodies count as malformed candle data
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Predict(PredictError::MalformedInput(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

fn status_for(err: &PredictError) -> StatusCode {
    match err {
        PredictError::MalformedInput(_)
        | PredictError::InsufficientHistory(_)
        | PredictError::Inversion(_)
        | PredictError::UnsupportedMode(_) => StatusCode::BAD_REQUEST,
        PredictError::NoDataBeforeAnchor { .. } => StatusCode::NOT_FOUND,
        PredictError::ModelInference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PredictError::MarketData(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, stage, detail) = match &self {
            Self::Predict(e) => (status_for(e), e.stage(), e.to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            Self::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, "not_implemented", msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg.clone()),
        };

        if status.is_server_error() {
            warn!(%status, stage, %detail, "request failed");
        }

        let body = json!({ "error": stage, "detail": detail });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub candles: Vec<RawCandle>,
    pub target_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    #[serde(default = "default_fetch_n")]
    n: usize,
    target_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnchoredQuery {
    date: String,
    #[serde(default = "default_anchored_n")]
    n: usize,
    target_mode: Option<String>,
}

fn default_fetch_n() -> usize {
    64
}

fn default_anchored_n() -> usize {
    256
}

/// Prediction over fetched history, tagged with the traded pair.
#[derive(Debug, Serialize)]
pub struct TokenPrediction {
    pub token: String,
    #[serde(flatten)]
    pub result: PredictionResult,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/model/info", get(model_info))
        .route("/predict", post(predict))
        .route("/predict/sol", get(predict_sol))
        .route("/predict/sol/at", get(predict_sol_at))
        .with_state(state)
}

fn parse_mode(mode: Option<&str>) -> Result<Option<TargetEncoding>, ApiError> {
    mode.map(str::parse::<TargetEncoding>).transpose().map_err(ApiError::from)
}

fn check_n(n: usize, max: usize) -> Result<(), ApiError> {
    if !(MIN_HISTORY..=max).contains(&n) {
        return Err(ApiError::BadRequest(format!(
            "n must be between {MIN_HISTORY} and {max}, got {n}"
        )));
    }
    Ok(())
}

fn market(state: &AppState) -> Result<&KrakenClient, ApiError> {
    state
        .market
        .as_ref()
        .ok_or_else(|| ApiError::NotImplemented("market data fetching is disabled".to_string()))
}

async fn run_blocking<F>(job: F) -> Result<PredictionResult, ApiError>
where
    F: FnOnce() -> crate::Result<PredictionResult> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| ApiError::Internal(format!("prediction task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn root() -> Json<Value> {
    Json(json!({
        "project": "Next-period high predictor",
        "endpoints": {
            "GET /": "This message",
            "GET /health": "Liveness check",
            "GET /model/info": "Model and feature metadata",
            "POST /predict": "Predict the next high from supplied OHLCV rows",
            "GET /predict/sol": "Fetch recent SOL candles and predict the next high",
            "GET /predict/sol/at": "Predict the next high as of an anchor date",
        },
        "expected_input": {
            "candles": "Array of OHLCV objects: timeOpen, open, high, low, close, optional volume",
            "min_rows": MIN_HISTORY,
            "order": "Any order; rows are sorted by timeOpen",
            "target_modes": TargetEncoding::all(),
        },
    }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn model_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = state.predictor.config();
    Json(json!({
        "model_path": state.model_path,
        "target_mode": config.default_mode,
        "final_features": FEATURE_NAMES,
        "min_history": config.min_history,
        "model_repr": state.predictor.model().describe(),
    }))
}

async fn predict(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let Json(req) = payload?;
    let mode = parse_mode(req.target_mode.as_deref())?;
    let predictor = Arc::clone(&state.predictor);

    let result = run_blocking(move || predictor.predict_candles(&req.candles, mode)).await?;
    Ok(Json(result))
}

async fn predict_sol(
    State(state): State<Arc<AppState>>,
    query: Result<Query<FetchQuery>, QueryRejection>,
) -> Result<Json<TokenPrediction>, ApiError> {
    let market = market(&state)?;
    let Query(q) = query?;
    check_n(q.n, MAX_FETCH)?;
    let mode = parse_mode(q.target_mode.as_deref())?;

    let rows = market.recent_candles(q.n).await?;
    let predictor = Arc::clone(&state.predictor);
    let result = run_blocking(move || predictor.predict_recent(&rows, mode)).await?;

    Ok(Json(TokenPrediction {
        token: market.pair().to_string(),
        result,
    }))
}

async fn predict_sol_at(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AnchoredQuery>, QueryRejection>,
) -> Result<Json<TokenPrediction>, ApiError> {
    let market = market(&state)?;
    let Query(q) = query?;
    check_n(q.n, MAX_ANCHORED_FETCH)?;
    let mode = parse_mode(q.target_mode.as_deref())?;
    let anchor = parse_anchor(&q.date)?;

    let rows = market.recent_candles(q.n).await?;
    let predictor = Arc::clone(&state.predictor);
    let result = run_blocking(move || predictor.predict_at(&rows, anchor, mode)).await?;

    Ok(Json(TokenPrediction {
        token: market.pair().to_string(),
        result,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        use chrono::Utc;

        assert_eq!(
            status_for(&PredictError::InsufficientHistory("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&PredictError::NoDataBeforeAnchor { anchor: Utc::now() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&PredictError::ModelInference(anyhow::anyhow!("x"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&PredictError::MarketData(anyhow::anyhow!("x"))),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_check_n_bounds() {
        assert!(check_n(21, MAX_FETCH).is_ok());
        assert!(check_n(1000, MAX_FETCH).is_ok());
        assert!(check_n(20, MAX_FETCH).is_err());
        assert!(check_n(1001, MAX_FETCH).is_err());
        assert!(check_n(2000, MAX_ANCHORED_FETCH).is_ok());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode(None).unwrap(), None);
        assert_eq!(parse_mode(Some("delta")).unwrap(), Some(TargetEncoding::Delta));
        assert!(matches!(
            parse_mode(Some("ratio")),
            Err(ApiError::Predict(PredictError::UnsupportedMode(_)))
        ));
    }
}
