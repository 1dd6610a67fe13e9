//! API Service - Read API for the district performance dashboard
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /districts - All districts, ordered by id
//! - GET /leaderboard - Districts ranked by HPS score
//! - GET /summary - Statewide summary (404 until first aggregation)
//! - GET /insights - Latest insight report (404 until first aggregation)
//! - GET /historical - Monthly historical data points
//! - POST /reports?filename=&month= - Ingest a report synchronously

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use ingest::aggregate::leaderboard;
use ingest::model::MonthKey;
use ingest::orchestrator::{Pipeline, PipelineSettings};
use ingest::{init_tracing, Config, IngestError, MetricsStore, PgStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const MAX_REPORT_BYTES: usize = 25 * 1024 * 1024;

// ============================================================================
// State
// ============================================================================

struct AppState<S: ?Sized> {
    pipeline: Pipeline<S>,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct LeaderboardEntry {
    rank: usize,
    id: String,
    district_name: String,
    hps_score: f64,
    conviction_ratio: f64,
    zone: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Deserialize)]
struct ReportQuery {
    filename: String,
    month: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

enum ApiError {
    NotFound(&'static str),
    BadRequest(String),
    Ingest(IngestError),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        ApiError::Ingest(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not available yet", what)),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Ingest(err @ IngestError::UnsupportedFormat { .. }) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, err.to_string())
            }
            ApiError::Ingest(err @ IngestError::Parse { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            ApiError::Ingest(IngestError::Store(err)) | ApiError::Store(err) => {
                error!(error = %err, "store error");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn districts_handler<S>(State(state): State<Arc<AppState<S>>>) -> Result<Response, ApiError>
where
    S: MetricsStore + ?Sized + 'static,
{
    let districts = state.pipeline.store().list_districts().await?;
    Ok(Json(districts).into_response())
}

async fn leaderboard_handler<S>(State(state): State<Arc<AppState<S>>>) -> Result<Response, ApiError>
where
    S: MetricsStore + ?Sized + 'static,
{
    let districts = state.pipeline.store().list_districts().await?;
    let entries: Vec<LeaderboardEntry> = leaderboard(&districts)
        .into_iter()
        .enumerate()
        .map(|(i, d)| LeaderboardEntry {
            rank: i + 1,
            id: d.id.clone(),
            district_name: d.district_name.clone(),
            hps_score: d.hps_score,
            conviction_ratio: d.conviction_ratio,
            zone: d.zone.clone(),
        })
        .collect();
    Ok(Json(entries).into_response())
}

async fn summary_handler<S>(State(state): State<Arc<AppState<S>>>) -> Result<Response, ApiError>
where
    S: MetricsStore + ?Sized + 'static,
{
    let summary = state
        .pipeline
        .store()
        .summary()
        .await?
        .ok_or(ApiError::NotFound("summary"))?;
    Ok(Json(summary).into_response())
}

async fn insights_handler<S>(State(state): State<Arc<AppState<S>>>) -> Result<Response, ApiError>
where
    S: MetricsStore + ?Sized + 'static,
{
    let insights = state
        .pipeline
        .store()
        .insights()
        .await?
        .ok_or(ApiError::NotFound("insights"))?;
    Ok(Json(insights).into_response())
}

async fn historical_handler<S>(State(state): State<Arc<AppState<S>>>) -> Result<Response, ApiError>
where
    S: MetricsStore + ?Sized + 'static,
{
    let points = state.pipeline.store().historical().await?;
    Ok(Json(points).into_response())
}

async fn reports_handler<S>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<ReportQuery>,
    body: Bytes,
) -> Result<Response, ApiError>
where
    S: MetricsStore + ?Sized + 'static,
{
    let month = params
        .month
        .as_deref()
        .map(str::parse::<MonthKey>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    info!(filename = %params.filename, bytes = body.len(), "report posted");
    let report = state
        .pipeline
        .ingest(&params.filename, &body, month, Utc::now())
        .await?;
    Ok(Json(report).into_response())
}

fn app<S>(state: Arc<AppState<S>>) -> Router
where
    S: MetricsStore + ?Sized + 'static,
{
    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/districts", get(districts_handler::<S>))
        .route("/leaderboard", get(leaderboard_handler::<S>))
        .route("/summary", get(summary_handler::<S>))
        .route("/insights", get(insights_handler::<S>))
        .route("/historical", get(historical_handler::<S>))
        .route("/reports", post(reports_handler::<S>))
        .layer(DefaultBodyLimit::max(MAX_REPORT_BYTES))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let config = Config::from_env();

    info!("connecting to database");
    let store = PgStore::connect(config.db_url()?, 10)
        .await
        .context("Failed to connect to database")?;

    let settings = PipelineSettings {
        batch_limit: config.batch_limit,
        ..PipelineSettings::default()
    };
    let state = Arc::new(AppState {
        pipeline: Pipeline::new(Arc::new(store), settings),
    });

    let listener = tokio::net::TcpListener::bind(&config.api_bind).await?;
    info!(bind = %config.api_bind, "API listening");
    axum::serve(listener, app(state)).await?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
