//! `HeraldServer`: axum router over a running [`Pipeline`].

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use herald_core::{DigestWindow, EventId, LedgerRecord, OperatorAlert};
use herald_ledger::DeliveryLedger;
use herald_pipeline::{Accepted, Pipeline, RawEvent, SubmitError};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::errors::ApiError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;

/// Default page size of `GET /v1/ledger`.
pub const DEFAULT_LEDGER_LIMIT: u32 = 100;
/// Largest page size of `GET /v1/ledger`.
pub const MAX_LEDGER_LIMIT: u32 = 1000;

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The notification pipeline.
    pub pipeline: Pipeline,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server start time.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

/// The Herald HTTP server.
pub struct HeraldServer {
    config: ServerConfig,
    state: AppState,
}

impl HeraldServer {
    /// Create a server over `pipeline`. Shutdown of the server cancels the
    /// pipeline's token.
    pub fn new(config: ServerConfig, pipeline: Pipeline) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::with_token(pipeline.shutdown_token()));
        Self {
            config,
            state: AppState {
                pipeline,
                shutdown,
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/events", post(submit_handler))
            .route("/v1/events/{id}/replay", post(replay_handler))
            .route("/v1/events/{id}/ledger", get(event_ledger_handler))
            .route("/v1/ledger", get(ledger_handler))
            .route("/v1/alerts", get(alerts_handler))
            .route("/v1/digests", get(digests_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind and serve until the shutdown token is cancelled.
    pub async fn serve(&self) -> crate::errors::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        info!(addr = %listener.local_addr()?, "herald server listening");
        let token = self.state.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;
        Ok(())
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// The configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.state.pipeline
    }
}

/// Body of a successful submission.
#[derive(Serialize)]
struct AcceptedBody {
    status: &'static str,
    #[serde(flatten)]
    accepted: Accepted,
}

impl IntoResponse for AcceptedBody {
    fn into_response(self) -> Response {
        (StatusCode::ACCEPTED, Json(self)).into_response()
    }
}

fn accepted(result: Result<Accepted, SubmitError>) -> Result<AcceptedBody, ApiError> {
    let accepted = result.map_err(ApiError::from)?;
    Ok(AcceptedBody {
        status: "accepted",
        accepted,
    })
}

async fn submit_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<AcceptedBody, ApiError> {
    let raw = RawEvent::from_json(&body).map_err(|e| ApiError::rejected(&e))?;
    accepted(state.pipeline.submit_event(&raw).await)
}

async fn replay_handler(
    State(state): State<AppState>,
    Path(id): Path<EventId>,
) -> Result<AcceptedBody, ApiError> {
    accepted(state.pipeline.replay(&id).await)
}

/// Run a ledger read off the async runtime.
async fn read<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&DeliveryLedger) -> herald_ledger::Result<T> + Send + 'static,
{
    let ledger = state.pipeline.ledger().clone();
    match tokio::task::spawn_blocking(move || f(&ledger)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(error = %e, "ledger read failed");
            Err(ApiError::internal(e.to_string()))
        }
        Err(e) => Err(ApiError::internal(e.to_string())),
    }
}

#[derive(Serialize)]
struct RecordsBody {
    records: Vec<LedgerRecord>,
}

async fn event_ledger_handler(
    State(state): State<AppState>,
    Path(id): Path<EventId>,
) -> Result<Json<RecordsBody>, ApiError> {
    let records = read(&state, move |l| l.query(&id)).await?;
    Ok(Json(RecordsBody { records }))
}

#[derive(Debug, Deserialize)]
struct LedgerParams {
    limit: Option<u32>,
}

async fn ledger_handler(
    State(state): State<AppState>,
    Query(params): Query<LedgerParams>,
) -> Result<Json<RecordsBody>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LEDGER_LIMIT)
        .clamp(1, MAX_LEDGER_LIMIT);
    let records = read(&state, move |l| l.recent(limit)).await?;
    Ok(Json(RecordsBody { records }))
}

#[derive(Serialize)]
struct AlertsBody {
    alerts: Vec<OperatorAlert>,
}

async fn alerts_handler(State(state): State<AppState>) -> Result<Json<AlertsBody>, ApiError> {
    let alerts = read(&state, DeliveryLedger::alerts).await?;
    Ok(Json(AlertsBody { alerts }))
}

#[derive(Serialize)]
struct WindowsBody {
    windows: Vec<DigestWindow>,
}

async fn digests_handler(State(state): State<AppState>) -> Result<Json<WindowsBody>, ApiError> {
    let windows = read(&state, DeliveryLedger::windows).await?;
    Ok(Json(WindowsBody { windows }))
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let resp = health::health_check(
        state.start_time,
        state.pipeline.pending_tasks(),
        state.pipeline.halt().reason(),
    );
    let status = if resp.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp))
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, ApiError> {
    state
        .metrics
        .as_ref()
        .map(crate::metrics::render)
        .ok_or_else(|| ApiError::not_found("metrics recorder not installed"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
