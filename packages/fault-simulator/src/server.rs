//! server.rs — HTTP control API
//!
//! Thin JSON layer over the runner for dashboards and scripts:
//!   GET  /health
//!   GET  /api/scenarios                  list scenario definitions
//!   POST /api/scenarios                  add or replace one definition
//!   GET  /api/scenarios/:id
//!   POST /api/scenarios/:id/run          start a run in the background (409 while busy)
//!   POST /api/scenarios/stop             cancel the current run
//!   GET  /api/scenarios/results          recorded results
//!   GET  /api/scenarios/report           ?scenario_ids=a,b
//!   GET  /api/scenarios/export/csv

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fault_types::{FaultScenario, ScenarioRecord};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::Error;
use crate::report;
use crate::runner::ScenarioRunner;

type AppState = Arc<ScenarioRunner>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::ScenarioNotFound(_) | Error::NoResultsAvailable => StatusCode::NOT_FOUND,
            Error::InvalidFaultDefinition { .. } | Error::SourceParse { .. } => StatusCode::BAD_REQUEST,
            Error::RunInProgress(_) => StatusCode::CONFLICT,
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(runner: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/scenarios", get(list_scenarios).post(add_scenario))
        .route("/api/scenarios/stop", post(stop))
        .route("/api/scenarios/results", get(results))
        .route("/api/scenarios/report", get(scenario_report))
        .route("/api/scenarios/export/csv", get(export_csv))
        .route("/api/scenarios/:id", get(get_scenario))
        .route("/api/scenarios/:id/run", post(run_scenario))
        .with_state(runner)
        .layer(cors)
}

pub async fn serve(runner: AppState, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🖥  Control API listening on http://{addr}");
    axum::serve(listener, router(runner)).await?;
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn health(State(runner): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "running": runner.is_running(),
        "current_test_id": runner.current_test_id(),
    }))
}

async fn list_scenarios(State(runner): State<AppState>) -> Json<Vec<ScenarioRecord>> {
    Json(runner.manager().read().await.list_scenarios())
}

async fn add_scenario(
    State(runner): State<AppState>,
    Json(record): Json<ScenarioRecord>,
) -> Result<(StatusCode, Json<ScenarioRecord>), Error> {
    let id = record.id.clone();
    let scenario = FaultScenario::try_from(record)
        .map_err(|source| Error::InvalidFaultDefinition { id, source })?;
    let view = ScenarioRecord::from(scenario.clone());
    runner.manager().write().await.add_scenario(scenario);
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_scenario(
    State(runner): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScenarioRecord>, Error> {
    let manager = runner.manager();
    let manager = manager.read().await;
    let scenario = manager.get_scenario(&id).ok_or(Error::ScenarioNotFound(id))?;
    Ok(Json(ScenarioRecord::from(scenario.clone())))
}

#[derive(Debug, Deserialize)]
struct RunParams {
    route_name: Option<String>,
}

async fn run_scenario(
    State(runner): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<RunParams>,
) -> Result<(StatusCode, Json<serde_json::Value>), Error> {
    let route = params.route_name.unwrap_or_else(|| "A".to_string());
    // Claimed here so a concurrent request gets 409, not a background failure
    let ticket = runner.begin_run(&id, &route).await?;
    let body = json!({
        "status": "started",
        "scenario_id": id,
        "route_name": route,
        "test_id": ticket.test_id(),
    });

    let task_runner = runner.clone();
    tokio::spawn(async move {
        task_runner.execute(ticket).await;
    });

    Ok((StatusCode::ACCEPTED, Json(body)))
}

async fn stop(State(runner): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "stopped": runner.stop() }))
}

async fn results(State(runner): State<AppState>) -> Response {
    let manager = runner.manager();
    let manager = manager.read().await;
    Json(manager.test_results()).into_response()
}

#[derive(Debug, Deserialize)]
struct ReportParams {
    /// Comma-separated scenario ids
    scenario_ids: Option<String>,
}

async fn scenario_report(
    State(runner): State<AppState>,
    Query(params): Query<ReportParams>,
) -> Json<serde_json::Value> {
    let ids: Option<Vec<String>> = params.scenario_ids.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    });
    let manager = runner.manager();
    let manager = manager.read().await;
    Json(report::report_json(manager.test_results(), ids.as_deref()))
}

async fn export_csv(State(runner): State<AppState>) -> Result<Response, Error> {
    let manager = runner.manager();
    let manager = manager.read().await;
    if manager.test_results().is_empty() {
        return Err(Error::NoResultsAvailable);
    }
    let body = report::results_csv(manager.test_results());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"scenario_results.csv\""),
        ],
        body,
    )
        .into_response())
}
