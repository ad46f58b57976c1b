//! Status collaborator's HTTP surface — `GET /status` and `POST /run`
//! (§6, "Status collaborator"). Deliberately narrow: no dashboard, no
//! fleet coordination, just the two operations the engine spec names.

use crate::controller::{RunController, RunRequest};
use crate::status::StatusStore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

pub struct ApiState {
    pub status: Arc<dyn StatusStore>,
    pub controller: Arc<RunController>,
    pub csv_data_dir: PathBuf,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/status", get(handler_status))
        .route("/run", post(handler_run))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        .with_state(state)
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
}

async fn handler_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse { status: state.status.read().await })
}

/// Mirrors the run configuration table in §6; `date` and `command_line` are
/// derived server-side rather than accepted from the caller.
#[derive(Deserialize)]
struct RunPayload {
    thread_count: u32,
    #[serde(default)]
    overdrive_madness: bool,
    #[serde(default)]
    compress: bool,
    #[serde(default)]
    regions: Option<Vec<String>>,
    #[serde(default)]
    operating_systems: Option<Vec<String>>,
    #[serde(default)]
    get_operating_systems: bool,
    #[serde(default)]
    get_regions: bool,
    #[serde(default = "default_true")]
    store_csv: bool,
    #[serde(default = "default_true")]
    store_db: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct RunAccepted {
    accepted: bool,
}

async fn handler_run(
    State(state): State<Arc<ApiState>>,
    Json(payload): Json<RunPayload>,
) -> (StatusCode, Json<RunAccepted>) {
    let request = RunRequest {
        date: chrono::Local::now().date_naive(),
        thread_count: payload.thread_count,
        overdrive_madness: payload.overdrive_madness,
        compress: payload.compress,
        regions: payload.regions,
        operating_systems: payload.operating_systems,
        get_operating_systems: payload.get_operating_systems,
        get_regions: payload.get_regions,
        store_csv: payload.store_csv,
        store_db: payload.store_db,
        csv_data_dir: state.csv_data_dir.clone(),
        command_line: "POST /run".to_string(),
    };

    let controller = state.controller.clone();
    tokio::spawn(async move {
        match controller.run(request).await {
            Ok(_) => info!("run dispatched via /run completed"),
            Err(e) => error!(error = %e, "run dispatched via /run failed"),
        }
    });

    (StatusCode::ACCEPTED, Json(RunAccepted { accepted: true }))
}
