// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// A read-only surface for the polling dashboard: it serves state-store
// snapshots and the plan artifact verbatim and never withholds fields — the
// UI applies the timeline gate client-side using `plan_status` and
// `plan_locked`. The one write is the kill-switch, which only raises a flag
// for the pipeline to consume.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::plan::snapshot::SnapshotStore;
use crate::state::StateStore;
use crate::types::{AgentStatus, PlanStatus, RiskStatus};

/// Shared handles the handlers read from.
#[derive(Clone)]
pub struct ApiContext {
    pub state: Arc<StateStore>,
    pub snapshots: Arc<SnapshotStore>,
    pub config: Arc<Config>,
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the REST router with CORS middleware and shared state.
pub fn router(ctx: ApiContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/plan", get(plan))
        .route("/api/v1/config", get(config))
        .route("/api/v1/control/kill", post(control_kill))
        .layer(cors)
        .with_state(ctx)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    state_version: u64,
    clock: String,
    plan_status: PlanStatus,
    risk_status: RiskStatus,
}

async fn health(State(ctx): State<ApiContext>) -> impl IntoResponse {
    let snapshot = ctx.state.snapshot();

    // Worst component status, with a failed plan grading at least WARN.
    let mut worst = AgentStatus::Ok;
    for hb in snapshot.agents.values() {
        worst = match (worst, hb.status) {
            (AgentStatus::Down, _) | (_, AgentStatus::Down) => AgentStatus::Down,
            (AgentStatus::Warn, _) | (_, AgentStatus::Warn) => AgentStatus::Warn,
            _ => AgentStatus::Ok,
        };
    }
    if snapshot.meta.plan_status == PlanStatus::Failed && worst == AgentStatus::Ok {
        worst = AgentStatus::Warn;
    }

    Json(HealthResponse {
        status: worst.to_string(),
        state_version: ctx.state.version(),
        clock: snapshot.meta.clock.clone(),
        plan_status: snapshot.meta.plan_status,
        risk_status: snapshot.meta.risk_state.status,
    })
}

// =============================================================================
// State, plan, config
// =============================================================================

async fn full_state(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.state.snapshot())
}

async fn plan(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json(ctx.snapshots.current())
}

async fn config(State(ctx): State<ApiContext>) -> impl IntoResponse {
    Json((*ctx.config).clone())
}

// =============================================================================
// Kill switch
// =============================================================================

async fn control_kill(State(ctx): State<ApiContext>) -> impl IntoResponse {
    ctx.state.request_kill();
    Json(serde_json::json!({ "status": "kill_requested" }))
}
