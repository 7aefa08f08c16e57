//! Health endpoint

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::AppState;
use crate::data::{delivery, follows};
use crate::error::AppError;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    follow_edges: i64,
    pending_deliveries: i64,
    instance_followers: i64,
    instance_following: i64,
}

/// Liveness plus a database round trip
async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let pool = state.db.pool();
    let stats = follows::get_stats(pool, &state.ctx.system_actor.id).await?;

    Ok(Json(HealthResponse {
        status: "ok",
        follow_edges: follows::count_edges(pool).await?,
        pending_deliveries: delivery::count_pending(pool).await?,
        instance_followers: stats.total_instance_followers,
        instance_following: stats.total_instance_following,
    }))
}

pub fn health_router() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
