use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::http::server::AppState;
use crate::observability::memory_usage;
use crate::store::RingBuffer;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub actions: Vec<String>,
    pub violations: usize,
    pub errors: usize,
    pub memory_usage: u64,
    pub memory_peak: u64,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let inner = state.inner.load_full();
    let logger = inner.gateway.logger();
    let memory = memory_usage();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        actions: inner.gateway.actions().into_iter().map(str::to_string).collect(),
        violations: logger.violations().entries().map(|e| e.len()).unwrap_or(0),
        errors: logger.errors().entries().map(|e| e.len()).unwrap_or(0),
        memory_usage: memory.current,
        memory_peak: memory.peak,
    })
}

pub async fn get_violations(State(state): State<AppState>) -> Result<Json<Vec<Value>>, StatusCode> {
    let inner = state.inner.load_full();
    read_history(inner.gateway.logger().violations())
}

pub async fn clear_violations(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let inner = state.inner.load_full();
    clear_history(inner.gateway.logger().violations())
}

pub async fn get_errors(State(state): State<AppState>) -> Result<Json<Vec<Value>>, StatusCode> {
    let inner = state.inner.load_full();
    read_history(inner.gateway.logger().errors())
}

pub async fn clear_errors(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let inner = state.inner.load_full();
    clear_history(inner.gateway.logger().errors())
}

fn read_history(history: &RingBuffer) -> Result<Json<Vec<Value>>, StatusCode> {
    history.entries().map(Json).map_err(|e| {
        tracing::error!(history = history.name(), error = %e, "Failed to read history");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

fn clear_history(history: &RingBuffer) -> Result<Json<Value>, StatusCode> {
    history.clear().map_err(|e| {
        tracing::error!(history = history.name(), error = %e, "Failed to clear history");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    tracing::info!(history = history.name(), "History cleared");
    Ok(Json(json!({ "cleared": history.name() })))
}
