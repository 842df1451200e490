//! Thin HTTP surface over the dispatcher.
//!
//! The outer transport is deliberately minimal: one JSON POST per tool
//! call, plus listing, health and metrics endpoints. Tool semantics and the
//! error envelope live entirely in [`crate::dispatch`].

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::dispatch::{tool_specs, Dispatcher, ToolCall, ToolResponse};
use crate::session::SessionManager;

pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub session: Arc<SessionManager>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/call", post(call_tool))
        .route("/tools", get(list_tools))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn call_tool(
    State(state): State<Arc<AppState>>,
    Json(call): Json<ToolCall>,
) -> Json<ToolResponse> {
    Json(state.dispatcher.dispatch(call).await)
}

async fn list_tools() -> impl IntoResponse {
    Json(tool_specs())
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session_state = state.session.state().await;
    Json(json!({ "session": session_state }))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    match encoder.encode(&families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {err}"),
        )
            .into_response(),
    }
}
