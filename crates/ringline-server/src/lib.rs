//! Ringline server library logic.

pub mod api_audio;
pub mod api_calls;
pub mod api_patients;
pub mod api_telephony;
pub mod background;
pub mod config;
pub mod telephony;
pub mod twiml;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use ringline_artifacts::ArtifactStore;
use ringline_calls::CallOrchestrator;
use ringline_db::DbPool;
use serde_json::{json, Value};
use std::sync::Arc;
use telephony::{RecordingFetcher, TelephonyClient};
use tower_http::cors::{Any, CorsLayer};
use twiml::TwimlRenderer;

/// Maximum request body size (1 MiB). Webhook forms and dispatch requests
/// are small; recordings are fetched by the server, never uploaded to it.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Audio artifact store.
    pub artifacts: Arc<ArtifactStore>,
    /// Per-call state machines and the event pipeline.
    pub orchestrator: Arc<CallOrchestrator>,
    /// Outbound call placement client.
    pub telephony: Arc<TelephonyClient>,
    /// Caller recording downloader.
    pub recordings: Arc<RecordingFetcher>,
    /// Telephony instruction → TwiML renderer.
    pub twiml: Arc<TwimlRenderer>,
    /// Public base URL used for webhook callbacks.
    pub public_url: String,
}

/// Runs a blocking records query against the pool, mapping failures to 500.
pub(crate) async fn with_conn<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> Result<T, ringline_records::RecordsError>
        + Send
        + 'static,
{
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!(error = %e, "database pool exhausted");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        f(&conn).map_err(|e| {
            tracing::error!(error = %e, "records query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_calls": state.orchestrator.active_sessions(),
        "telephony": if state.telephony.is_configured() { "configured" } else { "disabled" },
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/telephony/voice",
            post(api_telephony::voice_webhook_handler),
        )
        .route(
            "/api/telephony/status",
            post(api_telephony::status_webhook_handler),
        )
        .route("/audio/{artifactId}", get(api_audio::get_audio_handler))
        .route(
            "/api/calls",
            get(api_calls::list_calls_handler),
        )
        .route(
            "/api/calls/dispatch",
            post(api_calls::dispatch_calls_handler),
        )
        .route(
            "/api/calls/{callSid}/history",
            get(api_calls::get_call_history_handler),
        )
        .route(
            "/api/patients",
            get(api_patients::list_patients_handler).post(api_patients::create_patient_handler),
        )
        .route(
            "/api/patients/search",
            post(api_patients::search_patients_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
