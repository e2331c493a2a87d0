//! Call transcript, dispatch log, and outbound dispatch handlers.

use crate::{with_conn, AppState};
use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Maximum rows returned by list endpoints.
const MAX_LIST_LIMIT: u32 = 500;

/// Maximum phone numbers in one dispatch request.
const MAX_DISPATCH_BATCH: usize = 100;

#[derive(Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    pub region_code: Option<String>,
}

#[derive(Serialize)]
pub struct DispatchResponse {
    pub success: bool,
    pub message: String,
    pub calls_initiated: u32,
    pub failed_numbers: Vec<String>,
}

/// GET /api/calls/{callSid}/history
pub async fn get_call_history_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_sid): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let history = with_conn(&state, move |conn| {
        ringline_records::read_history(conn, &call_sid)
    })
    .await?;

    Ok(Json(json!({ "turns": history })))
}

/// GET /api/calls
pub async fn list_calls_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, StatusCode> {
    let limit = params.limit.unwrap_or(100).min(MAX_LIST_LIMIT);
    let attempts =
        with_conn(&state, move |conn| {
            ringline_records::list_call_attempts(conn, limit)
        })
        .await?;

    Ok(Json(json!({ "calls": attempts })))
}

/// POST /api/calls/dispatch
///
/// Places outbound calls to the given numbers, or to every patient in
/// `region_code` when no numbers are given. Failures are per-number: one
/// unreachable patient does not abort the batch.
pub async fn dispatch_calls_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchResponse>, StatusCode> {
    if !state.telephony.is_configured() {
        tracing::warn!("dispatch requested but telephony provider is not configured");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let mut phone_numbers = request.phone_numbers;
    if phone_numbers.is_empty() {
        if let Some(region_code) = request.region_code {
            let patients = with_conn(&state, move |conn| {
                ringline_records::patients_by_region(conn, &region_code)
            })
            .await?;
            phone_numbers = patients.into_iter().map(|p| p.phone_number).collect();
        }
    }

    if phone_numbers.is_empty() {
        return Ok(Json(DispatchResponse {
            success: false,
            message: "no phone numbers provided or found".to_string(),
            calls_initiated: 0,
            failed_numbers: Vec::new(),
        }));
    }
    if phone_numbers.len() > MAX_DISPATCH_BATCH {
        return Err(StatusCode::BAD_REQUEST);
    }

    let webhook_url = format!(
        "{}/api/telephony/voice",
        state.public_url.trim_end_matches('/')
    );

    let mut calls_initiated = 0u32;
    let mut failed_numbers = Vec::new();

    for number in phone_numbers {
        match state.telephony.place_call(&number, &webhook_url).await {
            Ok(call_sid) => {
                calls_initiated += 1;
                let number_clone = number.clone();
                let result = with_conn(&state, move |conn| {
                    ringline_records::record_call_attempt(
                        conn,
                        Some(&call_sid),
                        &number_clone,
                        "initiated",
                        "call placed",
                    )
                })
                .await;
                if result.is_err() {
                    tracing::warn!(number = %number, "failed to record call attempt");
                }
            }
            Err(e) => {
                tracing::warn!(number = %number, error = %e, "failed to place call");
                let number_clone = number.clone();
                let message = e.to_string();
                let _ = with_conn(&state, move |conn| {
                    ringline_records::record_call_attempt(
                        conn,
                        None,
                        &number_clone,
                        "failed",
                        &message,
                    )
                })
                .await;
                failed_numbers.push(number);
            }
        }
    }

    Ok(Json(DispatchResponse {
        success: true,
        message: format!("initiated {} calls", calls_initiated),
        calls_initiated,
        failed_numbers,
    }))
}
