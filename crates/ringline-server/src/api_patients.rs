//! Patient directory handlers.

use crate::{with_conn, AppState};
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::Json;
use ringline_records::Patient;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Maximum length for a patient name.
const MAX_NAME_LEN: usize = 256;
/// Maximum length for a phone number.
const MAX_PHONE_LEN: usize = 32;
/// Maximum length for a region code.
const MAX_REGION_LEN: usize = 16;

#[derive(Deserialize)]
pub struct SearchRequest {
    pub region_code: String,
}

#[derive(Deserialize)]
pub struct CreatePatientRequest {
    pub name: String,
    pub phone_number: String,
    pub region_code: String,
}

/// GET /api/patients
pub async fn list_patients_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, StatusCode> {
    let patients = with_conn(&state, ringline_records::list_patients).await?;
    Ok(Json(json!({ "patients": patients })))
}

/// POST /api/patients/search
///
/// Returns the patients that would be dialed for a region, matching the
/// trigger-call lookup used by dispatch.
pub async fn search_patients_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Value>, StatusCode> {
    if request.region_code.is_empty() || request.region_code.len() > MAX_REGION_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let patients = with_conn(&state, move |conn| {
        ringline_records::patients_by_region(conn, &request.region_code)
    })
    .await?;

    Ok(Json(json!({
        "total_count": patients.len(),
        "patients": patients,
    })))
}

/// POST /api/patients
pub async fn create_patient_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<CreatePatientRequest>,
) -> Result<Json<Value>, StatusCode> {
    if request.name.is_empty() || request.name.len() > MAX_NAME_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    if request.phone_number.is_empty() || request.phone_number.len() > MAX_PHONE_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    if request.region_code.is_empty() || request.region_code.len() > MAX_REGION_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let patient = Patient {
        name: request.name,
        phone_number: request.phone_number,
        region_code: request.region_code,
    };
    with_conn(&state, move |conn| {
        ringline_records::insert_patient(conn, &patient)
    })
    .await?;

    Ok(Json(json!({ "status": "created" })))
}
