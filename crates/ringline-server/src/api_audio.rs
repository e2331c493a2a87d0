//! Audio retrieval endpoint, consumed by the telephony provider to fetch
//! playback audio referenced in rendered instructions.

use crate::AppState;
use axum::extract::{Extension, Path};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// GET /audio/{artifactId}
///
/// Unknown or reaped artifacts are a plain 404: the provider treats that as
/// "skip playback" and moves on to the next verb.
pub async fn get_audio_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(artifact_id): Path<String>,
) -> Response {
    match state.artifacts.retrieve(&artifact_id) {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "audio/wav"),
                (header::CACHE_CONTROL, "private, immutable"),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::debug!(artifact_id = %artifact_id, error = %e, "audio fetch miss");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
