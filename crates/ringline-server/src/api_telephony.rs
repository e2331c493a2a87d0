//! Telephony webhook handlers.
//!
//! The provider drives the whole conversation through two endpoints: the
//! voice webhook (call answered, recording ready, no-input re-entry) and
//! the status callback (call ended). Raw form fields are classified into a
//! [`TelephonyEvent`] before touching the orchestrator. Responses to the
//! voice webhook are TwiML documents; the caller must always get a
//! playable document, so every failure path here still renders valid XML.

use crate::AppState;
use axum::extract::{Extension, Form};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use ringline_types::{ArtifactKind, TelephonyEvent, TelephonyInstruction};
use serde::Deserialize;
use std::sync::Arc;

/// Form fields of interest on the voice webhook.
#[derive(Debug, Deserialize)]
pub struct VoiceWebhookForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "RecordingUrl")]
    pub recording_url: Option<String>,
}

/// Form fields of interest on the status callback.
#[derive(Debug, Deserialize)]
pub struct StatusWebhookForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "CallStatus")]
    pub call_status: Option<String>,
}

fn xml_response(xml: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        xml,
    )
        .into_response()
}

/// Classifies a voice webhook into a lifecycle event.
///
/// A recording URL means the caller's utterance is ready: the audio is
/// downloaded and registered as an artifact first, because the orchestrator
/// only ever sees artifact IDs. No recording plus a live session means the
/// record verb timed out with no input; no session means a new call.
async fn classify_voice_event(
    state: &AppState,
    call_sid: String,
    recording_url: Option<String>,
) -> TelephonyEvent {
    let Some(recording_url) = recording_url.filter(|url| !url.is_empty()) else {
        if state.orchestrator.has_session(&call_sid) {
            return TelephonyEvent::RecordingTimeout { call_sid };
        }
        return TelephonyEvent::CallAnswered { call_sid };
    };

    match state.recordings.fetch(&recording_url).await {
        Ok(bytes) => match state
            .artifacts
            .create(ArtifactKind::IncomingRecording, &bytes)
        {
            Ok(artifact) => TelephonyEvent::RecordingReady {
                call_sid,
                artifact_id: artifact.artifact_id,
            },
            Err(e) => {
                tracing::warn!(call_sid = %call_sid, error = %e, "failed to store recording");
                TelephonyEvent::RecordingTimeout { call_sid }
            }
        },
        Err(e) => {
            // The utterance is lost; ask the caller to repeat rather than
            // dropping them.
            tracing::warn!(call_sid = %call_sid, error = %e, "recording download failed");
            TelephonyEvent::RecordingTimeout { call_sid }
        }
    }
}

/// Maps a lifecycle event to its orchestrator transition.
async fn dispatch_event(state: &AppState, event: TelephonyEvent) -> TelephonyInstruction {
    match event {
        TelephonyEvent::CallAnswered { call_sid } => {
            state.orchestrator.on_call_answered(&call_sid).await
        }
        TelephonyEvent::RecordingReady {
            call_sid,
            artifact_id,
        } => {
            state
                .orchestrator
                .on_recording_ready(&call_sid, &artifact_id)
                .await
        }
        TelephonyEvent::RecordingTimeout { call_sid } => {
            state.orchestrator.on_recording_timeout(&call_sid).await
        }
        TelephonyEvent::CallEnded { call_sid } => {
            state.orchestrator.on_call_ended(&call_sid).await;
            TelephonyInstruction::hangup()
        }
    }
}

/// POST /api/telephony/voice
pub async fn voice_webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<VoiceWebhookForm>,
) -> Response {
    let Some(call_sid) = form.call_sid.filter(|sid| !sid.is_empty()) else {
        tracing::warn!("voice webhook without CallSid");
        return xml_response(
            state
                .twiml
                .render_error("Sorry, this call is missing required information. Goodbye."),
        );
    };

    let event = classify_voice_event(&state, call_sid, form.recording_url).await;
    let instruction = dispatch_event(&state, event).await;
    xml_response(state.twiml.render(&instruction))
}

/// POST /api/telephony/status
///
/// Terminal call statuses end the session; everything else is ignored.
pub async fn status_webhook_handler(
    Extension(state): Extension<Arc<AppState>>,
    Form(form): Form<StatusWebhookForm>,
) -> StatusCode {
    let (Some(call_sid), Some(status)) = (form.call_sid, form.call_status) else {
        return StatusCode::OK;
    };

    match status.as_str() {
        "completed" | "failed" | "busy" | "no-answer" | "canceled" => {
            tracing::debug!(call_sid = %call_sid, status = %status, "terminal call status");
            dispatch_event(&state, TelephonyEvent::CallEnded { call_sid }).await;
        }
        _ => {
            tracing::trace!(call_sid = %call_sid, status = %status, "non-terminal call status");
        }
    }

    StatusCode::OK
}
