//! Adapter trait seams.
//!
//! The orchestrator holds these as trait objects so call-flow tests can
//! substitute deterministic mocks for the subprocess and HTTP services.

use crate::error::VoiceError;
use async_trait::async_trait;
use ringline_types::{Reply, Turn};

/// Converts a recorded utterance into text.
///
/// Implementations should return empty text for silent or unintelligible
/// input when they can tell the difference; errors are reserved for the
/// adapter itself failing.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, VoiceError>;
}

/// Produces the agent's next utterance from the conversation so far.
///
/// Stateless between calls: the full accumulated history is passed every
/// time.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, history: &[Turn], latest: &str) -> Result<Reply, VoiceError>;
}

/// Converts utterance text into playable audio bytes.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError>;
}
