use std::fmt;
use thiserror::Error;

/// Pipeline stage an adapter failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transcription,
    Generation,
    Synthesis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Transcription => write!(f, "transcription"),
            Stage::Generation => write!(f, "generation"),
            Stage::Synthesis => write!(f, "synthesis"),
        }
    }
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("transcription error: {0}")]
    Stt(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("{stage} adapter timed out after {seconds} seconds")]
    Timeout { stage: Stage, seconds: u64 },
}

impl VoiceError {
    /// The stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            VoiceError::Stt(_) => Stage::Transcription,
            VoiceError::Generation(_) => Stage::Generation,
            VoiceError::Synthesis(_) => Stage::Synthesis,
            VoiceError::Timeout { stage, .. } => *stage,
        }
    }
}
