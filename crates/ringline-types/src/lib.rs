//! Shared types for the Ringline platform.
//!
//! Defines the vocabulary the other crates speak: who said what in a call,
//! the lifecycle events the telephony provider delivers, and the
//! instructions we hand back to it.

use serde::{Deserialize, Serialize};

/// Who produced an utterance within a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Caller,
    Agent,
}

impl Speaker {
    /// Stable string form used as part of the conversation-log dedupe key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Caller => "caller",
            Speaker::Agent => "agent",
        }
    }
}

/// One utterance in a call's in-memory history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

impl Turn {
    pub fn caller(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Caller,
            text: text.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Agent,
            text: text.into(),
        }
    }
}

/// The response generator's output for one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// The agent's next utterance.
    pub text: String,
    /// True when the generator signals the conversation should conclude.
    pub should_close: bool,
}

/// Category of a transient audio artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A caller recording delivered by the telephony provider.
    IncomingRecording,
    /// Synthesized agent speech awaiting playback.
    SynthesizedReply,
}

impl ArtifactKind {
    /// File extension used when the artifact is persisted.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::IncomingRecording => "wav",
            ArtifactKind::SynthesizedReply => "wav",
        }
    }
}

/// A telephony lifecycle event, as decoded from the provider webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelephonyEvent {
    CallAnswered { call_sid: String },
    RecordingReady { call_sid: String, artifact_id: String },
    /// The provider re-entered the webhook without a recording: the caller
    /// said nothing before the record timeout elapsed.
    RecordingTimeout { call_sid: String },
    CallEnded { call_sid: String },
}

/// A single verb in an outgoing telephony instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TelephonyAction {
    /// Speak `text` using the provider's built-in voice.
    Say { text: String },
    /// Play a stored audio artifact.
    Play { artifact_id: String },
    /// Record the caller's next utterance and post it back to the webhook.
    Record,
    /// Terminate the call.
    Hangup,
}

/// An ordered sequence of telephony verbs emitted in response to one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelephonyInstruction {
    pub actions: Vec<TelephonyAction>,
}

impl TelephonyInstruction {
    pub fn new(actions: Vec<TelephonyAction>) -> Self {
        Self { actions }
    }

    /// Speak `text`, then record the caller's response.
    pub fn say_and_record(text: impl Into<String>) -> Self {
        Self::new(vec![
            TelephonyAction::Say { text: text.into() },
            TelephonyAction::Record,
        ])
    }

    /// Play an artifact, then record the caller's response.
    pub fn play_and_record(artifact_id: impl Into<String>) -> Self {
        Self::new(vec![
            TelephonyAction::Play {
                artifact_id: artifact_id.into(),
            },
            TelephonyAction::Record,
        ])
    }

    /// Speak `text`, then hang up.
    pub fn say_and_hangup(text: impl Into<String>) -> Self {
        Self::new(vec![
            TelephonyAction::Say { text: text.into() },
            TelephonyAction::Hangup,
        ])
    }

    /// Play an artifact, then hang up.
    pub fn play_and_hangup(artifact_id: impl Into<String>) -> Self {
        Self::new(vec![
            TelephonyAction::Play {
                artifact_id: artifact_id.into(),
            },
            TelephonyAction::Hangup,
        ])
    }

    /// A bare hangup, used when no safe spoken response exists.
    pub fn hangup() -> Self {
        Self::new(vec![TelephonyAction::Hangup])
    }

    /// IDs of every artifact this instruction references. The artifact
    /// store must keep these retrievable until the instruction is consumed.
    pub fn artifact_ids(&self) -> Vec<String> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                TelephonyAction::Play { artifact_id } => Some(artifact_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// True when the instruction ends the call.
    pub fn is_terminal(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a, TelephonyAction::Hangup))
    }
}
