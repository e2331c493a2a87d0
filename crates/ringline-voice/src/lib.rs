//! Speech adapters for the Ringline platform.
//!
//! The call pipeline needs three external capabilities: turning caller
//! audio into text, turning conversation history into the agent's next
//! utterance, and turning that utterance into audio. Each is an opaque,
//! fallible boundary with its own timeout; the orchestrator composes them
//! and owns all fallback behavior.
//!
//! Concrete implementations: whisper.cpp as a subprocess for
//! transcription, an OpenAI-compatible chat completion endpoint for
//! generation, and piper (with an espeak-ng fallback) for synthesis. The
//! [`Transcriber`], [`Responder`], and [`Synthesizer`] traits are the
//! seams tests mock.

pub mod adapter;
pub mod error;
pub mod generator;
pub mod stt;
pub mod synth;

pub use adapter::{Responder, Synthesizer, Transcriber};
pub use error::{Stage, VoiceError};
pub use generator::{GeneratorConfig, GeneratorService};
pub use stt::{SttConfig, SttService};
pub use synth::{SynthConfig, SynthService};
