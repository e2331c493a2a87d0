//! Call sessions and the voice orchestrator — the core of Ringline.
//!
//! One [`CallSession`] exists per active phone call: a state machine that
//! owns the call's turn counter and in-memory transcript. The
//! [`CallOrchestrator`] maps telephony lifecycle events onto session
//! transitions, runs the transcribe → generate → synthesize pipeline with
//! a uniform fallback policy, and keeps calls isolated from each other.
//!
//! The one promise this crate keeps no matter what fails: the caller
//! always hears *something* — a real reply, a fallback apology, or a
//! polite close. Never silence.

mod orchestrator;
mod session;

pub use orchestrator::CallOrchestrator;
pub use session::{CallPolicy, CallSession, CallState, Prompts};
