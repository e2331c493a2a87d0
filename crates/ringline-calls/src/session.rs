use ringline_types::{Speaker, Turn};
use std::time::{Duration, Instant};

/// Where a call session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Call just answered; greeting being emitted.
    Greeting,
    /// Waiting for the telephony layer to deliver the caller's recording.
    AwaitingRecording,
    /// Running the transcribe → generate → synthesize pipeline.
    Processing,
    /// Pipeline result ready; committing turns and emitting the response.
    Responding,
    /// Terminal. The session is evicted once this is set.
    Ended,
}

/// Conversation policy knobs.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    /// Close the conversation after this many completed exchanges.
    pub max_turns: u32,
    /// Force-close sessions with no activity for this long.
    pub idle_timeout: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            max_turns: 10,
            idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Fixed utterances spoken outside the generated conversation.
#[derive(Debug, Clone)]
pub struct Prompts {
    /// Spoken when the call is answered.
    pub greeting: String,
    /// Spoken when the caller said nothing intelligible; not a counted turn.
    pub reprompt: String,
    /// Spoken when a pipeline stage fails.
    pub fallback: String,
    /// Appended when the max-turn policy closes the conversation.
    pub closing: String,
    /// Transcript text for the pre-recorded last-resort audio.
    pub call_back_later: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            greeting: "Hello! This is your clinic calling. Are you available to schedule \
                       an appointment?"
                .to_string(),
            reprompt: "Sorry, I didn't catch that. Could you please repeat?".to_string(),
            fallback: "I'm sorry, I'm having a little trouble on my end. Could you say \
                       that again?"
                .to_string(),
            closing: "Thank you for your time. Goodbye.".to_string(),
            call_back_later: "We're sorry, we are unable to continue this call right now. \
                              Please call back later. Goodbye."
                .to_string(),
        }
    }
}

/// The state machine and transcript for one active phone call.
///
/// Owned exclusively by the orchestrator's session table; all mutation
/// happens under the per-call lock, so events for one call are strictly
/// serialized.
#[derive(Debug)]
pub struct CallSession {
    pub call_sid: String,
    pub state: CallState,
    /// Completed caller+agent exchanges. Re-prompts do not count.
    pub turn_number: u32,
    /// In-memory transcript, greeting first. `turn_number` equals
    /// `history.len() / 2` whenever an exchange has just completed.
    pub history: Vec<Turn>,
    pub created_at: Instant,
    pub last_activity_at: Instant,
}

impl CallSession {
    pub fn new(call_sid: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            call_sid: call_sid.into(),
            state: CallState::Greeting,
            turn_number: 0,
            history: Vec::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Records activity for idle-timeout purposes.
    pub fn touch(&mut self) {
        self.last_activity_at = Instant::now();
    }

    /// Seconds-resolution idleness check.
    pub fn idle_for(&self) -> Duration {
        self.last_activity_at.elapsed()
    }

    /// Appends the opening agent utterance.
    pub fn push_agent(&mut self, text: impl Into<String>) {
        self.history.push(Turn {
            speaker: Speaker::Agent,
            text: text.into(),
        });
    }

    /// Commits one completed exchange and advances the turn counter.
    /// Returns the turn number the exchange was recorded under.
    pub fn commit_exchange(&mut self, caller_text: &str, agent_text: &str) -> u32 {
        let turn = self.turn_number;
        self.history.push(Turn {
            speaker: Speaker::Caller,
            text: caller_text.to_string(),
        });
        self.history.push(Turn {
            speaker: Speaker::Agent,
            text: agent_text.to_string(),
        });
        self.turn_number += 1;
        turn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_counter_tracks_history_parity() {
        let mut session = CallSession::new("CA1");
        session.push_agent("greeting");
        assert_eq!(session.turn_number, 0);

        let turn = session.commit_exchange("hello", "hi there");
        assert_eq!(turn, 0);
        assert_eq!(session.turn_number, 1);
        assert_eq!(session.history.len() / 2, session.turn_number as usize);

        let turn = session.commit_exchange("question", "answer");
        assert_eq!(turn, 1);
        assert_eq!(session.turn_number, 2);
        assert_eq!(session.history.len() / 2, session.turn_number as usize);
    }

    #[test]
    fn new_session_starts_in_greeting() {
        let session = CallSession::new("CA1");
        assert_eq!(session.state, CallState::Greeting);
        assert_eq!(session.turn_number, 0);
        assert!(session.history.is_empty());
    }
}
