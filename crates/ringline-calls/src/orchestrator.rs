use crate::session::{CallPolicy, CallSession, CallState, Prompts};
use ringline_artifacts::ArtifactStore;
use ringline_db::DbPool;
use ringline_types::{ArtifactKind, Speaker, TelephonyAction, TelephonyInstruction, Turn};
use ringline_voice::{Responder, Synthesizer, Transcriber};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// One session table entry.
///
/// The outer table lock only guards insert/lookup/evict; the per-call
/// `tokio::sync::Mutex` serializes event processing for that call, and the
/// watch channel lets `on_call_ended` cancel an in-flight pipeline without
/// waiting for the session lock.
struct CallHandle {
    session: tokio::sync::Mutex<CallSession>,
    hangup_tx: watch::Sender<bool>,
}

impl CallHandle {
    fn new(call_sid: &str) -> Arc<Self> {
        Arc::new(Self {
            session: tokio::sync::Mutex::new(CallSession::new(call_sid)),
            hangup_tx: watch::Sender::new(false),
        })
    }
}

/// Result of one Processing run.
enum PipelineOutcome {
    /// The caller said nothing usable (or a stage failed before any caller
    /// text existed). Speak `text` and record again; nothing is counted or
    /// logged.
    Reprompt { text: String },
    /// A full exchange to commit.
    Exchange {
        caller_text: String,
        agent_text: String,
        /// Synthesized reply audio, when synthesis succeeded.
        artifact_id: Option<String>,
        /// Generator signaled the conversation should conclude.
        close: bool,
        /// Both synthesis attempts failed and the pre-recorded last-resort
        /// audio is being played; the call must end after it.
        unavailable: bool,
    },
}

/// Maps telephony lifecycle events onto per-call session transitions.
///
/// Calls are fully isolated: each `call_sid` owns one session, events for
/// the same call are processed one at a time, and events for different
/// calls proceed in parallel.
pub struct CallOrchestrator {
    sessions: Mutex<HashMap<String, Arc<CallHandle>>>,
    transcriber: Arc<dyn Transcriber>,
    responder: Arc<dyn Responder>,
    synthesizer: Arc<dyn Synthesizer>,
    artifacts: Arc<ArtifactStore>,
    pool: DbPool,
    policy: CallPolicy,
    prompts: Prompts,
    /// Pinned artifact played when even fallback synthesis fails.
    unavailable_artifact_id: Option<String>,
}

impl CallOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        responder: Arc<dyn Responder>,
        synthesizer: Arc<dyn Synthesizer>,
        artifacts: Arc<ArtifactStore>,
        pool: DbPool,
        policy: CallPolicy,
        prompts: Prompts,
        unavailable_artifact_id: Option<String>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            transcriber,
            responder,
            synthesizer,
            artifacts,
            pool,
            policy,
            prompts,
            unavailable_artifact_id,
        }
    }

    /// Number of live sessions, for observability.
    pub fn active_sessions(&self) -> usize {
        self.lock_table().len()
    }

    /// True when a live session exists for `call_sid`. The webhook layer
    /// uses this to tell a brand-new call from a no-input re-entry.
    pub fn has_session(&self, call_sid: &str) -> bool {
        self.lock_table().contains_key(call_sid)
    }

    /// Handles a call-answered event: creates the session and emits the
    /// greeting.
    ///
    /// An answered event for a call that is already active should not
    /// happen under correct telephony behavior; it is logged and the
    /// session is reset rather than treated as fatal.
    pub async fn on_call_answered(&self, call_sid: &str) -> TelephonyInstruction {
        let handle = CallHandle::new(call_sid);
        let previous = self
            .lock_table()
            .insert(call_sid.to_string(), handle.clone());

        if let Some(previous) = previous {
            tracing::warn!(call_sid, "duplicate answered event, resetting session");
            let _ = previous.hangup_tx.send(true);
            self.artifacts.release(call_sid);
        }

        let mut session = handle.session.lock().await;
        session.state = CallState::Greeting;
        session.push_agent(&self.prompts.greeting);
        session.state = CallState::AwaitingRecording;
        session.touch();

        tracing::info!(call_sid, "call answered, greeting emitted");
        TelephonyInstruction::say_and_record(&self.prompts.greeting)
    }

    /// Handles a recording-ready event: runs the pipeline and emits the
    /// next instruction.
    ///
    /// Unknown calls (expired, never answered, or already ended) get a safe
    /// hangup instruction — never an error.
    pub async fn on_recording_ready(
        &self,
        call_sid: &str,
        artifact_id: &str,
    ) -> TelephonyInstruction {
        let Some(handle) = self.get_handle(call_sid) else {
            tracing::warn!(call_sid, "recording event for unknown call, hanging up");
            return TelephonyInstruction::hangup();
        };

        let mut session = handle.session.lock().await;
        if session.state == CallState::Ended {
            tracing::warn!(call_sid, "recording event for ended call, hanging up");
            return TelephonyInstruction::hangup();
        }

        session.state = CallState::Processing;
        session.touch();
        let history = session.history.clone();

        // The pipeline is the only place the caller can be left waiting on
        // external I/O, so it is the only place hangup cancellation races
        // it. A hangup abandons the in-flight adapter call; whatever it
        // eventually produces is left for the artifact reaper.
        let mut hangup_rx = handle.hangup_tx.subscribe();
        let outcome = tokio::select! {
            outcome = self.run_pipeline(call_sid, artifact_id, history) => outcome,
            _ = hangup_rx.wait_for(|ended| *ended) => {
                tracing::info!(call_sid, "call ended mid-pipeline, abandoning");
                return TelephonyInstruction::hangup();
            }
        };

        session.state = CallState::Responding;

        match outcome {
            PipelineOutcome::Reprompt { text } => {
                session.state = CallState::AwaitingRecording;
                session.touch();
                let instruction = TelephonyInstruction::say_and_record(text);
                self.artifacts
                    .mark_in_use(call_sid, &instruction.artifact_ids());
                instruction
            }
            PipelineOutcome::Exchange {
                caller_text,
                agent_text,
                artifact_id,
                close,
                unavailable,
            } => {
                let turn = session.commit_exchange(&caller_text, &agent_text);
                session.touch();

                self.log_turn(call_sid, turn, Speaker::Caller, &caller_text, None)
                    .await;
                self.log_turn(
                    call_sid,
                    turn,
                    Speaker::Agent,
                    &agent_text,
                    artifact_id.as_deref(),
                )
                .await;

                // Max-turn policy closes the conversation even when the
                // generator wanted to continue.
                let turn_limit_reached = session.turn_number >= self.policy.max_turns;

                let mut actions = vec![match (&artifact_id, &self.unavailable_artifact_id) {
                    (Some(id), _) => TelephonyAction::Play {
                        artifact_id: id.clone(),
                    },
                    (None, Some(pinned)) if unavailable => TelephonyAction::Play {
                        artifact_id: pinned.clone(),
                    },
                    _ => TelephonyAction::Say {
                        text: agent_text.clone(),
                    },
                }];

                if close || turn_limit_reached || unavailable {
                    if turn_limit_reached && !close && !unavailable {
                        tracing::info!(call_sid, "turn limit reached, closing conversation");
                        actions.push(TelephonyAction::Say {
                            text: self.prompts.closing.clone(),
                        });
                    }
                    actions.push(TelephonyAction::Hangup);

                    session.state = CallState::Ended;
                    drop(session);
                    self.evict(call_sid);
                    tracing::info!(call_sid, "conversation closed");
                } else {
                    actions.push(TelephonyAction::Record);
                    session.state = CallState::AwaitingRecording;
                }

                let instruction = TelephonyInstruction::new(actions);
                if !instruction.is_terminal() {
                    self.artifacts
                        .mark_in_use(call_sid, &instruction.artifact_ids());
                }
                instruction
            }
        }
    }

    /// Handles a record-timeout: the caller stayed silent. Re-prompts
    /// without counting a turn.
    pub async fn on_recording_timeout(&self, call_sid: &str) -> TelephonyInstruction {
        let Some(handle) = self.get_handle(call_sid) else {
            tracing::warn!(call_sid, "timeout event for unknown call, hanging up");
            return TelephonyInstruction::hangup();
        };

        let mut session = handle.session.lock().await;
        if session.state == CallState::Ended {
            return TelephonyInstruction::hangup();
        }

        session.touch();
        tracing::debug!(call_sid, "no caller input, re-prompting");
        let instruction = TelephonyInstruction::say_and_record(&self.prompts.reprompt);
        self.artifacts
            .mark_in_use(call_sid, &instruction.artifact_ids());
        instruction
    }

    /// Handles call termination: cancels in-flight work, marks the session
    /// ended, releases its artifacts, and evicts it.
    pub async fn on_call_ended(&self, call_sid: &str) {
        let Some(handle) = self.lock_table().remove(call_sid) else {
            tracing::debug!(call_sid, "ended event for unknown call, ignoring");
            return;
        };

        // Signal before taking the session lock so an in-flight pipeline
        // aborts instead of being waited out.
        let _ = handle.hangup_tx.send(true);

        let mut session = handle.session.lock().await;
        session.state = CallState::Ended;
        self.artifacts.release(call_sid);
        tracing::info!(call_sid, turns = session.turn_number, "call ended");
    }

    /// Force-closes sessions idle past the configured threshold. Returns
    /// the call SIDs that were reaped. A later event for a reaped call
    /// starts a fresh session.
    pub async fn reap_idle(&self) -> Vec<String> {
        let candidates: Vec<(String, Arc<CallHandle>)> = self
            .lock_table()
            .iter()
            .map(|(sid, handle)| (sid.clone(), handle.clone()))
            .collect();

        let mut reaped = Vec::new();
        for (call_sid, handle) in candidates {
            // A locked session is mid-event, which is activity by
            // definition.
            let idle = match handle.session.try_lock() {
                Ok(session) => {
                    session.state != CallState::Ended
                        && session.idle_for() >= self.policy.idle_timeout
                }
                Err(_) => false,
            };
            if !idle {
                continue;
            }

            tracing::warn!(call_sid = %call_sid, reason = "idle_timeout", "force closing session");
            self.lock_table().remove(&call_sid);
            let _ = handle.hangup_tx.send(true);
            let mut session = handle.session.lock().await;
            session.state = CallState::Ended;
            self.artifacts.release(&call_sid);
            reaped.push(call_sid);
        }
        reaped
    }

    /// Runs transcribe → generate → synthesize for one recording.
    ///
    /// All adapter failures are absorbed here into the fallback policy;
    /// this function cannot fail.
    async fn run_pipeline(
        &self,
        call_sid: &str,
        artifact_id: &str,
        history: Vec<Turn>,
    ) -> PipelineOutcome {
        // Stage 0: fetch the recording bytes.
        let audio = match self.artifacts.retrieve(artifact_id) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(call_sid, artifact_id, error = %e, "recording unavailable");
                return PipelineOutcome::Reprompt {
                    text: self.prompts.reprompt.clone(),
                };
            }
        };

        // Stage 1: transcription. Empty text is the caller saying nothing:
        // clarify without burning a turn and without invoking the
        // generator.
        let caller_text = match self.transcriber.transcribe(&audio).await {
            Ok(text) if text.trim().is_empty() => {
                tracing::debug!(call_sid, "empty transcript, asking caller to repeat");
                return PipelineOutcome::Reprompt {
                    text: self.prompts.reprompt.clone(),
                };
            }
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(call_sid, stage = %e.stage(), error = %e, "transcription failed");
                return PipelineOutcome::Reprompt {
                    text: self.prompts.fallback.clone(),
                };
            }
        };

        // Stage 2: generation, over the full accumulated history.
        let (mut agent_text, close) = match self.responder.respond(&history, &caller_text).await {
            Ok(reply) => (reply.text, reply.should_close),
            Err(e) => {
                tracing::warn!(call_sid, stage = %e.stage(), error = %e, "generation failed");
                (self.prompts.fallback.clone(), false)
            }
        };

        // Stage 3: synthesis. On failure, retry once with the fixed
        // fallback utterance; if that fails too the pre-recorded
        // last-resort audio takes over. A closing reply is exempt from the
        // substitution: its text is still spoken via Say before hangup.
        let mut unavailable = false;
        let audio_artifact = match self.synthesize_to_artifact(call_sid, &agent_text).await {
            Some(id) => Some(id),
            None if !close && agent_text != self.prompts.fallback => {
                agent_text = self.prompts.fallback.clone();
                self.synthesize_to_artifact(call_sid, &agent_text).await
            }
            None => None,
        };

        if audio_artifact.is_none() && !close && self.unavailable_artifact_id.is_some() {
            agent_text = self.prompts.call_back_later.clone();
            unavailable = true;
        }

        PipelineOutcome::Exchange {
            caller_text,
            agent_text,
            artifact_id: audio_artifact,
            close,
            unavailable,
        }
    }

    /// Synthesizes `text` and stores the audio, returning the artifact ID.
    /// Returns `None` on any synthesis or storage failure.
    async fn synthesize_to_artifact(&self, call_sid: &str, text: &str) -> Option<String> {
        match self.synthesizer.synthesize(text).await {
            Ok(audio) => match self.artifacts.create(ArtifactKind::SynthesizedReply, &audio) {
                Ok(artifact) => Some(artifact.artifact_id),
                Err(e) => {
                    tracing::warn!(call_sid, error = %e, "failed to store synthesized reply");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(call_sid, stage = %e.stage(), error = %e, "synthesis failed");
                None
            }
        }
    }

    /// Writes one conversation-log row. Log failures are warnings: the
    /// durable transcript must never block or fail the live call.
    async fn log_turn(
        &self,
        call_sid: &str,
        turn_number: u32,
        speaker: Speaker,
        text: &str,
        artifact_id: Option<&str>,
    ) {
        let pool = self.pool.clone();
        let call_sid = call_sid.to_string();
        let text = text.to_string();
        let artifact_id = artifact_id.map(str::to_string);

        let result = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            ringline_records::append_turn(
                &conn,
                &call_sid,
                turn_number,
                speaker,
                &text,
                artifact_id.as_deref(),
            )
            .map_err(|e| e.to_string())
        })
        .await;

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!(turn_number, error = %e, "conversation log write failed");
            }
            Err(e) => {
                tracing::warn!(turn_number, error = %e, "conversation log task failed");
            }
        }
    }

    fn get_handle(&self, call_sid: &str) -> Option<Arc<CallHandle>> {
        self.lock_table().get(call_sid).cloned()
    }

    fn evict(&self, call_sid: &str) {
        self.lock_table().remove(call_sid);
        self.artifacts.release(call_sid);
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<String, Arc<CallHandle>>> {
        // Held only for map operations, never across an await.
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("session table lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
