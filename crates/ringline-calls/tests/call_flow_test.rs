//! End-to-end call flow tests against mock adapters.

use async_trait::async_trait;
use ringline_artifacts::ArtifactStore;
use ringline_calls::{CallOrchestrator, CallPolicy, Prompts};
use ringline_db::{create_pool, run_migrations, DbPool, DbSettings};
use ringline_records::read_history;
use ringline_types::{ArtifactKind, Reply, Speaker, TelephonyAction, Turn};
use ringline_voice::{Responder, Synthesizer, Transcriber, VoiceError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct MockTranscriber {
    script: Mutex<VecDeque<Result<String, VoiceError>>>,
    default: String,
}

impl MockTranscriber {
    fn always(text: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            default: text.to_string(),
        })
    }

    fn scripted(script: Vec<Result<String, VoiceError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            default: String::new(),
        })
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String, VoiceError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default.clone()))
    }
}

/// Transcriber that never completes in test time; used to race hangups.
struct SlowTranscriber;

#[async_trait]
impl Transcriber for SlowTranscriber {
    async fn transcribe(&self, _audio: &[u8]) -> Result<String, VoiceError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".to_string())
    }
}

struct MockResponder {
    script: Mutex<VecDeque<Result<Reply, VoiceError>>>,
    default: Reply,
    calls: AtomicUsize,
}

impl MockResponder {
    fn always(text: &str, should_close: bool) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            default: Reply {
                text: text.to_string(),
                should_close,
            },
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(
                vec![Err(VoiceError::Generation("backend down".into()))].into(),
            ),
            default: Reply {
                text: "unreachable".to_string(),
                should_close: false,
            },
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Responder for MockResponder {
    async fn respond(&self, _history: &[Turn], _latest: &str) -> Result<Reply, VoiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default.clone()))
    }
}

struct MockSynthesizer {
    fail: bool,
}

impl MockSynthesizer {
    fn working() -> Arc<Self> {
        Arc::new(Self { fail: false })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self { fail: true })
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        if self.fail {
            Err(VoiceError::Synthesis("no voice model".into()))
        } else {
            Ok(format!("pcm:{text}").into_bytes())
        }
    }
}

struct Rig {
    orchestrator: Arc<CallOrchestrator>,
    artifacts: Arc<ArtifactStore>,
    pool: DbPool,
    _dir: tempfile::TempDir,
}

impl Rig {
    fn new(
        transcriber: Arc<dyn Transcriber>,
        responder: Arc<dyn Responder>,
        synthesizer: Arc<dyn Synthesizer>,
        policy: CallPolicy,
        artifact_retention: Duration,
        with_unavailable_audio: bool,
    ) -> Self {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let db_path = dir.path().join("calls.db");
        let pool = create_pool(db_path.to_str().unwrap(), DbSettings::default())
            .expect("should create pool");
        {
            let conn = pool.get().expect("should get connection");
            run_migrations(&conn).expect("migrations should succeed");
        }

        let artifacts = Arc::new(
            ArtifactStore::new(dir.path().join("artifacts"), artifact_retention)
                .expect("should open artifact store"),
        );

        let unavailable_artifact_id = if with_unavailable_audio {
            Some(
                artifacts
                    .create_pinned(ArtifactKind::SynthesizedReply, b"call back later audio")
                    .expect("should pin fallback audio")
                    .artifact_id,
            )
        } else {
            None
        };

        let orchestrator = Arc::new(CallOrchestrator::new(
            transcriber,
            responder,
            synthesizer,
            artifacts.clone(),
            pool.clone(),
            policy,
            Prompts::default(),
            unavailable_artifact_id,
        ));

        Self {
            orchestrator,
            artifacts,
            pool,
            _dir: dir,
        }
    }

    fn defaults(transcript: &str, reply: &str) -> Self {
        Self::new(
            MockTranscriber::always(transcript),
            MockResponder::always(reply, false),
            MockSynthesizer::working(),
            CallPolicy::default(),
            Duration::from_secs(300),
            false,
        )
    }

    /// Registers fake caller audio and returns its artifact ID.
    fn recording(&self) -> String {
        self.artifacts
            .create(ArtifactKind::IncomingRecording, b"caller audio")
            .expect("should store recording")
            .artifact_id
    }

    fn history(&self, call_sid: &str) -> Vec<ringline_records::ConversationTurn> {
        let conn = self.pool.get().expect("should get connection");
        read_history(&conn, call_sid).expect("should read history")
    }
}

#[tokio::test]
async fn answered_call_gets_greeting_then_record() {
    let rig = Rig::defaults("hello", "hi there");

    let instruction = rig.orchestrator.on_call_answered("C1").await;
    match &instruction.actions[..] {
        [TelephonyAction::Say { text }, TelephonyAction::Record] => {
            assert!(!text.is_empty(), "greeting must not be empty");
        }
        other => panic!("expected Say + Record, got {other:?}"),
    }
}

#[tokio::test]
async fn first_exchange_logs_turn_zero_and_plays_reply() {
    let rig = Rig::defaults("I need to reschedule", "Sure, what day works?");

    rig.orchestrator.on_call_answered("C1").await;
    let recording = rig.recording();
    let instruction = rig.orchestrator.on_recording_ready("C1", &recording).await;

    let reply_artifact = match &instruction.actions[..] {
        [TelephonyAction::Play { artifact_id }, TelephonyAction::Record] => artifact_id.clone(),
        other => panic!("expected Play + Record, got {other:?}"),
    };

    let audio = rig
        .artifacts
        .retrieve(&reply_artifact)
        .expect("reply audio should be retrievable");
    assert_eq!(audio, b"pcm:Sure, what day works?");

    let history = rig.history("C1");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].turn_number, 0);
    assert_eq!(history[0].speaker, Speaker::Caller);
    assert_eq!(history[0].text, "I need to reschedule");
    assert_eq!(history[1].turn_number, 0);
    assert_eq!(history[1].speaker, Speaker::Agent);
    assert_eq!(history[1].text, "Sure, what day works?");
    assert_eq!(history[1].artifact_id.as_deref(), Some(reply_artifact.as_str()));
}

#[tokio::test]
async fn turn_numbers_increment_once_per_exchange() {
    let rig = Rig::defaults("yes", "noted");

    rig.orchestrator.on_call_answered("C1").await;
    for _ in 0..3 {
        let recording = rig.recording();
        rig.orchestrator.on_recording_ready("C1", &recording).await;
    }

    let turns: Vec<(u32, Speaker)> = rig
        .history("C1")
        .iter()
        .map(|t| (t.turn_number, t.speaker))
        .collect();
    assert_eq!(
        turns,
        vec![
            (0, Speaker::Caller),
            (0, Speaker::Agent),
            (1, Speaker::Caller),
            (1, Speaker::Agent),
            (2, Speaker::Caller),
            (2, Speaker::Agent),
        ]
    );
}

#[tokio::test]
async fn empty_transcript_reprompts_without_invoking_generator() {
    let responder = MockResponder::always("should not be used", false);
    let rig = Rig::new(
        MockTranscriber::scripted(vec![Ok(String::new()), Ok("yes, Tuesday".to_string())]),
        responder.clone(),
        MockSynthesizer::working(),
        CallPolicy::default(),
        Duration::from_secs(300),
        false,
    );

    rig.orchestrator.on_call_answered("C1").await;

    let recording = rig.recording();
    let instruction = rig.orchestrator.on_recording_ready("C1", &recording).await;
    match &instruction.actions[..] {
        [TelephonyAction::Say { text }, TelephonyAction::Record] => {
            assert!(text.contains("didn't catch"), "expected clarification");
        }
        other => panic!("expected Say + Record, got {other:?}"),
    }
    assert_eq!(responder.call_count(), 0, "generator must not run on silence");
    assert!(rig.history("C1").is_empty(), "re-prompt is not logged");

    // The silent round did not consume a turn: the next exchange is turn 0.
    let recording = rig.recording();
    rig.orchestrator.on_recording_ready("C1", &recording).await;
    let history = rig.history("C1");
    assert_eq!(history[0].turn_number, 0);
    assert_eq!(history[0].text, "yes, Tuesday");
}

#[tokio::test]
async fn generator_failure_speaks_and_logs_fallback() {
    let rig = Rig::new(
        MockTranscriber::always("I have a question"),
        MockResponder::failing(),
        MockSynthesizer::working(),
        CallPolicy::default(),
        Duration::from_secs(300),
        false,
    );

    rig.orchestrator.on_call_answered("C1").await;
    let recording = rig.recording();
    let instruction = rig.orchestrator.on_recording_ready("C1", &recording).await;

    // The fallback is synthesized and played like any reply.
    match &instruction.actions[..] {
        [TelephonyAction::Play { .. }, TelephonyAction::Record] => {}
        other => panic!("expected Play + Record, got {other:?}"),
    }

    let history = rig.history("C1");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].speaker, Speaker::Agent);
    assert_eq!(history[1].text, Prompts::default().fallback);
    assert!(!history[1].text.is_empty());
}

#[tokio::test]
async fn transcription_failure_reprompts_with_apology() {
    let responder = MockResponder::always("unused", false);
    let rig = Rig::new(
        MockTranscriber::scripted(vec![Err(VoiceError::Stt("decoder crashed".into()))]),
        responder.clone(),
        MockSynthesizer::working(),
        CallPolicy::default(),
        Duration::from_secs(300),
        false,
    );

    rig.orchestrator.on_call_answered("C1").await;
    let recording = rig.recording();
    let instruction = rig.orchestrator.on_recording_ready("C1", &recording).await;

    match &instruction.actions[..] {
        [TelephonyAction::Say { text }, TelephonyAction::Record] => {
            assert_eq!(text, &Prompts::default().fallback);
        }
        other => panic!("expected Say + Record, got {other:?}"),
    }
    assert_eq!(responder.call_count(), 0);
    assert!(rig.history("C1").is_empty(), "no caller text, nothing to log");
}

#[tokio::test]
async fn recording_event_for_unknown_call_hangs_up() {
    let rig = Rig::defaults("hello", "hi");

    let instruction = rig.orchestrator.on_recording_ready("C404", "rec1").await;
    assert_eq!(instruction.actions, vec![TelephonyAction::Hangup]);
}

#[tokio::test]
async fn duplicate_answered_event_resets_the_session() {
    let rig = Rig::defaults("hello", "hi");

    rig.orchestrator.on_call_answered("C1").await;
    let recording = rig.recording();
    rig.orchestrator.on_recording_ready("C1", &recording).await;

    // Second answered event for the same active call: reset, greet again.
    let instruction = rig.orchestrator.on_call_answered("C1").await;
    match &instruction.actions[..] {
        [TelephonyAction::Say { .. }, TelephonyAction::Record] => {}
        other => panic!("expected fresh greeting, got {other:?}"),
    }
    assert_eq!(rig.orchestrator.active_sessions(), 1);
}

#[tokio::test]
async fn generator_close_signal_ends_the_call() {
    let rig = Rig::new(
        MockTranscriber::always("Tuesday at nine works"),
        MockResponder::always("Perfect, see you Tuesday. Goodbye!", true),
        MockSynthesizer::working(),
        CallPolicy::default(),
        Duration::from_secs(300),
        false,
    );

    rig.orchestrator.on_call_answered("C1").await;
    let recording = rig.recording();
    let instruction = rig.orchestrator.on_recording_ready("C1", &recording).await;

    match &instruction.actions[..] {
        [TelephonyAction::Play { .. }, TelephonyAction::Hangup] => {}
        other => panic!("expected Play + Hangup, got {other:?}"),
    }

    // The session is gone; further events are unknown-call hangups.
    assert_eq!(rig.orchestrator.active_sessions(), 0);
    let late = rig.orchestrator.on_recording_ready("C1", "rec-late").await;
    assert_eq!(late.actions, vec![TelephonyAction::Hangup]);
}

#[tokio::test]
async fn turn_limit_closes_with_closing_utterance() {
    let policy = CallPolicy {
        max_turns: 1,
        ..CallPolicy::default()
    };
    let rig = Rig::new(
        MockTranscriber::always("okay"),
        MockResponder::always("Noted.", false),
        MockSynthesizer::working(),
        policy,
        Duration::from_secs(300),
        false,
    );

    rig.orchestrator.on_call_answered("C1").await;
    let recording = rig.recording();
    let instruction = rig.orchestrator.on_recording_ready("C1", &recording).await;

    match &instruction.actions[..] {
        [TelephonyAction::Play { .. }, TelephonyAction::Say { text }, TelephonyAction::Hangup] => {
            assert_eq!(text, &Prompts::default().closing);
        }
        other => panic!("expected Play + Say(closing) + Hangup, got {other:?}"),
    }
}

#[tokio::test]
async fn synthesis_failure_without_prerecorded_degrades_to_say() {
    let rig = Rig::new(
        MockTranscriber::always("hello?"),
        MockResponder::always("A reply that cannot be synthesized", false),
        MockSynthesizer::broken(),
        CallPolicy::default(),
        Duration::from_secs(300),
        false,
    );

    rig.orchestrator.on_call_answered("C1").await;
    let recording = rig.recording();
    let instruction = rig.orchestrator.on_recording_ready("C1", &recording).await;

    match &instruction.actions[..] {
        [TelephonyAction::Say { text }, TelephonyAction::Record] => {
            assert_eq!(text, &Prompts::default().fallback);
        }
        other => panic!("expected Say + Record, got {other:?}"),
    }

    let history = rig.history("C1");
    assert_eq!(history[1].text, Prompts::default().fallback);
    assert_eq!(history[1].artifact_id, None);
}

#[tokio::test]
async fn synthesis_failure_with_prerecorded_plays_it_and_hangs_up() {
    let rig = Rig::new(
        MockTranscriber::always("hello?"),
        MockResponder::always("A reply that cannot be synthesized", false),
        MockSynthesizer::broken(),
        CallPolicy::default(),
        Duration::from_secs(300),
        true,
    );

    rig.orchestrator.on_call_answered("C1").await;
    let recording = rig.recording();
    let instruction = rig.orchestrator.on_recording_ready("C1", &recording).await;

    match &instruction.actions[..] {
        [TelephonyAction::Play { artifact_id }, TelephonyAction::Hangup] => {
            let audio = rig.artifacts.retrieve(artifact_id).unwrap();
            assert_eq!(audio, b"call back later audio");
        }
        other => panic!("expected Play + Hangup, got {other:?}"),
    }
    assert_eq!(rig.orchestrator.active_sessions(), 0);
}

#[tokio::test]
async fn no_input_timeout_reprompts_without_counting_a_turn() {
    let rig = Rig::defaults("yes", "noted");

    rig.orchestrator.on_call_answered("C1").await;
    let instruction = rig.orchestrator.on_recording_timeout("C1").await;
    match &instruction.actions[..] {
        [TelephonyAction::Say { text }, TelephonyAction::Record] => {
            assert_eq!(text, &Prompts::default().reprompt);
        }
        other => panic!("expected Say + Record, got {other:?}"),
    }

    let recording = rig.recording();
    rig.orchestrator.on_recording_ready("C1", &recording).await;
    assert_eq!(rig.history("C1")[0].turn_number, 0);
}

#[tokio::test]
async fn idle_reaper_ends_sessions_exactly_once() {
    let policy = CallPolicy {
        idle_timeout: Duration::ZERO,
        ..CallPolicy::default()
    };
    let rig = Rig::new(
        MockTranscriber::always("yes"),
        MockResponder::always("noted", false),
        MockSynthesizer::working(),
        policy,
        Duration::from_secs(300),
        false,
    );

    rig.orchestrator.on_call_answered("C1").await;

    let reaped = rig.orchestrator.reap_idle().await;
    assert_eq!(reaped, vec!["C1".to_string()]);

    let reaped_again = rig.orchestrator.reap_idle().await;
    assert!(reaped_again.is_empty(), "a session is reaped at most once");

    // The next event starts over with a fresh session and turn counter.
    rig.orchestrator.on_call_answered("C1").await;
    let recording = rig.recording();
    rig.orchestrator.on_recording_ready("C1", &recording).await;
    assert_eq!(rig.history("C1")[0].turn_number, 0);
}

#[tokio::test]
async fn artifact_reaper_spares_the_last_emitted_instruction() {
    // Zero retention: everything is expired the moment it is created, so
    // only in-use tracking keeps the reply audio alive.
    let rig = Rig::new(
        MockTranscriber::always("yes"),
        MockResponder::always("noted", false),
        MockSynthesizer::working(),
        CallPolicy::default(),
        Duration::ZERO,
        false,
    );

    rig.orchestrator.on_call_answered("C1").await;
    let recording = rig.recording();
    let instruction = rig.orchestrator.on_recording_ready("C1", &recording).await;
    let reply_artifact = instruction.artifact_ids()[0].clone();

    rig.artifacts.reap();
    assert!(
        rig.artifacts.retrieve(&reply_artifact).is_ok(),
        "reply referenced by the live instruction must survive reaping"
    );

    rig.orchestrator.on_call_ended("C1").await;
    rig.artifacts.reap();
    assert!(
        rig.artifacts.retrieve(&reply_artifact).is_err(),
        "ended call's artifacts become reapable"
    );
}

#[tokio::test]
async fn hangup_cancels_an_inflight_pipeline() {
    let rig = Rig::new(
        Arc::new(SlowTranscriber),
        MockResponder::always("never spoken", false),
        MockSynthesizer::working(),
        CallPolicy::default(),
        Duration::from_secs(300),
        false,
    );

    rig.orchestrator.on_call_answered("C1").await;
    let recording = rig.recording();

    let orchestrator = rig.orchestrator.clone();
    let pipeline = tokio::spawn(async move {
        orchestrator.on_recording_ready("C1", &recording).await
    });

    // Let the pipeline reach the (stalled) transcriber, then hang up.
    tokio::time::sleep(Duration::from_millis(100)).await;
    rig.orchestrator.on_call_ended("C1").await;

    let instruction = pipeline.await.expect("pipeline task should not panic");
    assert_eq!(instruction.actions, vec![TelephonyAction::Hangup]);
    assert!(rig.history("C1").is_empty(), "abandoned work is not logged");
    assert_eq!(rig.orchestrator.active_sessions(), 0);
}
