//! Ringline server binary — outbound patient calls with a spoken AI agent.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, the call orchestrator, background reapers, and graceful
//! shutdown on SIGTERM/SIGINT.

use ringline_artifacts::ArtifactStore;
use ringline_calls::{CallOrchestrator, CallPolicy, Prompts};
use ringline_server::telephony::{RecordingFetcher, TelephonyClient, TelephonyConfig};
use ringline_server::twiml::TwimlRenderer;
use ringline_server::{app, background, config, AppState};
use ringline_types::ArtifactKind;
use ringline_voice::{GeneratorConfig, GeneratorService, SttConfig, SttService, SynthConfig, SynthService};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("RINGLINE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Builds the fixed prompt set, with config overrides where present.
fn build_prompts(call: &config::CallConfig) -> Prompts {
    let mut prompts = Prompts::default();
    if !call.greeting.is_empty() {
        prompts.greeting = call.greeting.clone();
    }
    if !call.reprompt.is_empty() {
        prompts.reprompt = call.reprompt.clone();
    }
    if !call.fallback.is_empty() {
        prompts.fallback = call.fallback.clone();
    }
    if !call.closing.is_empty() {
        prompts.closing = call.closing.clone();
    }
    if !call.call_back_later.is_empty() {
        prompts.call_back_later = call.call_back_later.clone();
    }
    prompts
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = ringline_db::create_pool(
        &config.database.path,
        ringline_db::DbSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = ringline_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Artifact store, plus the optional pre-recorded last-resort audio.
    let artifacts = Arc::new(
        ArtifactStore::new(
            &config.artifacts.dir,
            Duration::from_secs(config.artifacts.retention_secs),
        )
        .expect("failed to open artifact store — check artifacts.dir in config"),
    );

    let unavailable_artifact_id = if config.artifacts.fallback_audio_path.is_empty() {
        None
    } else {
        match std::fs::read(&config.artifacts.fallback_audio_path) {
            Ok(bytes) => match artifacts.create_pinned(ArtifactKind::SynthesizedReply, &bytes) {
                Ok(artifact) => {
                    tracing::info!(
                        path = %config.artifacts.fallback_audio_path,
                        artifact_id = %artifact.artifact_id,
                        "loaded pre-recorded fallback audio"
                    );
                    Some(artifact.artifact_id)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to pin fallback audio, continuing without");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(
                    path = %config.artifacts.fallback_audio_path,
                    error = %e,
                    "failed to read fallback audio, continuing without"
                );
                None
            }
        }
    };

    // Speech adapters
    let mut stt_config = SttConfig::new(&config.stt.binary_path, &config.stt.model_path);
    stt_config.timeout = Duration::from_secs(config.stt.timeout_secs);
    let transcriber = Arc::new(SttService::new(stt_config));

    let mut synth_config = SynthConfig::new(&config.tts.piper_binary, &config.tts.voice_model);
    synth_config.speed = config.tts.speed;
    synth_config.espeak_binary = config.tts.espeak_binary.clone().into();
    synth_config.timeout = Duration::from_secs(config.tts.timeout_secs);
    let synthesizer = Arc::new(SynthService::new(synth_config));

    let api_key = (!config.generator.api_key.is_empty()).then(|| config.generator.api_key.clone());
    if api_key.is_none() {
        tracing::warn!("no generator API key configured, replies will be canned");
    }
    let mut generator_config = GeneratorConfig::new(
        &config.generator.base_url,
        api_key,
        &config.generator.model,
        &config.generator.system_prompt,
    );
    generator_config.timeout = Duration::from_secs(config.generator.timeout_secs);
    let responder = Arc::new(GeneratorService::new(generator_config));

    // Orchestrator
    let policy = CallPolicy {
        max_turns: config.call.max_turns,
        idle_timeout: Duration::from_secs(config.call.idle_timeout_secs),
    };
    let orchestrator = Arc::new(CallOrchestrator::new(
        transcriber,
        responder,
        synthesizer,
        artifacts.clone(),
        pool.clone(),
        policy,
        build_prompts(&config.call),
        unavailable_artifact_id,
    ));

    // Telephony provider
    let telephony = Arc::new(TelephonyClient::new(TelephonyConfig {
        api_base: config.telephony.api_base.clone(),
        account_sid: config.telephony.account_sid.clone(),
        auth_token: config.telephony.auth_token.clone(),
        from_number: config.telephony.from_number.clone(),
    }));
    if !telephony.is_configured() {
        tracing::warn!("telephony credentials not configured, outbound dispatch is disabled");
    }
    let recordings = Arc::new(RecordingFetcher::new(
        config.telephony.account_sid.clone(),
        config.telephony.auth_token.clone(),
    ));

    // Background reapers
    tokio::spawn(background::start_idle_reaper(
        orchestrator.clone(),
        config.call.reap_interval_secs,
    ));
    tokio::spawn(background::start_artifact_reaper(
        artifacts.clone(),
        config.artifacts.reap_interval_secs,
    ));

    // Build application
    let state = AppState {
        pool,
        artifacts: artifacts.clone(),
        orchestrator,
        telephony,
        recordings,
        twiml: Arc::new(TwimlRenderer::new(
            config.server.public_url.clone(),
            config.telephony.record_max_seconds,
        )),
        public_url: config.server.public_url.clone(),
    };
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, public_url = %config.server.public_url, "starting ringline server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Transient audio does not outlive the process.
    let purged = artifacts.purge();
    if purged > 0 {
        tracing::info!(count = purged, "purged transient audio artifacts");
    }

    tracing::info!("ringline server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
