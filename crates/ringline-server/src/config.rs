//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Conversation policy and fixed prompts.
    #[serde(default)]
    pub call: CallConfig,

    /// Audio artifact storage settings.
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    /// Transcription adapter settings.
    #[serde(default)]
    pub stt: SttSettings,

    /// Synthesis adapter settings.
    #[serde(default)]
    pub tts: TtsSettings,

    /// Response generator adapter settings.
    #[serde(default)]
    pub generator: GeneratorSettings,

    /// Telephony provider settings.
    #[serde(default)]
    pub telephony: TelephonySettings,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public base URL the telephony provider reaches this server at.
    /// Used to build webhook and audio URLs in rendered instructions.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "ringline_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Conversation policy and fixed prompts.
#[derive(Debug, Clone, Deserialize)]
pub struct CallConfig {
    /// Close the conversation after this many completed exchanges.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Force-close sessions idle for this many seconds.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How often the idle reaper scans sessions, in seconds.
    #[serde(default = "default_idle_reap_interval_secs")]
    pub reap_interval_secs: u64,

    /// Fixed greeting. Empty uses the built-in default.
    #[serde(default)]
    pub greeting: String,

    /// Re-prompt for silent or unintelligible input.
    #[serde(default)]
    pub reprompt: String,

    /// Apology spoken when a pipeline stage fails.
    #[serde(default)]
    pub fallback: String,

    /// Closing line appended when the turn limit ends the conversation.
    #[serde(default)]
    pub closing: String,

    /// Transcript text logged for the pre-recorded last-resort audio.
    /// Should match what `artifacts.fallback_audio_path` actually says.
    #[serde(default)]
    pub call_back_later: String,
}

/// Audio artifact storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory artifacts are written to.
    #[serde(default = "default_artifact_dir")]
    pub dir: String,

    /// Seconds an artifact stays retrievable after creation.
    #[serde(default = "default_artifact_retention_secs")]
    pub retention_secs: u64,

    /// How often the artifact reaper runs, in seconds.
    #[serde(default = "default_artifact_reap_interval_secs")]
    pub reap_interval_secs: u64,

    /// Optional pre-recorded "please call back later" audio, played when
    /// synthesis is entirely unavailable.
    #[serde(default)]
    pub fallback_audio_path: String,
}

/// Transcription adapter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SttSettings {
    /// Path to the whisper.cpp binary.
    #[serde(default = "default_stt_binary")]
    pub binary_path: String,

    /// Path to the GGML model file.
    #[serde(default = "default_stt_model")]
    pub model_path: String,

    /// Transcription timeout in seconds.
    #[serde(default = "default_stt_timeout_secs")]
    pub timeout_secs: u64,
}

/// Synthesis adapter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TtsSettings {
    /// Path to the piper binary. Empty goes straight to espeak-ng.
    #[serde(default)]
    pub piper_binary: String,

    /// Path to the piper voice model.
    #[serde(default)]
    pub voice_model: String,

    /// Speech speed multiplier.
    #[serde(default = "default_tts_speed")]
    pub speed: f32,

    /// Path to the espeak-ng fallback binary.
    #[serde(default = "default_espeak_binary")]
    pub espeak_binary: String,

    /// Synthesis timeout in seconds.
    #[serde(default = "default_tts_timeout_secs")]
    pub timeout_secs: u64,
}

/// Response generator adapter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorSettings {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_generator_base_url")]
    pub base_url: String,

    /// API key. Usually supplied via `RINGLINE_GENERATOR_API_KEY`.
    #[serde(default)]
    pub api_key: String,

    /// Model identifier.
    #[serde(default = "default_generator_model")]
    pub model: String,

    /// System prompt describing the agent's persona.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Generation timeout in seconds.
    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
}

/// Telephony provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TelephonySettings {
    /// Provider REST API base URL.
    #[serde(default = "default_telephony_api_base")]
    pub api_base: String,

    /// Account SID. Usually supplied via `RINGLINE_TELEPHONY_ACCOUNT_SID`.
    #[serde(default)]
    pub account_sid: String,

    /// Auth token. Usually supplied via `RINGLINE_TELEPHONY_AUTH_TOKEN`.
    #[serde(default)]
    pub auth_token: String,

    /// Caller ID for outbound calls.
    #[serde(default)]
    pub from_number: String,

    /// Maximum seconds of caller speech per recording.
    #[serde(default = "default_record_max_seconds")]
    pub record_max_seconds: u32,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_public_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_db_path() -> String {
    "ringline.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_turns() -> u32 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    120
}

fn default_idle_reap_interval_secs() -> u64 {
    30
}

fn default_artifact_dir() -> String {
    "audio".to_string()
}

fn default_artifact_retention_secs() -> u64 {
    900
}

fn default_artifact_reap_interval_secs() -> u64 {
    60
}

fn default_stt_binary() -> String {
    "whisper".to_string()
}

fn default_stt_model() -> String {
    "models/ggml-small.bin".to_string()
}

fn default_stt_timeout_secs() -> u64 {
    30
}

fn default_tts_speed() -> f32 {
    1.0
}

fn default_espeak_binary() -> String {
    "espeak-ng".to_string()
}

fn default_tts_timeout_secs() -> u64 {
    30
}

fn default_generator_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}

fn default_generator_model() -> String {
    "deepseek-chat".to_string()
}

fn default_system_prompt() -> String {
    "You are a friendly clinic assistant calling a patient to book an appointment. \
     Respond naturally in under 50 words. If the patient wants to book, ask for a \
     preferred date and time; once they give one, confirm it and end the call."
        .to_string()
}

fn default_generator_timeout_secs() -> u64 {
    20
}

fn default_telephony_api_base() -> String {
    "https://api.twilio.com".to_string()
}

fn default_record_max_seconds() -> u32 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reap_interval_secs: default_idle_reap_interval_secs(),
            greeting: String::new(),
            reprompt: String::new(),
            fallback: String::new(),
            closing: String::new(),
            call_back_later: String::new(),
        }
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
            retention_secs: default_artifact_retention_secs(),
            reap_interval_secs: default_artifact_reap_interval_secs(),
            fallback_audio_path: String::new(),
        }
    }
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            binary_path: default_stt_binary(),
            model_path: default_stt_model(),
            timeout_secs: default_stt_timeout_secs(),
        }
    }
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            piper_binary: String::new(),
            voice_model: String::new(),
            speed: default_tts_speed(),
            espeak_binary: default_espeak_binary(),
            timeout_secs: default_tts_timeout_secs(),
        }
    }
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            base_url: default_generator_base_url(),
            api_key: String::new(),
            model: default_generator_model(),
            system_prompt: default_system_prompt(),
            timeout_secs: default_generator_timeout_secs(),
        }
    }
}

impl Default for TelephonySettings {
    fn default() -> Self {
        Self {
            api_base: default_telephony_api_base(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            record_max_seconds: default_record_max_seconds(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `RINGLINE_HOST` overrides `server.host`
/// - `RINGLINE_PORT` overrides `server.port`
/// - `RINGLINE_PUBLIC_URL` overrides `server.public_url`
/// - `RINGLINE_DB_PATH` overrides `database.path`
/// - `RINGLINE_LOG_LEVEL` overrides `logging.level`
/// - `RINGLINE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `RINGLINE_GENERATOR_API_KEY` overrides `generator.api_key`
/// - `RINGLINE_TELEPHONY_ACCOUNT_SID` overrides `telephony.account_sid`
/// - `RINGLINE_TELEPHONY_AUTH_TOKEN` overrides `telephony.auth_token`
/// - `RINGLINE_TELEPHONY_FROM_NUMBER` overrides `telephony.from_number`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("RINGLINE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("RINGLINE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(url) = std::env::var("RINGLINE_PUBLIC_URL") {
        config.server.public_url = url;
    }
    if let Ok(db_path) = std::env::var("RINGLINE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("RINGLINE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("RINGLINE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(key) = std::env::var("RINGLINE_GENERATOR_API_KEY") {
        config.generator.api_key = key;
    }
    if let Ok(sid) = std::env::var("RINGLINE_TELEPHONY_ACCOUNT_SID") {
        config.telephony.account_sid = sid;
    }
    if let Ok(token) = std::env::var("RINGLINE_TELEPHONY_AUTH_TOKEN") {
        config.telephony.auth_token = token;
    }
    if let Ok(from) = std::env::var("RINGLINE_TELEPHONY_FROM_NUMBER") {
        config.telephony.from_number = from;
    }

    Ok(config)
}
