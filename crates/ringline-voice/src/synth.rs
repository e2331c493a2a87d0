use crate::adapter::Synthesizer;
use crate::error::{Stage, VoiceError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum text input size for synthesis (64 KiB). Prevents resource
/// exhaustion from oversized requests.
const MAX_SYNTH_INPUT_BYTES: usize = 64 * 1024;

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Configuration for the speech synthesis service.
#[derive(Debug, Clone)]
pub struct SynthConfig {
    /// Path to the piper binary. Empty disables piper and goes straight to
    /// the espeak-ng fallback.
    pub piper_binary: PathBuf,
    /// Path to the piper voice model (.onnx).
    pub voice_model: PathBuf,
    /// Speech speed multiplier (1.0 is normal).
    pub speed: f32,
    /// Path to the espeak-ng binary used as fallback.
    pub espeak_binary: PathBuf,
    /// Per-call timeout for the synthesis process.
    pub timeout: Duration,
}

impl SynthConfig {
    pub fn new(piper_binary: impl Into<PathBuf>, voice_model: impl Into<PathBuf>) -> Self {
        Self {
            piper_binary: piper_binary.into(),
            voice_model: voice_model.into(),
            speed: 1.0,
            espeak_binary: PathBuf::from("espeak-ng"),
            timeout: default_timeout(),
        }
    }
}

/// Speech synthesis via a piper subprocess, with espeak-ng as fallback.
#[derive(Debug, Clone)]
pub struct SynthService {
    config: SynthConfig,
}

impl SynthService {
    pub fn new(config: SynthConfig) -> Self {
        Self { config }
    }

    async fn synthesize_piper(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        if self.config.speed < 0.1 || self.config.speed > 10.0 {
            return Err(VoiceError::Synthesis(
                "speed must be between 0.1 and 10.0".to_string(),
            ));
        }

        let mut command = Command::new(&self.config.piper_binary);
        command
            .arg("--model")
            .arg(&self.config.voice_model)
            .arg("--output_raw")
            // Length scale is roughly the inverse of speed: 2.0x speed
            // means half the length.
            .arg("--length_scale")
            .arg((1.0 / self.config.speed).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Synthesis(format!("failed to spawn piper: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Synthesis("failed to open stdin".to_string()))?;
        let text_owned = text.to_string();

        // Write on a separate task so a full output buffer cannot deadlock
        // against an unread stdin.
        let write_task = tokio::spawn(async move { stdin.write_all(text_owned.as_bytes()).await });

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout {
                stage: Stage::Synthesis,
                seconds: self.config.timeout.as_secs(),
            })?
            .map_err(|e| VoiceError::Synthesis(format!("failed to wait for piper: {}", e)))?;

        match write_task.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(VoiceError::Synthesis(format!(
                    "failed to write to piper stdin: {}",
                    e
                )))
            }
            Err(e) => return Err(VoiceError::Synthesis(format!("stdin task failed: {}", e))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Synthesis(format!("piper failed: {}", stderr)));
        }

        Ok(output.stdout)
    }

    /// espeak-ng writes WAV to stdout via `--stdout`; the 44-byte header is
    /// stripped to return raw PCM like the piper path.
    async fn synthesize_espeak(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        let mut command = Command::new(&self.config.espeak_binary);
        command
            .arg("--stdout")
            .arg(text)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command
            .spawn()
            .map_err(|e| VoiceError::Synthesis(format!("failed to spawn espeak-ng: {}", e)))?;

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout {
                stage: Stage::Synthesis,
                seconds: self.config.timeout.as_secs(),
            })?
            .map_err(|e| VoiceError::Synthesis(format!("failed to wait for espeak-ng: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Synthesis(format!(
                "espeak-ng failed: {}",
                stderr
            )));
        }

        let wav_data = output.stdout;
        if wav_data.len() > 44 {
            Ok(wav_data[44..].to_vec())
        } else {
            Ok(wav_data)
        }
    }

    fn piper_available(&self) -> bool {
        !self.config.piper_binary.as_os_str().is_empty() && self.config.voice_model.exists()
    }
}

#[async_trait]
impl Synthesizer for SynthService {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        if text.len() > MAX_SYNTH_INPUT_BYTES {
            return Err(VoiceError::Synthesis(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_SYNTH_INPUT_BYTES
            )));
        }
        if text.trim().is_empty() {
            return Err(VoiceError::Synthesis("empty text".to_string()));
        }

        if self.piper_available() {
            match self.synthesize_piper(text).await {
                Ok(audio) => return Ok(audio),
                Err(e) => {
                    tracing::warn!(error = %e, "piper synthesis failed, trying espeak-ng");
                }
            }
        }

        self.synthesize_espeak(text).await
    }
}
