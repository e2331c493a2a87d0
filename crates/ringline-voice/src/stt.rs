use crate::adapter::Transcriber;
use crate::error::{Stage, VoiceError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Maximum audio input size for STT (10 MiB). Prevents OOM from oversized
/// recordings.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Configuration for the whisper.cpp transcription service.
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Path to the whisper.cpp binary.
    pub binary_path: PathBuf,
    /// Path to the GGML model file.
    pub model_path: PathBuf,
    /// Per-call timeout for the transcription process.
    pub timeout: Duration,
}

impl SttConfig {
    pub fn new(binary_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            model_path: model_path.into(),
            timeout: default_timeout(),
        }
    }
}

/// Transcription via a whisper.cpp subprocess reading audio from stdin.
#[derive(Debug, Clone)]
pub struct SttService {
    config: SttConfig,
}

impl SttService {
    pub fn new(config: SttConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transcriber for SttService {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, VoiceError> {
        if audio.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Stt(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let mut command = Command::new(&self.config.binary_path);
        command
            .arg("-m")
            .arg(&self.config.model_path)
            .arg("-f")
            .arg("-") // read audio from stdin
            .arg("-nt") // no timestamps, plain text on stdout
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Stt(format!("failed to spawn STT binary: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Stt("failed to open stdin".to_string()))?;

        stdin
            .write_all(audio)
            .await
            .map_err(|e| VoiceError::Stt(format!("failed to write audio to stdin: {}", e)))?;
        drop(stdin); // close stdin to signal EOF

        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout {
                stage: Stage::Transcription,
                seconds: self.config.timeout.as_secs(),
            })?
            .map_err(|e| VoiceError::Stt(format!("failed to read STT output: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Stt(format!("STT binary failed: {}", stderr)));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(clean_transcript(&text))
    }
}

/// Normalizes raw whisper output into an utterance.
///
/// whisper.cpp emits marker tokens like `[BLANK_AUDIO]` or `(silence)` for
/// speechless input; those count as an empty utterance, not as speech.
fn clean_transcript(raw: &str) -> String {
    let trimmed = raw.trim();
    let is_marker = (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('(') && trimmed.ends_with(')'));
    if is_marker {
        return String::new();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_transcript_strips_whitespace() {
        assert_eq!(clean_transcript("  hello there \n"), "hello there");
    }

    #[test]
    fn clean_transcript_maps_silence_markers_to_empty() {
        assert_eq!(clean_transcript("[BLANK_AUDIO]"), "");
        assert_eq!(clean_transcript(" (silence) "), "");
        assert_eq!(clean_transcript(""), "");
    }

    #[test]
    fn clean_transcript_keeps_real_speech() {
        assert_eq!(
            clean_transcript("I need to reschedule"),
            "I need to reschedule"
        );
    }
}
