//! Speech-to-text through the `whisper` command-line tool.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::process::{probe_tool, run_tool};
use super::{ExtractionSettings, Recognition, SpeechTranscriber};
use crate::error::{ExtractionError, Result};

/// Runs `whisper <audio> --model <model> --output_format json`.
///
/// The first call probes the binary once; the outcome is shared by every
/// clone, so a missing installation costs one spawn rather than one per file.
#[derive(Debug, Clone)]
pub struct WhisperCli {
    binary: String,
    model: String,
    timeout: Duration,
    available: Arc<OnceCell<bool>>,
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    avg_logprob: Option<f64>,
}

impl WhisperCli {
    pub fn new(binary: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            timeout: Duration::from_secs(300),
            available: Arc::new(OnceCell::new()),
        }
    }

    pub fn from_settings(settings: &ExtractionSettings) -> Self {
        Self::new(&settings.whisper_bin, &settings.whisper_model).with_timeout(settings.tool_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn ensure_available(&self) -> Result<()> {
        let available = *self
            .available
            .get_or_init(|| async {
                let found = probe_tool(&self.binary, "--help").await;
                if found {
                    tracing::info!(binary = %self.binary, model = %self.model, "Speech transcriber ready");
                } else {
                    tracing::warn!(binary = %self.binary, "Speech transcriber not installed");
                }
                found
            })
            .await;

        if available {
            Ok(())
        } else {
            Err(ExtractionError::ToolMissing(self.binary.clone()))
        }
    }
}

#[async_trait]
impl SpeechTranscriber for WhisperCli {
    async fn transcribe(&self, audio: &Path) -> Result<Recognition> {
        self.ensure_available().await?;

        let out_dir = tempfile::Builder::new()
            .prefix("ouvidoria-asr-")
            .tempdir()?;

        run_tool(
            &self.binary,
            [
                audio.as_os_str(),
                OsStr::new("--model"),
                OsStr::new(&self.model),
                OsStr::new("--output_format"),
                OsStr::new("json"),
                OsStr::new("--output_dir"),
                out_dir.path().as_os_str(),
                OsStr::new("--fp16"),
                OsStr::new("False"),
                OsStr::new("--verbose"),
                OsStr::new("False"),
            ],
            self.timeout,
        )
        .await?;

        let stem = audio
            .file_stem()
            .ok_or_else(|| ExtractionError::Output("audio path has no file name".to_string()))?;
        let json_path = out_dir
            .path()
            .join(format!("{}.json", stem.to_string_lossy()));
        let raw = tokio::fs::read(&json_path).await.map_err(|e| {
            ExtractionError::Output(format!("missing transcript {}: {e}", json_path.display()))
        })?;

        parse_output(&raw)
    }

    fn name(&self) -> &'static str {
        "whisper"
    }
}

fn parse_output(raw: &[u8]) -> Result<Recognition> {
    let output: WhisperOutput = serde_json::from_slice(raw)
        .map_err(|e| ExtractionError::Output(format!("invalid transcript JSON: {e}")))?;

    let logprobs: Vec<f64> = output
        .segments
        .iter()
        .filter_map(|s| s.avg_logprob)
        .collect();
    let confidence = if logprobs.is_empty() || output.text.trim().is_empty() {
        0.0
    } else {
        let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
        mean.exp().clamp(0.0, 1.0) as f32
    };

    Ok(Recognition {
        text: output.text.trim().to_string(),
        language: output.language.filter(|l| !l.is_empty()),
        confidence,
    })
}
