//! Scripted engines for tests.
//! WARNING: Do not use in production - they return canned text!

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{MediaDecoder, Recognition, SpeechTranscriber, TextRecognizer};
use crate::error::{ExtractionError, Result};

#[derive(Debug, Clone)]
enum Script {
    Text(String),
    Fail(String),
}

impl Script {
    fn play(&self, language: Option<&str>, confidence: f32) -> Result<Recognition> {
        match self {
            Script::Text(text) => Ok(Recognition {
                text: text.clone(),
                language: language.map(str::to_string),
                confidence,
            }),
            Script::Fail(message) => Err(ExtractionError::Decode(message.clone())),
        }
    }
}

/// OCR engine that returns the same text for every image.
#[derive(Debug, Clone)]
pub struct ScriptedRecognizer {
    script: Script,
}

impl ScriptedRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            script: Script::Text(text.into()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: Script::Fail(message.into()),
        }
    }
}

#[async_trait]
impl TextRecognizer for ScriptedRecognizer {
    async fn recognize(&self, _image: &Path) -> Result<Recognition> {
        self.script.play(None, 0.9)
    }

    fn name(&self) -> &'static str {
        "scripted-ocr"
    }
}

/// Transcriber that returns the same Portuguese transcript for every file.
#[derive(Debug, Clone)]
pub struct ScriptedTranscriber {
    script: Script,
}

impl ScriptedTranscriber {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            script: Script::Text(text.into()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: Script::Fail(message.into()),
        }
    }
}

#[async_trait]
impl SpeechTranscriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: &Path) -> Result<Recognition> {
        self.script.play(Some("pt"), 0.8)
    }

    fn name(&self) -> &'static str {
        "scripted-asr"
    }
}

/// Decoder that writes placeholder files instead of decoding anything.
///
/// Records every workspace it writes into so tests can check cleanup.
#[derive(Debug, Clone)]
pub struct ScriptedDecoder {
    frames: u32,
    audio: bool,
    workspaces: Arc<Mutex<Vec<PathBuf>>>,
}

impl ScriptedDecoder {
    pub fn new(frames: u32) -> Self {
        Self {
            frames,
            audio: true,
            workspaces: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Behave like a video with no audio stream.
    pub fn without_audio(mut self) -> Self {
        self.audio = false;
        self
    }

    pub fn workspaces(&self) -> Arc<Mutex<Vec<PathBuf>>> {
        Arc::clone(&self.workspaces)
    }

    fn record(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Ok(mut seen) = self.workspaces.lock() {
                if !seen.iter().any(|p| p == parent) {
                    seen.push(parent.to_path_buf());
                }
            }
        }
    }
}

#[async_trait]
impl MediaDecoder for ScriptedDecoder {
    async fn extract_audio(&self, _video: &Path, output: &Path) -> Result<()> {
        if !self.audio {
            return Err(ExtractionError::Output("no audio stream".to_string()));
        }
        tokio::fs::write(output, b"RIFF").await?;
        self.record(output);
        Ok(())
    }

    async fn sample_frames(
        &self,
        _video: &Path,
        output_dir: &Path,
        max_frames: u32,
        _interval: Duration,
    ) -> Result<Vec<PathBuf>> {
        let mut frames = Vec::new();
        for n in 1..=self.frames.min(max_frames) {
            let frame = output_dir.join(format!("frame_{n:04}.png"));
            tokio::fs::write(&frame, b"png").await?;
            frames.push(frame);
        }
        self.record(output_dir);
        Ok(frames)
    }

    fn name(&self) -> &'static str {
        "scripted-decoder"
    }
}
