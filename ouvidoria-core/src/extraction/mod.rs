//! Media text extraction.
//!
//! Images go through OCR, audio through speech-to-text, and video through a
//! composite of both over a scratch workspace. Engines are pluggable behind
//! [`TextRecognizer`], [`SpeechTranscriber`] and [`MediaDecoder`]; the
//! default implementations drive the `tesseract`, `whisper` and `ffmpeg`
//! command-line tools.
//!
//! ## Failure contract
//!
//! [`ExtractionPipeline::extract_from_file`] never returns an error. Missing
//! files, empty files, decode failures and tool crashes all produce an
//! [`ExtractionResult`] with empty `raw_text` and an `error` entry in its
//! metadata.
//!
//! ```no_run
//! use ouvidoria_core::{AttachmentKind, ExtractionPipeline, ExtractionSettings};
//!
//! # async fn example() {
//! let pipeline = ExtractionPipeline::from_settings(ExtractionSettings::default());
//! let result = pipeline
//!     .extract_from_file(AttachmentKind::Image, "photo.jpg".as_ref())
//!     .await;
//! println!("{}", result.raw_text);
//! # }
//! ```

mod mock;
mod ocr;
#[cfg(feature = "preprocess")]
mod preprocess;
mod process;
mod transcribe;
mod video;

pub use mock::{ScriptedDecoder, ScriptedRecognizer, ScriptedTranscriber};
pub use ocr::TesseractCli;
#[cfg(feature = "preprocess")]
pub use preprocess::binarize;
pub use process::probe_tool;
pub use transcribe::WhisperCli;
pub use video::FfmpegDecoder;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{ExtractionError, Result};
use crate::manifestation::{join_fragments, AttachmentKind};

/// Maximum number of frames sampled from one video.
pub const DEFAULT_MAX_FRAMES: u32 = 10;

/// One frame every this many seconds of video.
pub const DEFAULT_FRAME_INTERVAL_SECS: u64 = 5;

pub const DEFAULT_OCR_LANGUAGES: &str = "por+eng";

pub const DEFAULT_WHISPER_MODEL: &str = "base";

const AUDIO_LABEL: &str = "[Áudio]";

/// Text recovered from one media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub raw_text: String,
    pub language: Option<String>,
    /// 0.0 when nothing was recognised.
    pub confidence: f32,
    /// Always a JSON object. Carries `engine`, and `error` on failure.
    pub metadata: Value,
}

impl ExtractionResult {
    pub fn failed(engine: &str, error: &ExtractionError) -> Self {
        Self {
            raw_text: String::new(),
            language: None,
            confidence: 0.0,
            metadata: json!({ "engine": engine, "error": error.to_string() }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raw_text.trim().is_empty()
    }

    fn from_recognition(engine: &str, recognition: Recognition) -> Self {
        Self {
            raw_text: recognition.text.trim().to_string(),
            language: recognition.language,
            confidence: recognition.confidence,
            metadata: json!({ "engine": engine }),
        }
    }
}

/// Output of a single engine call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub language: Option<String>,
    pub confidence: f32,
}

/// Recognises printed text in an image file.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &Path) -> Result<Recognition>;

    fn name(&self) -> &'static str;
}

/// Transcribes speech in an audio file.
#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<Recognition>;

    fn name(&self) -> &'static str;
}

/// Splits a video into an audio track and still frames.
#[async_trait]
pub trait MediaDecoder: Send + Sync {
    /// Write the audio track of `video` as mono 16 kHz WAV to `output`.
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()>;

    /// Write up to `max_frames` frames, one every `interval`, into
    /// `output_dir`. Returns the frame files in presentation order.
    async fn sample_frames(
        &self,
        video: &Path,
        output_dir: &Path,
        max_frames: u32,
        interval: Duration,
    ) -> Result<Vec<PathBuf>>;

    fn name(&self) -> &'static str;
}

/// Tool locations and tuning for the default engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSettings {
    pub tesseract_bin: String,
    pub whisper_bin: String,
    pub whisper_model: String,
    pub ffmpeg_bin: String,
    /// Tesseract language set, e.g. `por+eng`.
    pub languages: String,
    pub max_frames: u32,
    pub frame_interval: Duration,
    /// Deadline for any single engine call.
    pub tool_timeout: Duration,
    /// Binarise images before OCR when the `preprocess` feature is enabled.
    pub preprocess: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            tesseract_bin: "tesseract".to_string(),
            whisper_bin: "whisper".to_string(),
            whisper_model: DEFAULT_WHISPER_MODEL.to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            languages: DEFAULT_OCR_LANGUAGES.to_string(),
            max_frames: DEFAULT_MAX_FRAMES,
            frame_interval: Duration::from_secs(DEFAULT_FRAME_INTERVAL_SECS),
            tool_timeout: Duration::from_secs(300),
            preprocess: true,
        }
    }
}

/// Routes a file to the engines for its kind and absorbs every failure.
///
/// Cheap to clone; engines are shared.
#[derive(Clone)]
pub struct ExtractionPipeline {
    recognizer: Arc<dyn TextRecognizer>,
    transcriber: Arc<dyn SpeechTranscriber>,
    decoder: Arc<dyn MediaDecoder>,
    settings: ExtractionSettings,
}

impl std::fmt::Debug for ExtractionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionPipeline")
            .field("recognizer", &self.recognizer.name())
            .field("transcriber", &self.transcriber.name())
            .field("decoder", &self.decoder.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ExtractionPipeline {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        transcriber: Arc<dyn SpeechTranscriber>,
        decoder: Arc<dyn MediaDecoder>,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            recognizer,
            transcriber,
            decoder,
            settings,
        }
    }

    /// Build a pipeline backed by the command-line tools named in `settings`.
    pub fn from_settings(settings: ExtractionSettings) -> Self {
        let recognizer = Arc::new(TesseractCli::from_settings(&settings));
        let transcriber = Arc::new(WhisperCli::from_settings(&settings));
        let decoder = Arc::new(FfmpegDecoder::from_settings(&settings));
        Self::new(recognizer, transcriber, decoder, settings)
    }

    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }

    /// Extract text from `path` according to `kind`. Never fails.
    pub async fn extract_from_file(&self, kind: AttachmentKind, path: &Path) -> ExtractionResult {
        let engine = self.engine_for(kind);

        if let Err(e) = check_input(path).await {
            tracing::warn!(path = %path.display(), kind = %kind, error = %e, "Skipping extraction");
            return ExtractionResult::failed(engine, &e);
        }

        let outcome = match kind {
            AttachmentKind::Image => self.extract_image(path).await,
            AttachmentKind::Audio => self.extract_audio(path).await,
            AttachmentKind::Video => self.extract_video(path).await,
        };

        match outcome {
            Ok(result) => {
                tracing::debug!(
                    path = %path.display(),
                    kind = %kind,
                    chars = result.raw_text.len(),
                    "Extraction finished"
                );
                result
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), kind = %kind, error = %e, "Extraction failed");
                ExtractionResult::failed(engine, &e)
            }
        }
    }

    fn engine_for(&self, kind: AttachmentKind) -> &'static str {
        match kind {
            AttachmentKind::Image => self.recognizer.name(),
            AttachmentKind::Audio => self.transcriber.name(),
            AttachmentKind::Video => self.decoder.name(),
        }
    }

    async fn extract_image(&self, path: &Path) -> Result<ExtractionResult> {
        let recognition = self.recognize(path).await?;
        Ok(ExtractionResult::from_recognition(
            self.recognizer.name(),
            recognition,
        ))
    }

    async fn extract_audio(&self, path: &Path) -> Result<ExtractionResult> {
        let recognition = self.transcribe(path).await?;
        Ok(ExtractionResult::from_recognition(
            self.transcriber.name(),
            recognition,
        ))
    }

    async fn extract_video(&self, path: &Path) -> Result<ExtractionResult> {
        let workspace = tempfile::Builder::new()
            .prefix("ouvidoria-video-")
            .tempdir()?;

        let result = self.extract_video_in(path, workspace.path()).await;

        // Dropping the TempDir also removes it; closing explicitly surfaces
        // removal errors in the log.
        let scratch = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            tracing::warn!(workspace = %scratch.display(), error = %e, "Failed to remove video workspace");
        }

        result
    }

    async fn extract_video_in(&self, video: &Path, workspace: &Path) -> Result<ExtractionResult> {
        let mut fragments = Vec::new();
        let mut language = None;
        let mut confidences = Vec::new();

        let audio_path = workspace.join("audio.wav");
        let audio_extracted = match self.guard(self.decoder.extract_audio(video, &audio_path)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(video = %video.display(), error = %e, "No audio track extracted");
                false
            }
        };

        if audio_extracted {
            match self.transcribe(&audio_path).await {
                Ok(recognition) => {
                    let text = recognition.text.trim();
                    if !text.is_empty() {
                        fragments.push(format!("{AUDIO_LABEL}\n{text}"));
                        confidences.push(recognition.confidence);
                        language = recognition.language;
                    }
                }
                Err(e) => {
                    tracing::warn!(video = %video.display(), error = %e, "Video audio transcription failed")
                }
            }
        }

        let frames_dir = workspace.join("frames");
        tokio::fs::create_dir_all(&frames_dir).await?;
        let frames = match self
            .guard(self.decoder.sample_frames(
                video,
                &frames_dir,
                self.settings.max_frames,
                self.settings.frame_interval,
            ))
            .await
        {
            Ok(frames) => frames,
            Err(e) => {
                tracing::debug!(video = %video.display(), error = %e, "No frames sampled");
                Vec::new()
            }
        };

        for (index, frame) in frames.iter().enumerate() {
            match self.recognize(frame).await {
                Ok(recognition) => {
                    let text = recognition.text.trim();
                    if !text.is_empty() {
                        fragments.push(format!("[Frame {}]\n{text}", index + 1));
                        confidences.push(recognition.confidence);
                    }
                }
                Err(e) => {
                    tracing::debug!(frame = %frame.display(), error = %e, "Frame OCR failed")
                }
            }
        }

        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f32>() / confidences.len() as f32
        };

        let mut metadata = Map::new();
        metadata.insert("engine".into(), json!(self.decoder.name()));
        metadata.insert("audio_extracted".into(), json!(audio_extracted));
        metadata.insert("frames_sampled".into(), json!(frames.len()));

        Ok(ExtractionResult {
            raw_text: join_fragments(&fragments).unwrap_or_default(),
            language,
            confidence,
            metadata: Value::Object(metadata),
        })
    }

    async fn recognize(&self, image: &Path) -> Result<Recognition> {
        self.guard(self.recognizer.recognize(image)).await
    }

    async fn transcribe(&self, audio: &Path) -> Result<Recognition> {
        self.guard(self.transcriber.transcribe(audio)).await
    }

    /// Apply the per-call deadline to an engine future.
    async fn guard<T>(&self, call: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.settings.tool_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| ExtractionError::Timeout {
                tool: "extraction engine".to_string(),
                timeout,
            })?
    }
}

/// Reject inputs no engine could use: missing, not a regular file, or empty.
async fn check_input(path: &Path) -> Result<()> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExtractionError::FileNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(ExtractionError::NotAFile(path.to_path_buf()));
    }
    if metadata.len() == 0 {
        return Err(ExtractionError::EmptyFile(path.to_path_buf()));
    }
    Ok(())
}
