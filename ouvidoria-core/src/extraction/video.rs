//! Video decoding through the `ffmpeg` command-line tool.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::process::run_tool;
use super::{ExtractionSettings, MediaDecoder};
use crate::error::{ExtractionError, Result};

/// Sample rate expected by the speech transcriber.
const AUDIO_SAMPLE_RATE: &str = "16000";

#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    binary: String,
    timeout: Duration,
}

impl FfmpegDecoder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn from_settings(settings: &ExtractionSettings) -> Self {
        Self::new(&settings.ffmpeg_bin).with_timeout(settings.tool_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MediaDecoder for FfmpegDecoder {
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
        run_tool(
            &self.binary,
            [
                OsStr::new("-y"),
                OsStr::new("-loglevel"),
                OsStr::new("error"),
                OsStr::new("-i"),
                video.as_os_str(),
                OsStr::new("-vn"),
                OsStr::new("-ac"),
                OsStr::new("1"),
                OsStr::new("-ar"),
                OsStr::new(AUDIO_SAMPLE_RATE),
                OsStr::new("-acodec"),
                OsStr::new("pcm_s16le"),
                output.as_os_str(),
            ],
            self.timeout,
        )
        .await?;

        // ffmpeg exits 0 with no output file when the input has no audio stream.
        match tokio::fs::metadata(output).await {
            Ok(m) if m.len() > 0 => Ok(()),
            _ => Err(ExtractionError::Output("no audio stream".to_string())),
        }
    }

    async fn sample_frames(
        &self,
        video: &Path,
        output_dir: &Path,
        max_frames: u32,
        interval: Duration,
    ) -> Result<Vec<PathBuf>> {
        let filter = format!("fps=1/{}", interval.as_secs().max(1));
        let max_frames = max_frames.to_string();
        let pattern = output_dir.join("frame_%04d.png");

        run_tool(
            &self.binary,
            [
                OsStr::new("-y"),
                OsStr::new("-loglevel"),
                OsStr::new("error"),
                OsStr::new("-i"),
                video.as_os_str(),
                OsStr::new("-vf"),
                OsStr::new(&filter),
                OsStr::new("-frames:v"),
                OsStr::new(&max_frames),
                pattern.as_os_str(),
            ],
            self.timeout,
        )
        .await?;

        collect_frames(output_dir).await
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

/// List `frame_*.png` files in `dir`, sorted by name.
async fn collect_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_frame = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("frame_") && n.ends_with(".png"));
        if is_frame {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}
