//! OCR through the `tesseract` command-line tool.

use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::process::run_tool;
use super::{ExtractionSettings, Recognition, TextRecognizer};
use crate::error::{ExtractionError, Result};

/// TSV level for word entries.
const WORD_LEVEL: &str = "5";

/// Runs `tesseract <image> stdout -l <languages> tsv`.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: String,
    languages: String,
    timeout: Duration,
    preprocess: bool,
}

impl TesseractCli {
    pub fn new(binary: impl Into<String>, languages: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            languages: languages.into(),
            timeout: Duration::from_secs(120),
            preprocess: cfg!(feature = "preprocess"),
        }
    }

    pub fn from_settings(settings: &ExtractionSettings) -> Self {
        Self::new(&settings.tesseract_bin, &settings.languages)
            .with_timeout(settings.tool_timeout)
            .with_preprocess(settings.preprocess)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_preprocess(mut self, enabled: bool) -> Self {
        self.preprocess = enabled && cfg!(feature = "preprocess");
        self
    }

    async fn run(&self, image: &Path) -> Result<Recognition> {
        let output = run_tool(
            &self.binary,
            [
                image.as_os_str(),
                OsStr::new("stdout"),
                OsStr::new("-l"),
                OsStr::new(&self.languages),
                OsStr::new("tsv"),
            ],
            self.timeout,
        )
        .await?;

        let tsv = String::from_utf8(output.stdout)
            .map_err(|e| ExtractionError::Output(format!("tesseract output is not UTF-8: {e}")))?;
        Ok(parse_tsv(&tsv))
    }

    #[cfg(feature = "preprocess")]
    async fn run_preprocessed(&self, image: &Path) -> Result<Recognition> {
        let scratch = tempfile::Builder::new().prefix("ouvidoria-ocr-").tempdir()?;
        let cleaned = scratch.path().join("binarized.png");

        let source = image.to_path_buf();
        let target = cleaned.clone();
        let prepared = tokio::task::spawn_blocking(move || super::preprocess::binarize(&source, &target))
            .await
            .map_err(|e| ExtractionError::Decode(format!("preprocessing task failed: {e}")))
            .and_then(|r| r);

        match prepared {
            Ok(()) => self.run(&cleaned).await,
            Err(e) => {
                tracing::debug!(image = %image.display(), error = %e, "Preprocessing failed, using raw image");
                self.run(image).await
            }
        }
    }
}

#[async_trait]
impl TextRecognizer for TesseractCli {
    async fn recognize(&self, image: &Path) -> Result<Recognition> {
        #[cfg(feature = "preprocess")]
        if self.preprocess {
            return self.run_preprocessed(image).await;
        }
        self.run(image).await
    }

    fn name(&self) -> &'static str {
        "tesseract"
    }
}

/// Rebuild page text and mean word confidence from tesseract TSV.
///
/// Words sharing a block, paragraph and line are joined by spaces; lines by
/// newlines. Entries with negative confidence carry no text.
fn parse_tsv(tsv: &str) -> Recognition {
    let mut lines: Vec<String> = Vec::new();
    let mut current_key: Option<(&str, &str, &str)> = None;
    let mut confidence_sum = 0.0f32;
    let mut words = 0u32;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != WORD_LEVEL {
            continue;
        }
        let text = cols[11].trim();
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (cols[2], cols[3], cols[4]);
        match (current_key, lines.last_mut()) {
            (Some(k), Some(line)) if k == key => {
                line.push(' ');
                line.push_str(text);
            }
            _ => {
                lines.push(text.to_string());
                current_key = Some(key);
            }
        }

        confidence_sum += conf;
        words += 1;
    }

    let confidence = if words == 0 {
        0.0
    } else {
        (confidence_sum / words as f32 / 100.0).clamp(0.0, 1.0)
    };

    Recognition {
        text: lines.join("\n"),
        language: None,
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn test_parse_tsv_groups_lines() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t90.0\tRua\n\
             5\t1\t1\t1\t1\t2\t70\t10\t50\t20\t80.0\tSem\n\
             5\t1\t1\t1\t2\t1\t10\t40\t50\t20\t70.0\tSaída\n\
             5\t1\t1\t1\t2\t2\t70\t40\t50\t20\t-1\t\n"
        );
        let recognition = parse_tsv(&tsv);
        assert_eq!(recognition.text, "Rua Sem\nSaída");
        assert!((recognition.confidence - 0.8).abs() < 1e-4);
    }

    #[test]
    fn test_parse_tsv_empty_page() {
        let recognition = parse_tsv(HEADER);
        assert_eq!(recognition.text, "");
        assert_eq!(recognition.confidence, 0.0);
    }

    #[test]
    fn test_parse_tsv_ignores_malformed_rows() {
        let tsv = format!("{HEADER}\n5\t1\t1\nnot a row\n5\t1\t1\t1\t1\t1\t0\t0\t1\t1\t95\tok\n");
        assert_eq!(parse_tsv(&tsv).text, "ok");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("x.png");
        std::fs::write(&image, b"png").unwrap();
        let ocr = TesseractCli::new("ouvidoria-no-such-tesseract", "por").with_preprocess(false);
        let err = ocr.recognize(&image).await.unwrap_err();
        assert!(matches!(err, ExtractionError::ToolMissing(_)));
    }
}
