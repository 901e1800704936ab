//! Extract command implementation.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use ouvidoria_core::{kind_from_extension, AttachmentKind, ExtractionPipeline, ExtractionSettings};
use serde_json::json;
use tracing::{debug, info};

/// Infer the media kind from the file extension.
fn infer_kind(path: &Path) -> Result<AttachmentKind> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(kind_from_extension)
        .ok_or_else(|| {
            anyhow!(
                "Cannot infer media kind for {} (pass --kind image|audio|video)",
                path.display()
            )
        })
}

/// Execute the extract command.
pub async fn execute(
    file: PathBuf,
    kind: Option<AttachmentKind>,
    as_json: bool,
    settings: ExtractionSettings,
    quiet: bool,
) -> Result<()> {
    let metadata = tokio::fs::metadata(&file)
        .await
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    if !metadata.is_file() {
        bail!("Failed to read file: {} is not a regular file", file.display());
    }

    let kind = match kind {
        Some(kind) => kind,
        None => infer_kind(&file)?,
    };

    info!(path = %file.display(), bytes = metadata.len(), kind = %kind, "Extracting text");

    let pipeline = ExtractionPipeline::from_settings(settings);
    let started = Instant::now();
    let result = pipeline.extract_from_file(kind, &file).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    debug!(
        elapsed_ms,
        chars = result.raw_text.chars().count(),
        confidence = result.confidence,
        "Extraction finished"
    );

    if as_json {
        let report = json!({
            "file": file.display().to_string(),
            "kind": kind,
            "elapsed_ms": elapsed_ms,
            "result": result,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize result")?
        );
        return Ok(());
    }

    if result.is_empty() {
        if !quiet {
            eprintln!("{}", "No text could be extracted".yellow());
            if let Some(reason) = result.metadata.get("error").and_then(|v| v.as_str()) {
                eprintln!("   {} {}", "Reason:".dimmed(), reason);
            }
        }
        return Ok(());
    }

    if !quiet {
        let engine = result
            .metadata
            .get("engine")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        eprintln!(
            "{} {} via {} ({:.0}% confidence, {} ms)",
            "Extracted".green().bold(),
            kind,
            engine,
            result.confidence * 100.0,
            elapsed_ms
        );
        if let Some(language) = &result.language {
            eprintln!("   {} {}", "Language:".dimmed(), language);
        }
        eprintln!();
    }

    println!("{}", result.raw_text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_kind() {
        assert_eq!(
            infer_kind(Path::new("foto.JPG")).unwrap(),
            AttachmentKind::Image
        );
        assert_eq!(
            infer_kind(Path::new("relato.mp3")).unwrap(),
            AttachmentKind::Audio
        );
        assert_eq!(
            infer_kind(Path::new("rua.mp4")).unwrap(),
            AttachmentKind::Video
        );
    }

    #[test]
    fn test_infer_kind_unknown() {
        let err = infer_kind(Path::new("notes.txt")).unwrap_err();
        assert!(err.to_string().contains("Cannot infer media kind"));
        assert!(infer_kind(Path::new("noext")).is_err());
    }
}
