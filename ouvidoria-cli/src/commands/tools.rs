//! Tools command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use ouvidoria_core::extraction::probe_tool;
use ouvidoria_core::ExtractionSettings;
use serde_json::json;
use tracing::debug;

struct ToolStatus {
    role: &'static str,
    program: String,
    available: bool,
}

/// Execute the tools command.
pub async fn execute(settings: ExtractionSettings, as_json: bool, quiet: bool) -> Result<()> {
    let (recognizer, transcriber, decoder) = tokio::join!(
        probe_tool(&settings.tesseract_bin, "--version"),
        probe_tool(&settings.whisper_bin, "--help"),
        probe_tool(&settings.ffmpeg_bin, "-version"),
    );

    let statuses = [
        ToolStatus {
            role: "recognizer",
            program: settings.tesseract_bin.clone(),
            available: recognizer,
        },
        ToolStatus {
            role: "transcriber",
            program: settings.whisper_bin.clone(),
            available: transcriber,
        },
        ToolStatus {
            role: "decoder",
            program: settings.ffmpeg_bin.clone(),
            available: decoder,
        },
    ];

    for status in &statuses {
        debug!(role = status.role, program = %status.program, available = status.available, "Probed tool");
    }

    let all_available = statuses.iter().all(|s| s.available);

    if as_json {
        let report = json!({
            "tools": statuses
                .iter()
                .map(|s| json!({
                    "role": s.role,
                    "program": s.program,
                    "available": s.available,
                }))
                .collect::<Vec<_>>(),
            "languages": settings.languages,
            "whisper_model": settings.whisper_model,
            "all_available": all_available,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
        return Ok(());
    }

    for status in &statuses {
        let mark = if status.available {
            "available".green()
        } else {
            "missing".red()
        };
        println!("{:<12} {:<24} {}", status.role, status.program, mark);
    }

    if !quiet {
        println!();
        println!(
            "   {} {}",
            "OCR languages:".dimmed(),
            settings.languages
        );
        println!(
            "   {} {}",
            "Whisper model:".dimmed(),
            settings.whisper_model
        );
        if !all_available {
            println!(
                "{}",
                "Files whose tool is missing are stored without extracted text".yellow()
            );
        }
    }

    Ok(())
}
