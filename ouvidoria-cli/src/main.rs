//! Ouvidoria CLI - run the media extraction pipeline from the command line.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use ouvidoria_core::{AttachmentKind, ExtractionSettings};
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success (also when no text could be recovered)
  1   General error
  64  Usage error (media kind cannot be inferred)
  66  Input file cannot be read";

#[derive(Parser)]
#[command(name = "ouvidoria")]
#[command(author, version, about = "Ouvidoria media text extraction tool", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Show debug logs on stderr
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Print results only
    #[arg(short, long, global = true)]
    quiet: bool,

    /// When to use colors
    #[arg(long, value_enum, default_value_t = ColorChoice::Auto, global = true)]
    color: ColorChoice,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract text from an image, audio or video file
    Extract {
        /// Path to the media file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Media kind (inferred from the file extension when omitted)
        #[arg(short, long, value_enum)]
        kind: Option<KindArg>,

        /// Print the full extraction result as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        tools: ToolArgs,
    },

    /// Check which extraction tools are installed
    Tools {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        tools: ToolArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Image,
    Audio,
    Video,
}

impl From<KindArg> for AttachmentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Image => AttachmentKind::Image,
            KindArg::Audio => AttachmentKind::Audio,
            KindArg::Video => AttachmentKind::Video,
        }
    }
}

/// Overrides for the external tools; unset values keep the defaults.
#[derive(Args)]
struct ToolArgs {
    /// OCR binary
    #[arg(long, value_name = "PATH")]
    tesseract_bin: Option<String>,

    /// Speech transcription binary
    #[arg(long, value_name = "PATH")]
    whisper_bin: Option<String>,

    /// Whisper model name
    #[arg(long, value_name = "MODEL")]
    whisper_model: Option<String>,

    /// Video decoder binary
    #[arg(long, value_name = "PATH")]
    ffmpeg_bin: Option<String>,

    /// OCR language set, e.g. por+eng
    #[arg(long, value_name = "LANGS")]
    languages: Option<String>,

    /// Maximum number of video frames to OCR
    #[arg(long, value_name = "N")]
    max_frames: Option<u32>,

    /// Per-tool timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Skip image binarisation before OCR
    #[arg(long)]
    no_preprocess: bool,
}

impl ToolArgs {
    fn into_settings(self) -> ExtractionSettings {
        let mut settings = ExtractionSettings::default();
        if let Some(bin) = self.tesseract_bin {
            settings.tesseract_bin = bin;
        }
        if let Some(bin) = self.whisper_bin {
            settings.whisper_bin = bin;
        }
        if let Some(model) = self.whisper_model {
            settings.whisper_model = model;
        }
        if let Some(bin) = self.ffmpeg_bin {
            settings.ffmpeg_bin = bin;
        }
        if let Some(languages) = self.languages {
            settings.languages = languages;
        }
        if let Some(frames) = self.max_frames {
            settings.max_frames = frames.max(1);
        }
        if let Some(secs) = self.timeout_secs {
            settings.tool_timeout = Duration::from_secs(secs.max(1));
        }
        if self.no_preprocess {
            settings.preprocess = false;
        }
        settings
    }
}

fn init_tracing(verbose: bool, quiet: bool, ansi: bool) {
    let default_level = if verbose {
        "ouvidoria=debug,ouvidoria_core=debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.color {
        ColorChoice::Always => colored::control::set_override(true),
        ColorChoice::Never => colored::control::set_override(false),
        ColorChoice::Auto => {}
    }
    init_tracing(
        cli.verbose,
        cli.quiet,
        colored::control::SHOULD_COLORIZE.should_colorize(),
    );

    let result = match cli.command {
        Commands::Extract {
            file,
            kind,
            json,
            tools,
        } => {
            commands::extract::execute(
                file,
                kind.map(Into::into),
                json,
                tools.into_settings(),
                cli.quiet,
            )
            .await
        }
        Commands::Tools { json, tools } => {
            commands::tools::execute(tools.into_settings(), json, cli.quiet).await
        }
    };

    if let Err(err) = result {
        let exit = exit_codes::ExitCode::from_anyhow(&err);
        if let Some(message) = &exit.message {
            eprintln!("{} {}", "error:".red().bold(), message);
        }
        std::process::exit(exit.code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_tool_args_override_defaults() {
        let cli = Cli::parse_from([
            "ouvidoria",
            "tools",
            "--tesseract-bin",
            "/opt/tesseract",
            "--max-frames",
            "0",
            "--no-preprocess",
        ]);
        let Commands::Tools { tools, .. } = cli.command else {
            panic!("expected tools subcommand");
        };

        let settings = tools.into_settings();
        assert_eq!(settings.tesseract_bin, "/opt/tesseract");
        assert_eq!(settings.whisper_bin, "whisper");
        assert_eq!(settings.max_frames, 1);
        assert!(!settings.preprocess);
    }
}
