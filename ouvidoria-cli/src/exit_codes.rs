//! Exit codes following sysexits.h conventions.

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (e.g. media kind cannot be inferred).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        let code = if message.contains("Failed to read file") {
            INPUT_ERROR
        } else if message.contains("Cannot infer media kind") {
            USAGE_ERROR
        } else {
            GENERAL_ERROR
        };

        Self {
            code,
            message: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_classification() {
        let read = anyhow!("No such file").context("Failed to read file: a.png");
        assert_eq!(ExitCode::from_anyhow(&read).code, INPUT_ERROR);

        let kind = anyhow!("Cannot infer media kind for notes.txt");
        assert_eq!(ExitCode::from_anyhow(&kind).code, USAGE_ERROR);

        let other = anyhow!("serialization failed");
        let exit = ExitCode::from_anyhow(&other);
        assert_eq!(exit.code, GENERAL_ERROR);
        assert_eq!(exit.message.as_deref(), Some("serialization failed"));
    }
}
