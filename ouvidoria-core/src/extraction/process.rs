//! Child-process plumbing shared by the command-line engines.

use std::ffi::OsStr;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;

use crate::error::{ExtractionError, Result};

/// Keep error messages bounded when a tool dumps a long stderr.
const STDERR_TAIL_BYTES: usize = 2048;

/// Run `program` to completion with a deadline.
///
/// The child is killed if the deadline passes or the future is dropped.
pub(crate) async fn run_tool<I, S>(program: &str, args: I, timeout: Duration) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(tool = program, "Spawning extraction tool");

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExtractionError::ToolMissing(program.to_string()));
        }
        Ok(Err(e)) => return Err(ExtractionError::Io(e)),
        Err(_) => {
            return Err(ExtractionError::Timeout {
                tool: program.to_string(),
                timeout,
            });
        }
    };

    if !output.status.success() {
        return Err(ExtractionError::ToolFailed {
            tool: program.to_string(),
            status: output.status.to_string(),
            stderr: stderr_tail(&output.stderr),
        });
    }

    Ok(output)
}

/// Check whether `program` can be launched at all.
pub async fn probe_tool(program: &str, version_flag: &str) -> bool {
    let status = Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(Duration::from_secs(10), status).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!(tool = program, error = %e, "Tool probe failed");
            false
        }
        Err(_) => false,
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let err = run_tool(
            "ouvidoria-definitely-not-installed",
            ["--version"],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractionError::ToolMissing(_)));
    }

    #[tokio::test]
    async fn test_probe_missing_tool() {
        assert!(!probe_tool("ouvidoria-definitely-not-installed", "--version").await);
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let long = "x".repeat(STDERR_TAIL_BYTES * 2);
        assert_eq!(stderr_tail(long.as_bytes()).len(), STDERR_TAIL_BYTES);
        assert_eq!(stderr_tail(b"  short  "), "short");
    }
}
