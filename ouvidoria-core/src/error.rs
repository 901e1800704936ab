use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures raised by extraction engines.
///
/// These never cross [`crate::ExtractionPipeline::extract_from_file`]; the
/// pipeline downgrades them to an empty result plus diagnostic metadata.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Tool not available: {0}")]
    ToolMissing(String),

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unexpected tool output: {0}")]
    Output(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised when a stored or submitted value does not name a known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Raised when a protocol series cannot be constructed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Protocol prefix must be non-empty ASCII alphanumeric, got {0:?}")]
    InvalidPrefix(String),

    #[error("Protocol sequence {0} exceeds the six-digit range")]
    SequenceExhausted(u32),
}

pub type Result<T> = std::result::Result<T, ExtractionError>;
