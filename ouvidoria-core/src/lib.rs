//! Ouvidoria Core - domain model and media text extraction for citizen
//! complaint intake
//!
//! This crate holds everything about a manifestation that does not depend on
//! a database or an HTTP stack.
//!
//! # Features
//!
//! - Manifestation vocabulary: input types, attachment kinds, workflow status
//! - Input-type detection and the extracted-text merge rule
//! - Sequential protocol identifiers (`DF-2026-000001`)
//! - Upload media policy: MIME classification, extensions, size ceiling
//! - Failure-tolerant OCR, speech-to-text and video text extraction
//!
//! # Example
//!
//! ```
//! use ouvidoria_core::{AttachmentKind, InputType, ProtocolSeries};
//!
//! let input = InputType::detect(true, [AttachmentKind::Image]);
//! assert_eq!(input, InputType::Mixed);
//!
//! let series = ProtocolSeries::new("DF", 2026).unwrap();
//! assert_eq!(series.next_after(None).unwrap(), "DF-2026-000001");
//! ```

pub mod error;
pub mod extraction;
pub mod manifestation;
pub mod media;
pub mod protocol;

// Re-export main types for convenience
pub use error::{ExtractionError, ParseEnumError, ProtocolError, Result};
pub use extraction::{
    ExtractionPipeline, ExtractionResult, ExtractionSettings, FfmpegDecoder, MediaDecoder,
    Recognition, ScriptedDecoder, ScriptedRecognizer, ScriptedTranscriber, SpeechTranscriber,
    TesseractCli, TextRecognizer, WhisperCli,
};
pub use manifestation::{
    join_fragments, merge_extracted_text, normalize_text, AttachmentKind, InputType,
    ManifestationStatus, EXTRACTED_TEXT_SEPARATOR,
};
pub use media::{
    extension_from_mime, kind_from_extension, normalize_mime, MediaPolicy, MediaRejection,
    DEFAULT_MAX_FILE_SIZE,
};
pub use protocol::ProtocolSeries;
