//! Manifestation domain vocabulary.
//!
//! Enumerations shared by persistence and the HTTP layer, plus the pure rules
//! that decide how a submission is classified and how extracted text
//! accumulates over time.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

/// Delimiter placed between extracted-text batches and between the
/// fragments of a single batch.
pub const EXTRACTED_TEXT_SEPARATOR: &str = "\n\n---\n\n";

/// How a manifestation was started. Derived, never user-supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Text,
    Audio,
    Image,
    Video,
    Mixed,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Text => "text",
            InputType::Audio => "audio",
            InputType::Image => "image",
            InputType::Video => "video",
            InputType::Mixed => "mixed",
        }
    }

    /// Classify a submission from the presence of text and the distinct
    /// attachment kinds it carries.
    ///
    /// More than one distinct kind, or text alongside any file, is `Mixed`.
    /// Otherwise the single kind present wins, and text-only is `Text`.
    pub fn detect<I>(has_text: bool, kinds: I) -> Self
    where
        I: IntoIterator<Item = AttachmentKind>,
    {
        let distinct: BTreeSet<AttachmentKind> = kinds.into_iter().collect();

        if distinct.len() > 1 || (has_text && !distinct.is_empty()) {
            return InputType::Mixed;
        }

        match distinct.into_iter().next() {
            Some(kind) => kind.into(),
            None => InputType::Text,
        }
    }
}

impl From<AttachmentKind> for InputType {
    fn from(kind: AttachmentKind) -> Self {
        match kind {
            AttachmentKind::Audio => InputType::Audio,
            AttachmentKind::Image => InputType::Image,
            AttachmentKind::Video => InputType::Video,
        }
    }
}

/// Media category of one stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Audio,
    Image,
    Video,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Audio => "audio",
            AttachmentKind::Image => "image",
            AttachmentKind::Video => "video",
        }
    }
}

/// Workflow status of a manifestation.
///
/// Only `Draft` accepts mutations. `Processing` and `Completed` are reserved
/// for later workflow stages; nothing in this crate transitions into them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestationStatus {
    #[default]
    Draft,
    Received,
    Processing,
    Completed,
}

impl ManifestationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestationStatus::Draft => "draft",
            ManifestationStatus::Received => "received",
            ManifestationStatus::Processing => "processing",
            ManifestationStatus::Completed => "completed",
        }
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, ManifestationStatus::Draft)
    }
}

macro_rules! string_enum_conversions {
    ($ty:ty, $label:literal, [$($text:literal => $variant:expr),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($variant),)+
                    _ => Err(ParseEnumError {
                        kind: $label,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ParseEnumError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

string_enum_conversions!(InputType, "input_type", [
    "text" => InputType::Text,
    "audio" => InputType::Audio,
    "image" => InputType::Image,
    "video" => InputType::Video,
    "mixed" => InputType::Mixed,
]);

string_enum_conversions!(AttachmentKind, "attachment type", [
    "audio" => AttachmentKind::Audio,
    "image" => AttachmentKind::Image,
    "video" => AttachmentKind::Video,
]);

string_enum_conversions!(ManifestationStatus, "status", [
    "draft" => ManifestationStatus::Draft,
    "received" => ManifestationStatus::Received,
    "processing" => ManifestationStatus::Processing,
    "completed" => ManifestationStatus::Completed,
]);

/// Trim a user-supplied string; empty or whitespace-only becomes `None`.
pub fn normalize_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Join the non-empty fragments of one extraction batch.
///
/// Returns `None` when every fragment is blank.
pub fn join_fragments<I, S>(fragments: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parts: Vec<String> = fragments
        .into_iter()
        .filter_map(|f| normalize_text(Some(f.as_ref())))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(EXTRACTED_TEXT_SEPARATOR))
    }
}

/// Merge a new batch of extracted text into what is already stored.
///
/// A blank batch leaves the stored value untouched; a blank stored value is
/// replaced by the batch.
pub fn merge_extracted_text(existing: Option<&str>, batch: &str) -> Option<String> {
    let batch = batch.trim();
    let existing = existing.map(str::trim).filter(|s| !s.is_empty());

    match (existing, batch.is_empty()) {
        (existing, true) => existing.map(str::to_string),
        (None, false) => Some(batch.to_string()),
        (Some(existing), false) => {
            Some(format!("{existing}{EXTRACTED_TEXT_SEPARATOR}{batch}"))
        }
    }
}
