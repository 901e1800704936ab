//! Upload media policy.
//!
//! Decides which MIME types are accepted, which attachment kind they map to,
//! which file extension they are stored under, and how large they may be.

use serde::{Deserialize, Serialize};

use crate::manifestation::AttachmentKind;

pub const DEFAULT_MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

pub const DEFAULT_AUDIO_MIMES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/x-wav",
    "audio/webm",
    "audio/ogg",
];

pub const DEFAULT_IMAGE_MIMES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

pub const DEFAULT_VIDEO_MIMES: &[&str] = &["video/mp4", "video/webm", "video/ogg"];

/// Reasons an upload is refused before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaRejection {
    #[error("File exceeds the maximum size of {max_mb} MB")]
    TooLarge { size: usize, max_mb: usize },

    #[error("MIME type not allowed: {0}")]
    MimeNotAllowed(String),
}

/// Accepted MIME sets per kind plus the per-file size ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPolicy {
    pub audio_mimes: Vec<String>,
    pub image_mimes: Vec<String>,
    pub video_mimes: Vec<String>,
    pub max_file_size: usize,
}

impl Default for MediaPolicy {
    fn default() -> Self {
        Self {
            audio_mimes: to_owned(DEFAULT_AUDIO_MIMES),
            image_mimes: to_owned(DEFAULT_IMAGE_MIMES),
            video_mimes: to_owned(DEFAULT_VIDEO_MIMES),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl MediaPolicy {
    /// Map a MIME type to its attachment kind; `None` if not permitted.
    pub fn classify(&self, mime: &str) -> Option<AttachmentKind> {
        let mime = normalize_mime(mime);
        let contains = |set: &[String]| set.iter().any(|m| m.eq_ignore_ascii_case(&mime));

        if contains(&self.audio_mimes) {
            Some(AttachmentKind::Audio)
        } else if contains(&self.image_mimes) {
            Some(AttachmentKind::Image)
        } else if contains(&self.video_mimes) {
            Some(AttachmentKind::Video)
        } else {
            None
        }
    }

    /// Check size then MIME for one upload.
    pub fn validate(&self, mime: &str, size: usize) -> Result<AttachmentKind, MediaRejection> {
        if size > self.max_file_size {
            return Err(MediaRejection::TooLarge {
                size,
                max_mb: self.max_file_size / (1024 * 1024),
            });
        }
        self.classify(mime)
            .ok_or_else(|| MediaRejection::MimeNotAllowed(mime.to_string()))
    }
}

/// Lowercase a MIME type and drop parameters such as `; codecs=opus`.
pub fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Storage extension for an accepted MIME type; `bin` when unknown.
pub fn extension_from_mime(mime: &str) -> &'static str {
    match normalize_mime(mime).as_str() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/ogg" => "ogv",
        _ => "bin",
    }
}

/// Best-effort kind for a local file, from its extension.
pub fn kind_from_extension(extension: &str) -> Option<AttachmentKind> {
    match extension.to_ascii_lowercase().as_str() {
        "mp3" | "wav" | "ogg" | "oga" | "m4a" | "flac" => Some(AttachmentKind::Audio),
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tif" | "tiff" => {
            Some(AttachmentKind::Image)
        }
        "mp4" | "webm" | "ogv" | "mov" | "mkv" | "avi" => Some(AttachmentKind::Video),
        _ => None,
    }
}

fn to_owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_default_policy() {
        let policy = MediaPolicy::default();
        assert_eq!(policy.classify("image/jpeg"), Some(AttachmentKind::Image));
        assert_eq!(policy.classify("AUDIO/MPEG"), Some(AttachmentKind::Audio));
        assert_eq!(
            policy.classify("audio/webm; codecs=opus"),
            Some(AttachmentKind::Audio)
        );
        assert_eq!(policy.classify("video/mp4"), Some(AttachmentKind::Video));
        assert_eq!(policy.classify("application/pdf"), None);
        assert_eq!(policy.classify(""), None);
    }

    #[test]
    fn test_validate_size_before_mime() {
        let policy = MediaPolicy {
            max_file_size: 10,
            ..MediaPolicy::default()
        };
        assert_eq!(
            policy.validate("text/html", 11),
            Err(MediaRejection::TooLarge { size: 11, max_mb: 0 })
        );
        assert_eq!(
            policy.validate("text/html", 10),
            Err(MediaRejection::MimeNotAllowed("text/html".into()))
        );
        assert_eq!(policy.validate("image/png", 10), Ok(AttachmentKind::Image));
    }

    #[test]
    fn test_extension_from_mime() {
        assert_eq!(extension_from_mime("image/jpg"), "jpg");
        assert_eq!(extension_from_mime("video/ogg"), "ogv");
        assert_eq!(extension_from_mime("audio/ogg"), "ogg");
        assert_eq!(extension_from_mime("application/x-unknown"), "bin");
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(kind_from_extension("JPG"), Some(AttachmentKind::Image));
        assert_eq!(kind_from_extension("wav"), Some(AttachmentKind::Audio));
        assert_eq!(kind_from_extension("mkv"), Some(AttachmentKind::Video));
        assert_eq!(kind_from_extension("txt"), None);
    }
}
