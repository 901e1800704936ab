//! Multipart form parsing helpers
//!
//! Collects file parts and text fields from a multipart/form-data request and
//! converts the loosely typed form values (tags as JSON, floats, booleans)
//! into domain values.

use std::collections::HashMap;

use axum::extract::Multipart;
use serde_json::Value;

use crate::db::ManifestationFields;
use crate::error::ApiError;
use crate::lifecycle::UploadedFile;

/// Content type assumed when a file part does not declare one
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Represents a file uploaded via multipart form
#[derive(Debug, Clone)]
pub struct FileField {
    /// File data bytes
    pub data: Vec<u8>,
    /// Content-Type from the multipart field (if provided)
    pub content_type: Option<String>,
    /// Original filename from the multipart field (if provided)
    pub file_name: Option<String>,
}

impl From<FileField> for UploadedFile {
    fn from(field: FileField) -> Self {
        Self {
            bytes: field.data,
            mime_type: field
                .content_type
                .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string()),
            file_name: field.file_name,
        }
    }
}

/// Parsed multipart form fields
#[derive(Debug, Default)]
pub struct MultipartFields {
    /// File parts in request order
    files: Vec<FileField>,
    /// Text fields indexed by name; a repeated name keeps the last value
    text_fields: HashMap<String, String>,
}

impl MultipartFields {
    /// Parse all fields from a multipart request
    ///
    /// Parts named in `file_fields` are read as files. A file part sent with
    /// an empty filename (a form file input left blank) is ignored.
    pub async fn parse(multipart: &mut Multipart, file_fields: &[&str]) -> Result<Self, ApiError> {
        let mut fields = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to parse multipart: {}", e)))?
        {
            let name = field.name().unwrap_or("").to_string();

            if file_fields.contains(&name.as_str()) {
                let file_name = field.file_name().map(|s| s.to_string());
                if file_name.as_deref() == Some("") {
                    continue;
                }
                let content_type = field.content_type().map(|s| s.to_string());

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?
                    .to_vec();

                fields.files.push(FileField {
                    data,
                    content_type,
                    file_name,
                });
            } else {
                let value = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read field '{}': {}", name, e))
                })?;
                fields.text_fields.insert(name, value);
            }
        }

        Ok(fields)
    }

    /// Take ownership of the file parts
    pub fn take_files(&mut self) -> Vec<FileField> {
        std::mem::take(&mut self.files)
    }

    /// Raw text field value
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.text_fields.get(name).map(|s| s.as_str())
    }

    /// Trimmed text field; blank becomes `None`
    pub fn get_string(&self, name: &str) -> Option<String> {
        ouvidoria_core::normalize_text(self.get_text(name))
    }

    /// Boolean field: `true`, `1`, `yes` or `on` (case-insensitive) are true
    pub fn get_bool(&self, name: &str) -> bool {
        self.get_text(name)
            .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
            .unwrap_or(false)
    }

    /// Finite float field; blank, unparsable or NaN becomes `None`
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get_string(name)
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    /// String list sent as JSON.
    ///
    /// An array yields its items, a scalar is wrapped into a one-item list,
    /// and invalid JSON or an empty list yields `None`.
    pub fn get_tags(&self, name: &str) -> Option<Vec<String>> {
        let raw = self.get_string(name)?;
        let tags = match serde_json::from_str::<Value>(&raw).ok()? {
            Value::Array(items) => items.into_iter().map(json_to_tag).collect(),
            scalar => vec![json_to_tag(scalar)],
        };
        Some(tags).filter(|t: &Vec<String>| !t.is_empty())
    }

    /// The optional descriptive fields of the create form
    pub fn manifestation_fields(&self) -> ManifestationFields {
        ManifestationFields {
            subject_id: self.get_string("subject_id"),
            subject_label: self.get_string("subject_label"),
            complementary_tags: self.get_tags("complementary_tags"),
            summary: self.get_string("summary"),
            location_lat: self.get_f64("location_lat"),
            location_lng: self.get_f64("location_lng"),
            location_description: self.get_string("location_description"),
            administrative_region: self.get_string("administrative_region"),
            anonymous: self.get_bool("anonymous"),
            contact_name: self.get_string("contact_name"),
            contact_email: self.get_string("contact_email"),
            contact_phone: self.get_string("contact_phone"),
        }
    }
}

fn json_to_tag(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
