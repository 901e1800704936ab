//! Attachment handlers
//!
//! Adding files to a draft, and listing or downloading the files of a
//! submitted manifestation through its protocol.

use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use ouvidoria_core::{extension_from_mime, AttachmentKind};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::Attachment;
use crate::error::ApiError;
use crate::handlers::manifestations::parse_manifestation_id;
use crate::handlers::AppState;
use crate::lifecycle::{LifecycleError, RejectedFile, UploadedFile};
use crate::multipart::MultipartFields;

/// Response for attachment upload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddAttachmentsResponse {
    #[schema(value_type = String)]
    pub manifestation_id: Uuid,
    /// Attachments recorded in the database
    pub added_count: usize,
    /// Files that passed validation but could not be stored
    pub rejected_files: Vec<RejectedFile>,
}

/// Public attachment metadata; never includes the storage location
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttachmentResponse {
    #[schema(value_type = String)]
    pub id: Uuid,
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "image")]
    pub kind: AttachmentKind,
    #[schema(example = "image/jpeg")]
    pub mime_type: String,
    pub size_bytes: i64,
    #[schema(value_type = String, example = "2026-01-24T12:00:00Z")]
    pub created_at: DateTime<Utc>,
}

impl From<Attachment> for AttachmentResponse {
    fn from(a: Attachment) -> Self {
        Self {
            id: a.id,
            kind: a.kind,
            mime_type: a.mime_type,
            size_bytes: a.size_bytes,
            created_at: a.created_at,
        }
    }
}

/// Attachments of one submitted manifestation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttachmentListResponse {
    #[schema(example = "DF-2026-000001")]
    pub protocol: String,
    pub attachments: Vec<AttachmentResponse>,
}

/// Add files to a draft
///
/// Accepts multipart/form-data with one or more `files` parts (`file` is
/// accepted too). One invalid file rejects the whole request.
#[utoipa::path(
    post,
    path = "/v1/manifestations/{id}/attachments",
    tag = "Attachments",
    params(
        ("id" = String, Path, description = "Internal manifestation id (UUID)")
    ),
    request_body(content_type = "multipart/form-data", description = "Repeatable `files` parts"),
    responses(
        (status = 200, description = "Files stored", body = AddAttachmentsResponse),
        (status = 400, description = "No valid file, invalid file, or manifestation not a draft"),
        (status = 500, description = "None of the files could be stored")
    )
)]
pub async fn add_attachments_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<AddAttachmentsResponse>, ApiError> {
    let id = parse_manifestation_id(&id)?;
    let mut form = MultipartFields::parse(&mut multipart, &["files", "file"]).await?;
    let files: Vec<UploadedFile> = form.take_files().into_iter().map(Into::into).collect();

    let added = state
        .service
        .add_attachments(id, files)
        .await
        .map_err(ApiError::mutation)?;

    Ok(Json(AddAttachmentsResponse {
        manifestation_id: added.manifestation_id,
        added_count: added.attachments.len(),
        rejected_files: added.rejected_files,
    }))
}

/// List the attachments of a submitted manifestation
#[utoipa::path(
    get,
    path = "/v1/manifestations/{protocol}/attachments",
    tag = "Attachments",
    params(
        ("protocol" = String, Path, description = "Protocol, e.g. DF-2026-000001")
    ),
    responses(
        (status = 200, description = "Attachment list", body = AttachmentListResponse),
        (status = 404, description = "No manifestation with this protocol")
    )
)]
pub async fn list_attachments_handler(
    State(state): State<AppState>,
    Path(protocol): Path<String>,
) -> Result<Json<AttachmentListResponse>, ApiError> {
    let (manifestation, attachments) = state.service.list_attachments(&protocol).await?;

    Ok(Json(AttachmentListResponse {
        protocol: manifestation.protocol.unwrap_or(protocol),
        attachments: attachments.into_iter().map(Into::into).collect(),
    }))
}

/// Download one attachment
///
/// Returns the raw bytes with the stored content type.
#[utoipa::path(
    get,
    path = "/v1/manifestations/{protocol}/attachments/{attachment_id}",
    tag = "Attachments",
    params(
        ("protocol" = String, Path, description = "Protocol, e.g. DF-2026-000001"),
        ("attachment_id" = String, Path, description = "Attachment id (UUID)")
    ),
    responses(
        (status = 200, description = "Raw file content with the stored content type"),
        (status = 404, description = "Unknown protocol or attachment")
    )
)]
pub async fn download_attachment_handler(
    State(state): State<AppState>,
    Path((protocol, attachment_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let attachment_id =
        Uuid::parse_str(attachment_id.trim()).map_err(|_| LifecycleError::NotFound)?;

    let (attachment, bytes) = state
        .service
        .read_attachment(&protocol, attachment_id)
        .await?;

    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        attachment.id,
        download_extension(&attachment)
    );

    Ok((
        [
            (header::CONTENT_TYPE, attachment.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Extension the file was stored under, falling back to the MIME mapping.
fn download_extension(attachment: &Attachment) -> String {
    std::path::Path::new(&attachment.file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| extension_from_mime(&attachment.mime_type).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(file_path: &str, mime: &str) -> Attachment {
        Attachment {
            id: Uuid::nil(),
            manifestation_id: Uuid::nil(),
            kind: AttachmentKind::Image,
            mime_type: mime.to_string(),
            size_bytes: 1,
            file_path: file_path.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_download_extension() {
        assert_eq!(download_extension(&attachment("o/a.png", "image/png")), "png");
        assert_eq!(download_extension(&attachment("o/a", "image/jpeg")), "jpg");
    }

    #[test]
    fn test_response_hides_storage_location() {
        let json = serde_json::to_value(AttachmentResponse::from(attachment(
            "owner/secret.png",
            "image/png",
        )))
        .unwrap();
        assert_eq!(json["type"], "image");
        assert!(json.get("file_path").is_none());
    }
}
