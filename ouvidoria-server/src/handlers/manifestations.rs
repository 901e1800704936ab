//! Manifestation handlers
//!
//! Draft creation, draft update, submission and the public lookup by protocol.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use ouvidoria_core::{normalize_text, InputType, ManifestationStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::ManifestationPatch;
use crate::error::ApiError;
use crate::handlers::AppState;
use crate::lifecycle::{CreateManifestation, RejectedFile, UploadedFile};
use crate::multipart::MultipartFields;

/// Response for draft creation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateManifestationResponse {
    /// Internal id; the only handle to the draft until it is submitted
    #[schema(value_type = String, example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    /// Always null for a draft
    pub protocol: Option<String>,
    #[schema(value_type = String, example = "draft")]
    pub status: ManifestationStatus,
    /// Files that passed validation but could not be stored
    pub rejected_files: Vec<RejectedFile>,
}

/// Partial update of a draft. Absent or null fields are left untouched;
/// blank strings clear the field.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateManifestationRequest {
    pub original_text: Option<String>,
    pub subject_id: Option<String>,
    pub subject_label: Option<String>,
    /// Replaces the stored list; an empty list clears it
    pub complementary_tags: Option<Vec<String>>,
    pub summary: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub location_description: Option<String>,
    pub administrative_region: Option<String>,
    pub anonymous: Option<bool>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

impl From<UpdateManifestationRequest> for ManifestationPatch {
    fn from(req: UpdateManifestationRequest) -> Self {
        let text = |v: Option<String>| v.map(|s| normalize_text(Some(&s)));

        Self {
            original_text: text(req.original_text),
            subject_id: text(req.subject_id),
            subject_label: text(req.subject_label),
            complementary_tags: req.complementary_tags.map(|tags| {
                let tags: Vec<String> = tags
                    .iter()
                    .filter_map(|t| normalize_text(Some(t)))
                    .collect();
                Some(tags).filter(|t| !t.is_empty())
            }),
            summary: text(req.summary),
            location_lat: req.location_lat.filter(|v| v.is_finite()).map(Some),
            location_lng: req.location_lng.filter(|v| v.is_finite()).map(Some),
            location_description: text(req.location_description),
            administrative_region: text(req.administrative_region),
            anonymous: req.anonymous,
            contact_name: text(req.contact_name),
            contact_email: text(req.contact_email),
            contact_phone: text(req.contact_phone),
        }
    }
}

/// Response for draft update
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateManifestationResponse {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub protocol: Option<String>,
    #[schema(value_type = String, example = "draft")]
    pub status: ManifestationStatus,
}

/// Response for submission
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    #[schema(example = "DF-2026-000001")]
    pub protocol: String,
    #[schema(value_type = String, example = "received")]
    pub status: ManifestationStatus,
}

/// Public view of a submitted manifestation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ManifestationDetailResponse {
    #[schema(example = "DF-2026-000001")]
    pub protocol: String,
    #[schema(value_type = String, example = "received")]
    pub status: ManifestationStatus,
    #[schema(value_type = String, example = "text")]
    pub input_type: InputType,
    #[schema(value_type = String, example = "2026-01-24T12:00:00Z")]
    pub created_at: DateTime<Utc>,
    pub attachments_count: usize,
    pub subject_label: Option<String>,
    pub summary: Option<String>,
    /// Text recovered from attachments; filled in asynchronously
    pub extracted_text: Option<String>,
}

/// Parse a path segment holding an internal manifestation id.
pub(crate) fn parse_manifestation_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::bad_request(format!("Invalid manifestation id: {}", raw)))
}

/// Create a draft manifestation
///
/// Accepts multipart/form-data with text (`text` or `original_text`), an
/// optional `file`, or both. At least one is required.
#[utoipa::path(
    post,
    path = "/v1/manifestations",
    tag = "Manifestations",
    request_body(
        content_type = "multipart/form-data",
        description = "Text (`text` or `original_text`), optional `file`, and descriptive fields"
    ),
    responses(
        (status = 201, description = "Draft created", body = CreateManifestationResponse),
        (status = 400, description = "No content, disallowed MIME type or file too large"),
        (status = 500, description = "Attachment storage failed")
    )
)]
pub async fn create_manifestation_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<CreateManifestationResponse>), ApiError> {
    let mut form = MultipartFields::parse(&mut multipart, &["file"]).await?;

    // `text` wins over its `original_text` alias
    let original_text = form
        .get_string("text")
        .or_else(|| form.get_string("original_text"));
    let files: Vec<UploadedFile> = form.take_files().into_iter().map(Into::into).collect();

    let created = state
        .service
        .create(CreateManifestation {
            original_text,
            files,
            fields: form.manifestation_fields(),
        })
        .await
        .map_err(ApiError::mutation)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateManifestationResponse {
            id: created.manifestation.id,
            protocol: created.manifestation.protocol,
            status: created.manifestation.status,
            rejected_files: created.rejected_files,
        }),
    ))
}

/// Update a draft manifestation
#[utoipa::path(
    patch,
    path = "/v1/manifestations/{id}",
    tag = "Manifestations",
    params(
        ("id" = String, Path, description = "Internal manifestation id (UUID)")
    ),
    request_body = UpdateManifestationRequest,
    responses(
        (status = 200, description = "Draft updated", body = UpdateManifestationResponse),
        (status = 400, description = "Not found or no longer a draft")
    )
)]
pub async fn update_manifestation_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateManifestationRequest>,
) -> Result<Json<UpdateManifestationResponse>, ApiError> {
    let id = parse_manifestation_id(&id)?;

    let updated = state
        .service
        .update(id, body.into())
        .await
        .map_err(ApiError::mutation)?;

    Ok(Json(UpdateManifestationResponse {
        id: updated.id,
        protocol: updated.protocol,
        status: updated.status,
    }))
}

/// Submit a draft
///
/// Allocates the next protocol and moves the manifestation to `received`.
/// The manifestation can no longer be changed afterwards.
#[utoipa::path(
    post,
    path = "/v1/manifestations/{id}/submit",
    tag = "Manifestations",
    params(
        ("id" = String, Path, description = "Internal manifestation id (UUID)")
    ),
    responses(
        (status = 200, description = "Submitted", body = SubmitResponse),
        (status = 400, description = "Not found or no longer a draft")
    )
)]
pub async fn submit_manifestation_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let id = parse_manifestation_id(&id)?;

    let submitted = state
        .service
        .submit(id)
        .await
        .map_err(ApiError::mutation)?;

    let protocol = submitted
        .protocol
        .ok_or_else(|| ApiError::internal("Submitted manifestation has no protocol"))?;

    Ok(Json(SubmitResponse {
        protocol,
        status: submitted.status,
    }))
}

/// Look up a submitted manifestation by protocol
///
/// Drafts have no protocol and cannot be found here.
#[utoipa::path(
    get,
    path = "/v1/manifestations/{protocol}",
    tag = "Manifestations",
    params(
        ("protocol" = String, Path, description = "Protocol, e.g. DF-2026-000001")
    ),
    responses(
        (status = 200, description = "Manifestation found", body = ManifestationDetailResponse),
        (status = 404, description = "No manifestation with this protocol")
    )
)]
pub async fn get_manifestation_handler(
    State(state): State<AppState>,
    Path(protocol): Path<String>,
) -> Result<Json<ManifestationDetailResponse>, ApiError> {
    let detail = state.service.get_by_protocol(&protocol).await?;
    let m = detail.manifestation;

    Ok(Json(ManifestationDetailResponse {
        protocol: m.protocol.unwrap_or(protocol),
        status: m.status,
        input_type: m.input_type,
        created_at: m.created_at,
        attachments_count: detail.attachments_count,
        subject_label: m.subject_label,
        summary: m.summary,
        extracted_text: m.extracted_text,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_request_into_patch() {
        let body: UpdateManifestationRequest = serde_json::from_str(
            r#"{
                "summary": "  Poste apagado  ",
                "contact_email": "   ",
                "complementary_tags": [" iluminação ", ""],
                "anonymous": true,
                "subject_id": null
            }"#,
        )
        .unwrap();
        let patch = ManifestationPatch::from(body);

        assert_eq!(patch.summary, Some(Some("Poste apagado".to_string())));
        assert_eq!(patch.contact_email, Some(None));
        assert_eq!(
            patch.complementary_tags,
            Some(Some(vec!["iluminação".to_string()]))
        );
        assert_eq!(patch.anonymous, Some(true));
        assert_eq!(patch.subject_id, None);
        assert_eq!(patch.original_text, None);
    }

    #[test]
    fn test_empty_tag_list_clears() {
        let body = UpdateManifestationRequest {
            complementary_tags: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(ManifestationPatch::from(body).complementary_tags, Some(None));
    }

    #[test]
    fn test_parse_manifestation_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_manifestation_id(&id.to_string()).unwrap(), id);
        assert!(parse_manifestation_id("DF-2026-000001").is_err());
    }
}
