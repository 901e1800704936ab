//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3 document served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::db::ManifestationListItem;
use crate::handlers::{
    AddAttachmentsResponse, AttachmentListResponse, AttachmentResponse,
    CreateManifestationResponse, HealthResponse, IndexResponse, ManifestationDetailResponse,
    ManifestationListResponse, ReadyResponse, SubmitResponse, UpdateManifestationRequest,
    UpdateManifestationResponse,
};
use crate::lifecycle::RejectedFile;

/// Ouvidoria API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ouvidoria - Manifestation Intake API",
        version = "0.1.0",
        description = r#"
## Citizen complaint intake

A manifestation is a complaint, request or report sent to the ombudsman
office. It can be written text, audio, images, video, or any mix of them.

### Lifecycle

1. **Create** a draft via `POST /v1/manifestations` and keep the returned `id`
2. **Update** the draft (`PATCH`) or **add attachments** while it is a draft
3. **Submit** it via `POST /v1/manifestations/{id}/submit` to receive a
   protocol such as `DF-2026-000001`
4. **Look it up** later by protocol only; drafts are never public

Text is extracted from attachments in the background (OCR for images,
transcription for audio, both for video) and appears in `extracted_text`
once ready.
"#,
        license(
            name = "MIT OR Apache-2.0",
            url = "https://github.com/participa-df/ouvidoria/blob/main/LICENSE"
        ),
        contact(
            name = "Ouvidoria Team",
            url = "https://github.com/participa-df/ouvidoria"
        )
    ),
    servers(
        (url = "http://localhost:8000", description = "Local development server")
    ),
    tags(
        (name = "Manifestations", description = "Create, update, submit and look up manifestations"),
        (name = "Attachments", description = "Upload and download manifestation attachments"),
        (name = "Admin", description = "Administrative listing, drafts included"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::index,
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::manifestations::create_manifestation_handler,
        crate::handlers::manifestations::update_manifestation_handler,
        crate::handlers::manifestations::submit_manifestation_handler,
        crate::handlers::manifestations::get_manifestation_handler,
        crate::handlers::attachments::add_attachments_handler,
        crate::handlers::attachments::list_attachments_handler,
        crate::handlers::attachments::download_attachment_handler,
        crate::handlers::admin::list_manifestations_handler,
    ),
    components(
        schemas(
            IndexResponse,
            HealthResponse,
            ReadyResponse,
            CreateManifestationResponse,
            UpdateManifestationRequest,
            UpdateManifestationResponse,
            SubmitResponse,
            ManifestationDetailResponse,
            AddAttachmentsResponse,
            AttachmentResponse,
            AttachmentListResponse,
            RejectedFile,
            ManifestationListItem,
            ManifestationListResponse,
        )
    )
)]
pub struct ApiDoc;
