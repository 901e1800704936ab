//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod admin;
pub mod attachments;
pub mod health;
pub mod manifestations;

pub use crate::state::AppState;
pub use admin::{list_manifestations_handler, ListManifestationsQuery, ManifestationListResponse};
pub use attachments::{
    add_attachments_handler, download_attachment_handler, list_attachments_handler,
    AddAttachmentsResponse, AttachmentListResponse, AttachmentResponse,
};
pub use health::{health, index, ready, HealthResponse, IndexResponse, ReadyResponse};
pub use manifestations::{
    create_manifestation_handler, get_manifestation_handler, submit_manifestation_handler,
    update_manifestation_handler, CreateManifestationResponse, ManifestationDetailResponse,
    SubmitResponse, UpdateManifestationRequest, UpdateManifestationResponse,
};
